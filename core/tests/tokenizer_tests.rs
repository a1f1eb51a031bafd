use syllabus_core::tokenizer::{char_ngrams, normalize, strip_whitespace};

#[test]
fn it_folds_width_and_case() {
    assert_eq!(normalize("ＡＩ入門　１限"), "ai入門 1限");
    let grams = char_ngrams("ＡＩ入門");
    assert!(grams.contains(&"ai".to_string()));
    assert!(grams.contains(&"ai入".to_string()));
}

#[test]
fn it_collapses_whitespace_runs() {
    let grams = char_ngrams("a \n\t b");
    assert_eq!(grams, vec!["a ", " b", "a b"]);
}

#[test]
fn it_strips_ideographic_spaces() {
    assert_eq!(strip_whitespace(" 芳賀\u{3000}博英 "), "芳賀博英");
}
