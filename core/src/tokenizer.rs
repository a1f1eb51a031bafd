use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Shortest and longest character n-gram used for lexical matching.
pub const NGRAM_MIN: usize = 2;
pub const NGRAM_MAX: usize = 3;

/// NFKC-normalize, lowercase and collapse whitespace runs to a single space.
///
/// NFKC folds full-width latin letters, digits and spaces into their
/// half-width forms, so "１限" and "1限" produce the same n-grams.
pub fn normalize(text: &str) -> String {
    let folded = text.nfkc().collect::<String>().to_lowercase();
    WHITESPACE.replace_all(&folded, " ").into_owned()
}

/// Character n-grams of length `NGRAM_MIN..=NGRAM_MAX` over the normalized text.
///
/// No word segmentation is attempted; syllabus text is mostly Japanese and is
/// not whitespace-delimited.
pub fn char_ngrams(text: &str) -> Vec<String> {
    char_ngrams_in_range(text, NGRAM_MIN, NGRAM_MAX)
}

pub fn char_ngrams_in_range(text: &str, min_n: usize, max_n: usize) -> Vec<String> {
    let chars: Vec<char> = normalize(text).chars().collect();
    let mut grams = Vec::new();
    for n in min_n.max(1)..=max_n {
        if chars.len() < n {
            break;
        }
        for window in chars.windows(n) {
            grams.push(window.iter().collect());
        }
    }
    grams
}

/// Raw occurrence counts of every n-gram in `text`.
pub fn ngram_counts(text: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for gram in char_ngrams(text) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Remove every whitespace character, including the ideographic space U+3000.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Comparison key for person names: NFKC, lowercase, no whitespace.
pub fn name_key(name: &str) -> String {
    strip_whitespace(&name.nfkc().collect::<String>().to_lowercase())
}
