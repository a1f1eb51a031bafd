use std::fs;
use syllabus_core::{load_corpus, CorpusError};
use tempfile::tempdir;

#[test]
fn loads_json_array() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("syllabus.json");
    fs::write(
        &path,
        r#"[
            {"科目名": "アルゴリズムとデータ構造", "教授名": "芳賀 博英", "開講学期": "秋学期", "曜日・時限": "金曜日1講時", "単位数": 2},
            {"教授名": "名無し"},
            {"科目名": "機械学習", "教授名": "佐藤 太郎", "成績評価基準": null}
        ]"#,
    )
    .unwrap();

    let corpus = load_corpus(&path).unwrap();
    assert_eq!(corpus.len(), 2);
    assert_eq!(corpus.source(), Some(path.as_path()));
    let doc = &corpus.documents()[0];
    assert_eq!(doc.title(), "アルゴリズムとデータ構造");
    assert_eq!(doc.instructor(), "芳賀 博英");
    assert_eq!(doc.period(), "秋学期 金曜日1講時");
    assert!(doc.text().starts_with("科目名: アルゴリズムとデータ構造\n教授名: 芳賀 博英\n開講学期: 秋学期"));
    assert_eq!(doc.raw()["単位数"], serde_json::json!(2));
    assert_eq!(corpus.instructors().len(), 2);
}

#[test]
fn loads_csv_with_bom_and_nested_cells() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("syllabus_all.csv");
    let csv = "\u{feff}科目名, 教授名 ,曜日・時限,単位数,成績評価基準,成績評価結果\n\
        アルゴリズムとデータ構造, 芳賀 博英 ,金曜日1講時,2,\"[{\"\"項目\"\": \"\"期末試験\"\", \"\"割合\"\": \"\"30%\"\", \"\"詳細\"\": \"\"筆記\"\"}]\",\"{\"\"A\"\": \"\"10.0\"\", \"\"B\"\": \"\"30.0\"\"}\"\n\
        ,佐藤 太郎,,,,\n\
        ソフトウェア工学,佐藤 太郎,,,{broken,\n";
    fs::write(&path, csv).unwrap();

    let corpus = load_corpus(&path).unwrap();
    assert_eq!(corpus.len(), 2);

    let first = &corpus.documents()[0];
    assert_eq!(first.instructor(), "芳賀 博英");
    assert!(first.text().contains("成績評価基準:\n  - 期末試験 (30%): 筆記"));
    assert!(first.text().contains("成績評価結果: A: 10.0, B: 30.0"));

    // The unparseable nested cell is dropped, the record survives.
    let second = &corpus.documents()[1];
    assert_eq!(second.title(), "ソフトウェア工学");
    assert!(!second.text().contains("成績評価基準"));
}

#[test]
fn bracketed_plain_cells_stay_text() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("syllabus.csv");
    let csv = r#"科目名,教授名,概要
[前期] 情報理論,芳賀 博英,"[English] Matrices, vectors and codes"
線形代数,田中 一郎,[1]
符号理論,佐藤 太郎,"{""note"": ""隔週""}"
"#;
    fs::write(&path, csv).unwrap();

    let corpus = load_corpus(&path).unwrap();
    assert_eq!(corpus.len(), 3);
    let docs = corpus.documents();
    assert_eq!(docs[0].title(), "[前期] 情報理論");
    assert!(docs[0].text().contains("概要: [English] Matrices, vectors and codes"));
    assert_eq!(docs[1].text(), "科目名: 線形代数\n教授名: 田中 一郎\n概要: [1]");
    assert!(docs[2].text().contains(r#"概要: {"note": "隔週"}"#));
}

#[test]
fn loads_tsv_and_jsonl() {
    let dir = tempdir().unwrap();
    let tsv = dir.path().join("courses.tsv");
    fs::write(&tsv, "subject\tinstructor\nCompilers\tSato Taro\n").unwrap();
    assert_eq!(load_corpus(&tsv).unwrap().documents()[0].title(), "Compilers");

    let jsonl = dir.path().join("courses.jsonl");
    fs::write(&jsonl, "{\"subject\": \"Compilers\"}\nnot json\n\n{\"subject\": \"Databases\"}\n").unwrap();
    assert_eq!(load_corpus(&jsonl).unwrap().len(), 2);
}

#[test]
fn reports_unavailable_sources() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("missing.json");
    assert!(matches!(load_corpus(&missing), Err(CorpusError::NotFound(_))));

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "[{\"科目名\": ").unwrap();
    assert!(matches!(load_corpus(&broken), Err(CorpusError::Parse { .. })));

    let empty = dir.path().join("empty.json");
    fs::write(&empty, "[{\"教授名\": \"佐藤\"}]").unwrap();
    assert!(matches!(load_corpus(&empty), Err(CorpusError::Empty(_))));

    let xml = dir.path().join("syllabus.xml");
    fs::write(&xml, "<courses/>").unwrap();
    assert!(matches!(load_corpus(&xml), Err(CorpusError::UnsupportedFormat(_))));
}
