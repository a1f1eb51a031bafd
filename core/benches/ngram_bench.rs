use criterion::{criterion_group, criterion_main, Criterion};
use syllabus_core::index::NgramIndex;
use syllabus_core::tokenizer::char_ngrams;

const SAMPLE: &str = "科目名: アルゴリズムとデータ構造\n教授名: 芳賀 博英\n開講学期: 秋学期\n曜日・時限: 金曜日1講時\n\
概要: 探索、整列、グラフアルゴリズムの基礎を学び、計算量の考え方を身につける。毎週プログラミング課題がある。";

fn bench_ngrams(c: &mut Criterion) {
    c.bench_function("char_ngrams_syllabus", |b| b.iter(|| char_ngrams(SAMPLE)));
}

fn bench_score(c: &mut Criterion) {
    let texts: Vec<String> = (0..500).map(|i| format!("{SAMPLE} 第{i}回")).collect();
    let index = NgramIndex::build(texts.iter().map(String::as_str));
    c.bench_function("lexical_score_500_docs", |b| b.iter(|| index.score("プログラミングが少ない授業")));
}

criterion_group!(benches, bench_ngrams, bench_score);
criterion_main!(benches);
