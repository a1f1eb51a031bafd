use anyhow::Result;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use syllabus_core::embedding::{Embedder, EmbeddingService, HashedEmbedder};
use syllabus_core::persist::{load_meta, load_vectors};
use syllabus_core::{load_corpus, RankingStrategy, RetrievalConfig, RetrievalEngine};
use tempfile::tempdir;

/// Hashed embeddings that count how many texts were embedded.
struct CountingEmbedder {
    inner: HashedEmbedder,
    embedded: Arc<AtomicUsize>,
}

impl Embedder for CountingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts)
    }
}

fn counting_service(embedded: &Arc<AtomicUsize>) -> Arc<EmbeddingService> {
    let embedded = embedded.clone();
    Arc::new(EmbeddingService::new(
        "counting",
        Box::new(move || -> Result<Box<dyn Embedder>> {
            Ok(Box::new(CountingEmbedder { inner: HashedEmbedder::new(512), embedded: embedded.clone() }))
        }),
    ))
}

fn write_corpus(path: &Path, n: usize) {
    let records: Vec<_> = (0..n)
        .map(|i| serde_json::json!({"科目名": format!("講義{i}"), "概要": format!("第{i}回の内容")}))
        .collect();
    fs::write(path, serde_json::to_string(&records).unwrap()).unwrap();
}

fn dense_config(cache_dir: &Path) -> RetrievalConfig {
    RetrievalConfig {
        strategy: RankingStrategy::Dense,
        cache_dir: Some(cache_dir.to_path_buf()),
        ..RetrievalConfig::default()
    }
}

#[test]
fn stale_cache_is_rebuilt_for_new_corpus_size() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("syllabus.json");
    let cache_dir = dir.path().join("cache");
    let config = dense_config(&cache_dir);
    let embedded = Arc::new(AtomicUsize::new(0));

    write_corpus(&corpus_path, 10);
    let corpus = load_corpus(&corpus_path).unwrap();
    let paths = config.cache_paths(&corpus).unwrap();
    let engine = RetrievalEngine::build(corpus, &config, Some(counting_service(&embedded)));
    assert_eq!(engine.index().strategy(), RankingStrategy::Dense);
    assert_eq!(load_vectors(&paths).unwrap().len(), 10);
    assert_eq!(embedded.load(Ordering::SeqCst), 10);

    write_corpus(&corpus_path, 12);
    let corpus = load_corpus(&corpus_path).unwrap();
    let engine = RetrievalEngine::build(corpus, &config, Some(counting_service(&embedded)));
    assert_eq!(engine.index().len(), 12);
    assert_eq!(embedded.load(Ordering::SeqCst), 22);

    let cache = load_vectors(&paths).unwrap();
    assert_eq!(cache.len(), 12);
    assert_eq!(cache.dimension, 512);
    let meta = load_meta(&paths).unwrap();
    assert_eq!(meta.num_docs, 12);
    assert_eq!(meta.backend, "counting");
}

#[test]
fn matching_cache_is_reused_and_provider_init_is_deferred() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("syllabus.json");
    let config = dense_config(&dir.path().join("cache"));
    write_corpus(&corpus_path, 5);

    let embedded = Arc::new(AtomicUsize::new(0));
    let first = RetrievalEngine::build(load_corpus(&corpus_path).unwrap(), &config, Some(counting_service(&embedded)));
    drop(first);
    assert_eq!(embedded.load(Ordering::SeqCst), 5);

    let service = counting_service(&embedded);
    let engine = RetrievalEngine::build(load_corpus(&corpus_path).unwrap(), &config, Some(service.clone()));
    assert_eq!(engine.index().strategy(), RankingStrategy::Dense);
    assert!(!service.is_initialized());
    assert_eq!(embedded.load(Ordering::SeqCst), 5);

    let docs = engine.retrieve("講義3 第3回の内容", 1);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].title(), "講義3");
    assert!(service.is_initialized());
    // only the query was embedded
    assert_eq!(embedded.load(Ordering::SeqCst), 6);
}

#[test]
fn cache_with_other_vector_size_falls_back_to_lexical() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("syllabus.json");
    let config = dense_config(&dir.path().join("cache"));
    write_corpus(&corpus_path, 5);

    let embedded = Arc::new(AtomicUsize::new(0));
    drop(RetrievalEngine::build(load_corpus(&corpus_path).unwrap(), &config, Some(counting_service(&embedded))));

    // same count, so the 512-wide cache is reused by a 384-wide backend
    let narrower = Arc::new(EmbeddingService::new(
        "hashed",
        Box::new(|| -> Result<Box<dyn Embedder>> { Ok(Box::new(HashedEmbedder::new(384))) }),
    ));
    let engine = RetrievalEngine::build(load_corpus(&corpus_path).unwrap(), &config, Some(narrower));
    assert_eq!(engine.index().strategy(), RankingStrategy::Dense);

    for _ in 0..2 {
        let outcome = engine.retrieve_scored("講義3 第3回の内容", 1);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].document.title(), "講義3");
        assert!(outcome.hits[0].score.unwrap() > 0.0);
    }
}

#[test]
fn cache_is_skipped_without_a_cache_dir() {
    let dir = tempdir().unwrap();
    let corpus_path = dir.path().join("syllabus.json");
    write_corpus(&corpus_path, 3);

    let config = RetrievalConfig { strategy: RankingStrategy::Dense, ..RetrievalConfig::default() };
    let corpus = load_corpus(&corpus_path).unwrap();
    assert!(config.cache_paths(&corpus).is_none());

    let embedded = Arc::new(AtomicUsize::new(0));
    let engine = RetrievalEngine::build(corpus, &config, Some(counting_service(&embedded)));
    assert_eq!(engine.index().strategy(), RankingStrategy::Dense);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn open_disables_retrieval_for_missing_corpus() {
    let dir = tempdir().unwrap();
    let config = RetrievalConfig::default();
    assert!(RetrievalEngine::open(&dir.path().join("nope.csv"), &config).is_none());
}
