use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::corpus::{load_corpus, Corpus};
use crate::embedding::{EmbeddingBackend, EmbeddingService};
use crate::persist::CachePaths;
use crate::query::{interpret, RetrievalQuery};
use crate::similarity::{RankingStrategy, SimilarityIndex};
use crate::{DocId, Document};

fn default_k() -> usize { 3 }
fn default_dimension() -> usize { 384 }
fn default_time_slot_boost() -> f32 { 0.05 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of similarity-ranked documents to return.
    pub k: usize,
    pub strategy: RankingStrategy,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: Option<String>,
    /// Vector size for the hashed backend.
    pub embedding_dimension: usize,
    /// Where dense vectors are cached. Without it vectors are recomputed on every start.
    pub cache_dir: Option<PathBuf>,
    /// Added to the score of documents held in the requested period.
    pub time_slot_boost: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            strategy: RankingStrategy::default(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: None,
            embedding_dimension: default_dimension(),
            cache_dir: None,
            time_slot_boost: default_time_slot_boost(),
        }
    }
}

impl RetrievalConfig {
    /// Cache location for `corpus`, when both a cache dir and a corpus file are known.
    pub fn cache_paths(&self, corpus: &Corpus) -> Option<CachePaths> {
        let dir = self.cache_dir.as_ref()?;
        let source = corpus.source()?;
        Some(CachePaths::for_corpus(dir, source, self.embedding_backend.label()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    /// Every document by the mentioned instructor(s), unranked.
    InstructorFilter,
    Similarity,
}

#[derive(Debug, Clone)]
pub struct ScoredDocument<'a> {
    pub doc_id: DocId,
    pub document: &'a Document,
    /// `None` for instructor-filter hits.
    pub score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome<'a> {
    pub query: RetrievalQuery,
    pub path: RetrievalPath,
    pub hits: Vec<ScoredDocument<'a>>,
}

impl<'a> RetrievalOutcome<'a> {
    pub fn documents(&self) -> Vec<&'a Document> {
        self.hits.iter().map(|h| h.document).collect()
    }
}

/// Turns a query into ranked documents over a read-only corpus and index.
///
/// Safe to share between threads; nothing is mutated per call.
pub struct RetrievalEngine {
    corpus: Corpus,
    index: SimilarityIndex,
    default_k: usize,
    time_slot_boost: f32,
}

impl RetrievalEngine {
    pub fn new(corpus: Corpus, index: SimilarityIndex, config: &RetrievalConfig) -> Self {
        Self { corpus, index, default_k: config.k, time_slot_boost: config.time_slot_boost }
    }

    /// Build the similarity index for `corpus` as configured.
    pub fn build(corpus: Corpus, config: &RetrievalConfig, service: Option<Arc<EmbeddingService>>) -> Self {
        let cache = config.cache_paths(&corpus);
        let index = SimilarityIndex::build(&corpus, config.strategy, service, cache.as_ref());
        tracing::info!(
            num_docs = corpus.len(),
            strategy = index.strategy().label(),
            requested = config.strategy.label(),
            "retrieval index ready"
        );
        Self::new(corpus, index, config)
    }

    /// Load the corpus at `path` and build an engine for it.
    ///
    /// Returns `None` when the corpus is unavailable; retrieval is then
    /// disabled and callers continue without context.
    pub fn open(path: &Path, config: &RetrievalConfig) -> Option<Self> {
        let corpus = match load_corpus(path) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "retrieval disabled");
                return None;
            }
        };
        let service = match config.strategy {
            RankingStrategy::Dense => Some(Arc::new(EmbeddingService::for_backend(
                config.embedding_backend,
                config.embedding_model.clone(),
                config.embedding_dimension,
            ))),
            RankingStrategy::Lexical => None,
        };
        Some(Self::build(corpus, config, service))
    }

    pub fn corpus(&self) -> &Corpus { &self.corpus }

    pub fn index(&self) -> &SimilarityIndex { &self.index }

    pub fn default_k(&self) -> usize { self.default_k }

    pub fn retrieve(&self, query: &str, k: usize) -> Vec<&Document> {
        self.retrieve_scored(query, k).documents()
    }

    /// Instructor-scoped queries return every matching document regardless of
    /// `k`. Everything else is ranked by similarity and cut to the top `k`
    /// strictly positive scores; equal scores keep corpus order.
    pub fn retrieve_scored(&self, query: &str, k: usize) -> RetrievalOutcome<'_> {
        let query = interpret(query, self.corpus.instructors());

        if !query.matched_instructors.is_empty() {
            let hits: Vec<ScoredDocument<'_>> = self
                .corpus
                .documents()
                .iter()
                .enumerate()
                .filter(|(_, d)| query.mentions(d.instructor()) && !query.excludes(d.instructor()))
                .map(|(i, d)| ScoredDocument { doc_id: i as DocId, document: d, score: None })
                .collect();
            if !hits.is_empty() {
                tracing::debug!(hits = hits.len(), instructors = ?query.matched_instructors, "instructor-scoped query");
                return RetrievalOutcome { query, path: RetrievalPath::InstructorFilter, hits };
            }
        }

        let hits = self.rank(&query, k);
        RetrievalOutcome { query, path: RetrievalPath::Similarity, hits }
    }

    fn rank(&self, query: &RetrievalQuery, k: usize) -> Vec<ScoredDocument<'_>> {
        if k == 0 {
            return Vec::new();
        }
        let scores = self.index.score(&query.text);
        let mut scored: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(i, score)| *score > 0.0 && !query.excludes(self.corpus.documents()[*i].instructor()))
            // the boost reorders relevant hits, it never admits unrelated ones
            .map(|(i, score)| {
                let in_slot = query
                    .time_slot_hint
                    .is_some_and(|slot| period_has_slot(self.corpus.documents()[i].period(), slot));
                (i, if in_slot { score + self.time_slot_boost } else { score })
            })
            .collect();
        // stable: ties keep corpus order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredDocument { doc_id: i as DocId, document: &self.corpus.documents()[i], score: Some(score) })
            .collect()
    }
}

/// Whether `period` mentions `slot` as a half- or full-width digit.
fn period_has_slot(period: &str, slot: char) -> bool {
    let full_width = slot.to_digit(10).and_then(|d| char::from_u32('０' as u32 + d));
    period.chars().any(|c| c == slot || Some(c) == full_width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_digits_match_both_widths() {
        assert!(period_has_slot("金曜日1講時", '1'));
        assert!(period_has_slot("月曜日２講時", '2'));
        assert!(!period_has_slot("月曜日2講時", '3'));
        assert!(!period_has_slot("", '1'));
    }

    #[test]
    fn config_defaults() {
        let config: RetrievalConfig = serde_json::from_str(r#"{"strategy": "dense"}"#).unwrap();
        assert_eq!(config.k, 3);
        assert_eq!(config.strategy, RankingStrategy::Dense);
        assert_eq!(config.embedding_backend, EmbeddingBackend::Hashed);
    }
}
