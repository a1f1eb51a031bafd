use anyhow::{anyhow, bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::corpus::Corpus;
use crate::embedding::EmbeddingService;
use crate::index::NgramIndex;
use crate::persist::{load_vectors, save_cache, CachePaths, VectorCache};

/// How documents are ranked against a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingStrategy {
    /// Character 2–3-gram TF-IDF vectors, cosine similarity.
    #[default]
    Lexical,
    /// Dense embeddings from an `EmbeddingService`, cosine similarity.
    Dense,
}

impl RankingStrategy {
    /// Strategies to try, in order, when this one is configured.
    /// Lexical is always last and cannot fail.
    pub fn fallback_order(self) -> &'static [RankingStrategy] {
        match self {
            Self::Dense => &[Self::Dense, Self::Lexical],
            Self::Lexical => &[Self::Lexical],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Dense => "dense",
        }
    }
}

impl std::str::FromStr for RankingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lexical" | "tfidf" | "ngram" => Ok(Self::Lexical),
            "dense" | "embedding" | "embeddings" => Ok(Self::Dense),
            other => Err(format!("unknown ranking strategy '{other}'. Expected 'lexical' or 'dense'.")),
        }
    }
}

struct DenseIndex {
    vectors: Vec<Vec<f32>>,
    /// Length of the document vectors; query vectors must match it.
    dimension: usize,
    service: Arc<EmbeddingService>,
    mismatch_warned: AtomicBool,
}

/// Numeric representation of a corpus, one entry per document in corpus order.
///
/// The lexical index is always present; it is what scoring falls back to when
/// the dense backend cannot produce a query vector.
pub struct SimilarityIndex {
    lexical: NgramIndex,
    dense: Option<DenseIndex>,
}

impl SimilarityIndex {
    pub fn lexical(corpus: &Corpus) -> Self {
        Self { lexical: build_lexical(corpus), dense: None }
    }

    /// Build the index for `strategy`, walking its fallback order.
    ///
    /// For the dense strategy a cache under `cache` is reused when it holds
    /// exactly one vector per document; otherwise all document vectors are
    /// recomputed and written back. Never fails: anything that goes wrong
    /// on the dense path leaves a lexical-only index.
    pub fn build(
        corpus: &Corpus,
        strategy: RankingStrategy,
        service: Option<Arc<EmbeddingService>>,
        cache: Option<&CachePaths>,
    ) -> Self {
        let lexical = build_lexical(corpus);
        for &candidate in strategy.fallback_order() {
            match candidate {
                RankingStrategy::Lexical => break,
                RankingStrategy::Dense => {
                    let Some(service) = service.clone() else {
                        tracing::warn!("dense ranking requested without an embedding service; using lexical ranking");
                        continue;
                    };
                    match load_or_build_vectors(corpus, &service, cache) {
                        Ok(vectors) => {
                            return Self { lexical, dense: Some(DenseIndex::new(vectors, service)) };
                        }
                        Err(err) => {
                            tracing::warn!(backend = service.label(), error = %err, "dense index unavailable; using lexical ranking");
                        }
                    }
                }
            }
        }
        Self { lexical, dense: None }
    }

    /// Strategy the index was built for. Scoring may still fall back to
    /// lexical per call if the embedding backend fails.
    pub fn strategy(&self) -> RankingStrategy {
        if self.dense.is_some() { RankingStrategy::Dense } else { RankingStrategy::Lexical }
    }

    pub fn len(&self) -> usize {
        self.lexical.num_docs as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Similarity of `query` to every document, higher is more similar.
    pub fn score(&self, query: &str) -> Vec<f32> {
        if let Some(dense) = &self.dense {
            match dense.score(query) {
                Ok(scores) => return scores,
                Err(err) => tracing::debug!(error = %err, "dense scoring failed; using lexical scores"),
            }
        }
        self.lexical.score(query)
    }
}

impl DenseIndex {
    fn new(vectors: Vec<Vec<f32>>, service: Arc<EmbeddingService>) -> Self {
        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        Self { vectors, dimension, service, mismatch_warned: AtomicBool::new(false) }
    }

    fn score(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = self
            .service
            .get()
            .ok_or_else(|| anyhow!("embedding backend `{}` unavailable", self.service.label()))?;
        let q = embedder.embed(query)?;
        if q.len() != self.dimension {
            // A cache written by another model or vector size still matches on count.
            if !self.mismatch_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    backend = self.service.label(),
                    query_dimension = q.len(),
                    cached_dimension = self.dimension,
                    "cached document vectors do not match the embedding backend; rebuild the cache"
                );
            }
            bail!("query vector has {} dimensions, documents have {}", q.len(), self.dimension);
        }
        Ok(self.vectors.iter().map(|v| cosine_similarity(&q, v)).collect())
    }
}

fn build_lexical(corpus: &Corpus) -> NgramIndex {
    NgramIndex::build(corpus.documents().iter().map(|d| d.text()))
}

fn load_or_build_vectors(corpus: &Corpus, service: &EmbeddingService, cache: Option<&CachePaths>) -> Result<Vec<Vec<f32>>> {
    if let Some(paths) = cache {
        match load_vectors(paths) {
            Ok(cached) if cached.len() == corpus.len() => {
                tracing::info!(path = %paths.vectors().display(), num_docs = cached.len(), "reusing vector cache");
                return Ok(cached.vectors);
            }
            Ok(cached) => {
                tracing::info!(cached = cached.len(), live = corpus.len(), "vector cache is stale; rebuilding");
            }
            Err(err) => {
                tracing::debug!(path = %paths.vectors().display(), error = %err, "no usable vector cache");
            }
        }
    }

    let embedder = service
        .get()
        .ok_or_else(|| anyhow!("embedding backend `{}` unavailable", service.label()))?;
    let texts: Vec<String> = corpus.documents().iter().map(|d| d.text().to_owned()).collect();
    let vectors = embedder.embed_batch(&texts)?;
    ensure!(
        vectors.len() == texts.len(),
        "embedding backend returned {} vectors for {} documents",
        vectors.len(),
        texts.len()
    );
    tracing::info!(num_docs = vectors.len(), dimension = embedder.dimension(), "computed document embeddings");

    let cache_file = VectorCache::new(vectors);
    if let Some(paths) = cache {
        if let Err(err) = save_cache(paths, &cache_file, service.label()) {
            tracing::warn!(path = %paths.vectors().display(), error = %err, "failed to persist vector cache");
        }
    }
    Ok(cache_file.vectors)
}

/// Dot product over the product of magnitudes; 0.0 when either vector is
/// zero or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
