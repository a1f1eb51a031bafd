use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::tokenizer::char_ngrams;

/// Produces fixed-length dense vectors for text.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_owned()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no vector for input"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Feature hashing of character n-grams. Always available.
    #[default]
    Hashed,
    /// ONNX sentence-embedding models; needs the `fastembed` cargo feature.
    FastEmbed,
}

impl EmbeddingBackend {
    pub fn label(self) -> &'static str {
        match self {
            Self::Hashed => "hashed",
            Self::FastEmbed => "fastembed",
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            other => Err(format!("unknown embedding backend '{other}'. Expected 'hashed' or 'fastembed'.")),
        }
    }
}

pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }
}

impl Embedder for HashedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hashed_embedding(t, self.dimension)).collect())
    }
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    for gram in char_ngrams(text) {
        vector[bucket(&gram, dim)] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

// FNV-1a; std's hasher is not stable across releases and vectors get persisted.
fn bucket(token: &str, dimension: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % dimension as u64) as usize
}

#[cfg(feature = "fastembed")]
mod onnx {
    use anyhow::{anyhow, Context, Result};
    use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
    use parking_lot::Mutex;
    use std::str::FromStr;

    use super::Embedder;

    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
        dimension: usize,
    }

    impl FastEmbedder {
        pub fn new(model_override: Option<&str>) -> Result<Self> {
            let model_name = match model_override {
                Some(code) => EmbeddingModel::from_str(code).map_err(|err| anyhow!(err))?,
                None => EmbeddingModel::default(),
            };
            let dimension = EmbeddingModel::get_model_info(&model_name)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name}"))?
                .dim;
            let options = TextInitOptions::new(model_name).with_show_download_progress(false);
            let model = TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            Ok(Self { model: Mutex::new(model), dimension })
        }
    }

    impl Embedder for FastEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            self.model
                .lock()
                .embed(texts.to_vec(), None)
                .context("generating fastembed batch embeddings")
        }
    }
}

#[cfg(feature = "fastembed")]
pub use onnx::FastEmbedder;

pub type EmbedderFactory = Box<dyn Fn() -> Result<Box<dyn Embedder>> + Send + Sync>;

/// Shared handle to an embedding provider that is constructed on first use.
///
/// Construction runs at most once even under concurrent callers. A failed
/// construction is remembered: the failure is logged once and every later
/// call sees the backend as unavailable.
pub struct EmbeddingService {
    label: String,
    factory: EmbedderFactory,
    embedder: OnceCell<Option<Box<dyn Embedder>>>,
}

impl EmbeddingService {
    pub fn new(label: impl Into<String>, factory: EmbedderFactory) -> Self {
        Self { label: label.into(), factory, embedder: OnceCell::new() }
    }

    pub fn for_backend(backend: EmbeddingBackend, model: Option<String>, dimension: usize) -> Self {
        let factory: EmbedderFactory = match backend {
            EmbeddingBackend::Hashed => Box::new(move || -> Result<Box<dyn Embedder>> {
                Ok(Box::new(HashedEmbedder::new(dimension)))
            }),
            EmbeddingBackend::FastEmbed => fastembed_factory(model),
        };
        Self::new(backend.label(), factory)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_initialized(&self) -> bool {
        self.embedder.get().is_some()
    }

    /// The provider, constructing it on first call. `None` if it cannot be built.
    pub fn get(&self) -> Option<&dyn Embedder> {
        self.embedder
            .get_or_init(|| match (self.factory)() {
                Ok(embedder) => {
                    tracing::info!(backend = %self.label, dimension = embedder.dimension(), "embedding backend ready");
                    Some(embedder)
                }
                Err(err) => {
                    tracing::warn!(backend = %self.label, error = %err, "embedding backend unavailable; using lexical ranking");
                    None
                }
            })
            .as_deref()
    }
}

#[cfg(feature = "fastembed")]
fn fastembed_factory(model: Option<String>) -> EmbedderFactory {
    Box::new(move || -> Result<Box<dyn Embedder>> { Ok(Box::new(FastEmbedder::new(model.as_deref())?)) })
}

#[cfg(not(feature = "fastembed"))]
fn fastembed_factory(_model: Option<String>) -> EmbedderFactory {
    Box::new(|| -> Result<Box<dyn Embedder>> { Err(anyhow!("built without the `fastembed` feature")) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn hashed_vectors_are_unit_length() {
        let v = HashedEmbedder::new(64).embed("プログラミング演習").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashed_vectors_are_stable() {
        let e = HashedEmbedder::new(32);
        assert_eq!(e.embed("線形代数").unwrap(), e.embed("線形代数").unwrap());
    }

    #[test]
    fn provider_is_constructed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = EmbeddingService::new(
            "counting",
            Box::new(move || -> Result<Box<dyn Embedder>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(HashedEmbedder::new(8)))
            }),
        );
        assert!(!service.is_initialized());
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| assert!(service.get().is_some()));
            }
        });
        assert!(service.is_initialized());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_construction_is_remembered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = EmbeddingService::new(
            "broken",
            Box::new(move || -> Result<Box<dyn Embedder>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("no model"))
            }),
        );
        assert!(service.get().is_none());
        assert!(service.get().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("FastEmbed".parse::<EmbeddingBackend>().unwrap(), EmbeddingBackend::FastEmbed);
        assert!("word2vec".parse::<EmbeddingBackend>().is_err());
    }
}
