use serde::{Deserialize, Serialize};

pub mod corpus;
pub mod embedding;
pub mod error;
pub mod index;
pub mod persist;
pub mod prompt;
pub mod query;
pub mod retrieval;
pub mod similarity;
pub mod tokenizer;

pub use corpus::{load_corpus, Corpus, CourseRecord, InstructorIndex};
pub use embedding::{Embedder, EmbeddingBackend, EmbeddingService};
pub use error::CorpusError;
pub use prompt::{assemble, PromptOptions, Role, Turn};
pub use query::{interpret, RetrievalQuery};
pub use retrieval::{RetrievalConfig, RetrievalEngine, RetrievalOutcome, RetrievalPath, ScoredDocument};
pub use similarity::{RankingStrategy, SimilarityIndex};

pub type TermId = u32;
/// Position of a document in its corpus.
pub type DocId = u32;

/// A normalized course record.
///
/// `text` is rendered once from the structured fields when the document is
/// created and is never empty: records without a subject name never become
/// documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    title: String,
    instructor: String,
    period: String,
    text: String,
    raw: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn instructor(&self) -> &str {
        &self.instructor
    }

    /// Semester and day/period descriptor, e.g. "秋学期 金曜日1講時". May be empty.
    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Source fields exactly as they were read. Not used for scoring.
    pub fn raw(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.raw
    }
}
