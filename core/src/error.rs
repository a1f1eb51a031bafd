use std::path::PathBuf;

use thiserror::Error;

/// Reasons a corpus source cannot back retrieval.
///
/// None of these are fatal for a chat session: callers log them and carry on
/// without retrieved context.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus source not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read corpus source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse corpus source {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported corpus format for {0} (expected .json, .jsonl, .csv or .tsv)")]
    UnsupportedFormat(PathBuf),

    #[error("corpus source {0} yielded no usable documents")]
    Empty(PathBuf),
}
