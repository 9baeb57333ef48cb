//! Top-level error aggregation.
//!
//! The engine's public operations return `Result<_, EngineError>`; each
//! collaborator's own error type feeds into it via `#[from]` so call sites
//! can use `?` without manual wrapping, the same shape the source package
//! uses for its `IndexError`/`WatcherError` (`actor/indexer.rs`,
//! `actor/watcher.rs`).

use crate::{checkpoint::KvError, embedding::EmbeddingError, vectorstore::VectorStoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("workspace not found: {0}")]
  WorkspaceNotFound(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("checkpoint store error: {0}")]
  Checkpoint(#[from] KvError),

  #[error("embedding provider error: {0}")]
  Embedding(#[from] EmbeddingError),

  #[error("vector store error: {0}")]
  VectorStore(#[from] VectorStoreError),

  #[error("operation cancelled")]
  Cancelled,
}

/// Per-file failure recorded during a run.
///
/// A single file failing never aborts the run: the engine logs the error,
/// records it here, and continues to the next file.
#[derive(Debug, Clone)]
pub struct FileIndexError {
  pub relative_path: String,
  pub message: String,
}

impl std::fmt::Display for FileIndexError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", self.relative_path, self.message)
  }
}
