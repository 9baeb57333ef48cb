//! Embedder Client (C5)
//!
//! `EmbeddingProvider` is the typed boundary between the engine and whatever
//! text-embedding service the host wires up. The engine owns batching and
//! inter-call pacing (see [`pacing`]); a provider implementation's only job
//! is to turn a batch of texts into one vector per text, atomically.

pub mod http;
pub mod pacing;

use async_trait::async_trait;

/// Embedding mode determines how text is formatted before embedding.
///
/// Instruction-following embedding models produce better retrieval results
/// when queries are prefixed with a task instruction, while documents are
/// embedded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
  /// Embedding a document for storage/indexing. Text is embedded as-is.
  #[default]
  Document,
  /// Embedding a query for retrieval/search. May be prefixed with a task
  /// instruction for better retrieval.
  Query,
}

/// The external embedding provider interface.
///
/// `embed_batch` returns one vector per input, in order, and fails
/// atomically: a single failed request fails the whole batch rather than
/// returning partial results.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
  fn name(&self) -> &str;
  fn model_id(&self) -> &str;
  fn dimensions(&self) -> usize;

  async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
    let mut vectors = self.embed_batch(&[text], mode).await?;
    Ok(vectors.pop().unwrap_or_default())
  }

  async fn embed_batch(&self, texts: &[&str], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
  #[error("no API key configured for provider")]
  NoApiKey,
  #[error("request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("provider error: {0}")]
  ProviderError(String),
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out")]
  Timeout,
}
