//! Vector Store Client (C6)
//!
//! Adapter over the external, namespaced vector index. The source package
//! talks to a local embedded vector database directly; this crate instead
//! treats the store purely as a remote collaborator reached through this
//! trait, so hosts can back it with whatever service they use in
//! production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata carried alongside a vector record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
  pub user_id: String,
  pub workspace_id: String,
  pub workspace_path: String,
  pub file_path: String,
  pub start_line: u32,
  pub end_line: u32,
  pub language_id: Option<String>,
  /// Truncated to at most 1000 characters.
  pub content_preview: String,
  pub indexed_at: DateTime<Utc>,
}

impl VectorMetadata {
  pub fn preview(content: &str) -> String {
    content.chars().take(1000).collect()
  }
}

/// A single vector record as the store sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
  pub id: String,
  pub values: Vec<f32>,
  pub metadata: VectorMetadata,
}

/// Result of a `query` call, used only by diagnostics.
#[derive(Debug, Clone)]
pub struct QueryMatch {
  pub id: String,
  pub score: f32,
}

/// Aggregate stats for a namespace, used for post-`Ready` validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceStats {
  pub vector_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
  #[error("vector store request failed: {0}")]
  Request(String),
  #[error("namespace operation failed: {0}")]
  Namespace(String),
}

/// The external vector-store interface.
///
/// `upsert` is idempotent on `id` (the store replaces a record sharing an
/// existing id) and does not allow partial success: a failed `upsert` call
/// fails the whole batch, which the engine treats as a file-level failure.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
  async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), VectorStoreError>;

  async fn delete_namespace(&self, namespace: &str) -> Result<(), VectorStoreError>;

  /// Delete specific vectors by id. Used by the deletion-handling strategy
  /// this crate chose: per-id delete via the deterministic `vector_id`
  /// scheme, rather than periodic namespace scrubs.
  async fn delete_ids(&self, namespace: &str, ids: &[String]) -> Result<(), VectorStoreError>;

  async fn stats(&self, namespace: &str) -> Result<NamespaceStats, VectorStoreError>;

  async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, VectorStoreError>;
}
