//! In-crate test doubles for the three external collaborators: embedding
//! provider, vector store, and KV store. Deterministic and in-memory, so the
//! engine's state machine can be exercised without a network or a real
//! vector database — the same shape as the source package's own `MemoryKv`
//! fixture in `checkpoint.rs`, generalized to the other two collaborators
//! and made reusable across test modules.

use std::{
  collections::HashMap,
  sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
  checkpoint::{Durability, KvError, KvStore},
  embedding::{EmbeddingError, EmbeddingMode, EmbeddingProvider},
  vectorstore::{NamespaceStats, QueryMatch, VectorMetadata, VectorRecord, VectorStoreClient, VectorStoreError},
};

/// Deterministic fake embedder: every text maps to a fixed-dimension vector
/// derived from its content hash, so identical text always embeds to the
/// same vector and distinct text (almost always) embeds to a distinct one.
pub struct MockEmbeddingProvider {
  dimensions: usize,
  pub call_count: AtomicUsize,
  pub fail_next: std::sync::atomic::AtomicBool,
}

impl MockEmbeddingProvider {
  pub fn new(dimensions: usize) -> Self {
    Self { dimensions, call_count: AtomicUsize::new(0), fail_next: std::sync::atomic::AtomicBool::new(false) }
  }

  fn vector_for(&self, text: &str) -> Vec<f32> {
    let digest = sha2::Sha256::digest(text.as_bytes());
    (0..self.dimensions).map(|i| digest[i % digest.len()] as f32 / 255.0).collect()
  }
}

use sha2::Digest;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
  fn name(&self) -> &str {
    "mock"
  }

  fn model_id(&self) -> &str {
    "mock-embedder"
  }

  fn dimensions(&self) -> usize {
    self.dimensions
  }

  async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.call_count.fetch_add(1, Ordering::SeqCst);
    if self.fail_next.swap(false, Ordering::SeqCst) {
      return Err(EmbeddingError::ProviderError("forced failure".to_string()));
    }
    Ok(texts.iter().map(|t| self.vector_for(t)).collect())
  }
}

/// In-memory vector store keyed by `(namespace, id)`.
#[derive(Default)]
pub struct InMemoryVectorStore {
  records: DashMap<String, HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn vector_count(&self, namespace: &str) -> usize {
    self.records.get(namespace).map(|m| m.len()).unwrap_or(0)
  }

  pub fn metadata_for(&self, namespace: &str, id: &str) -> Option<VectorMetadata> {
    self.records.get(namespace).and_then(|m| m.get(id).map(|r| r.metadata.clone()))
  }
}

#[async_trait]
impl VectorStoreClient for InMemoryVectorStore {
  async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
    let mut ns = self.records.entry(namespace.to_string()).or_default();
    for record in records {
      ns.insert(record.id.clone(), record);
    }
    Ok(())
  }

  async fn delete_namespace(&self, namespace: &str) -> Result<(), VectorStoreError> {
    self.records.remove(namespace);
    Ok(())
  }

  async fn delete_ids(&self, namespace: &str, ids: &[String]) -> Result<(), VectorStoreError> {
    if let Some(mut ns) = self.records.get_mut(namespace) {
      for id in ids {
        ns.remove(id);
      }
    }
    Ok(())
  }

  async fn stats(&self, namespace: &str) -> Result<NamespaceStats, VectorStoreError> {
    Ok(NamespaceStats { vector_count: self.vector_count(namespace) as u64 })
  }

  async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, VectorStoreError> {
    let Some(ns) = self.records.get(namespace) else {
      return Ok(Vec::new());
    };
    let mut scored: Vec<QueryMatch> = ns
      .values()
      .map(|r| QueryMatch { id: r.id.clone(), score: cosine_similarity(vector, &r.values) })
      .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    Ok(scored)
  }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}

/// In-memory KV store keyed by `(scope, key)`.
#[derive(Default)]
pub struct InMemoryKvStore {
  entries: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
  async fn get(&self, key: &str, scope: &str) -> Result<Option<String>, KvError> {
    Ok(self.entries.lock().await.get(&(scope.to_string(), key.to_string())).cloned())
  }

  async fn put(&self, key: &str, value: &str, scope: &str, _durability: Durability) -> Result<(), KvError> {
    self.entries.lock().await.insert((scope.to_string(), key.to_string()), value.to_string());
    Ok(())
  }

  async fn delete(&self, key: &str, scope: &str) -> Result<(), KvError> {
    self.entries.lock().await.remove(&(scope.to_string(), key.to_string()));
    Ok(())
  }
}
