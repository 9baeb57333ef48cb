//! Checkpoint Store (C2)
//!
//! Encodes and decodes a versioned checkpoint record and reads/writes it
//! through an external, workspace-scoped key-value collaborator. All
//! operations are best-effort: a storage failure is logged and swallowed,
//! never propagated to the engine's callers.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Maximum number of completed file paths stored verbatim in a checkpoint
/// before switching to a content hash of the set.
pub const MAX_INLINE_COMPLETED_FILES: usize = 5000;

const FNV_PRIME: u64 = 0x100000001b3;
const FNV_OFFSET: u64 = 0xcbf29ce484222325;

/// Persistence durability requested for a KV write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
  /// Survive only for the lifetime of the current process.
  Ephemeral,
  /// Survive process restarts on the same machine.
  Machine,
}

/// The external, workspace-scoped key-value collaborator.
///
/// Implementors may back this with a file, a database row, or a remote
/// service; the checkpoint store treats every operation as fallible and
/// best-effort.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str, scope: &str) -> Result<Option<String>, KvError>;
  async fn put(&self, key: &str, value: &str, scope: &str, durability: Durability) -> Result<(), KvError>;
  async fn delete(&self, key: &str, scope: &str) -> Result<(), KvError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
  #[error("kv store unavailable: {0}")]
  Unavailable(String),
}

/// The run-level state recorded alongside progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
  Running,
  Paused,
  Complete,
  Interrupted,
}

/// A decoded checkpoint record, version-normalized (reads accept `{1, 2}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
  pub total_files: u64,
  pub indexed_files: u64,
  pub total_chunks: u64,
  pub embedded_chunks: u64,
  pub last_full_scan_time: Option<chrono::DateTime<chrono::Utc>>,
  pub last_indexed_time: Option<chrono::DateTime<chrono::Utc>>,
  pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
  pub run_id: Option<i64>,
  pub run_state: Option<RunState>,
  pub completed_file_paths: Option<Vec<String>>,
  pub completed_file_set_hash: Option<String>,
}

/// Wire shape of a persisted checkpoint.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
  version: u32,
  #[serde(flatten)]
  checkpoint: Checkpoint,
}

impl Checkpoint {
  /// Whether this checkpoint represents a resumable in-progress or
  /// interrupted run with a non-empty completed-file set, as opposed to one
  /// a fresh run should simply start over from scratch.
  pub fn is_resumable(&self) -> bool {
    matches!(
      self.run_state,
      Some(RunState::Running) | Some(RunState::Paused) | Some(RunState::Interrupted)
    ) && self.completed_file_paths.as_ref().is_some_and(|s| !s.is_empty())
  }

  fn all_zero(&self) -> bool {
    self.total_files == 0 && self.indexed_files == 0 && self.total_chunks == 0 && self.embedded_chunks == 0
  }
}

/// FNV-1a hash over the sorted, newline-joined set of completed file paths.
pub fn fnv1a_hash(s: &str) -> u64 {
  let mut hash = FNV_OFFSET;
  for byte in s.bytes() {
    hash ^= byte as u64;
    hash = hash.wrapping_mul(FNV_PRIME);
  }
  hash
}

/// Compute the `completed_file_set_hash` used in place of the full array for
/// sets larger than `MAX_INLINE_COMPLETED_FILES`.
pub fn completed_file_set_hash(paths: &BTreeSet<String>) -> String {
  let joined = paths.iter().cloned().collect::<Vec<_>>().join("\n");
  format!("{:016x}", fnv1a_hash(&joined))
}

/// Encode `completed_files` under a size bound: the full sorted array when
/// small, otherwise an FNV-1a hash with the array omitted.
pub fn encode_completed_files(completed_files: &BTreeSet<String>) -> (Option<Vec<String>>, Option<String>) {
  if completed_files.len() <= MAX_INLINE_COMPLETED_FILES {
    (Some(completed_files.iter().cloned().collect()), None)
  } else {
    (None, Some(completed_file_set_hash(completed_files)))
  }
}

/// Reads/writes the single versioned checkpoint record for a workspace.
pub struct CheckpointStore {
  kv: std::sync::Arc<dyn KvStore>,
}

impl CheckpointStore {
  pub fn new(kv: std::sync::Arc<dyn KvStore>) -> Self {
    Self { kv }
  }

  /// Load the checkpoint for `storage_key`/`scope`. Returns `None` for an
  /// absent, malformed, or unknown-version record — never an error.
  pub async fn load(&self, storage_key: &str, scope: &str) -> Option<Checkpoint> {
    let raw = match self.kv.get(storage_key, scope).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(error = %e, "checkpoint load failed, treating as absent");
        return None;
      }
    };

    match serde_json::from_str::<CheckpointRecord>(&raw) {
      Ok(record) if record.version == 1 || record.version == 2 => Some(record.checkpoint),
      Ok(record) => {
        warn!(version = record.version, "unknown checkpoint version, ignoring");
        None
      }
      Err(e) => {
        warn!(error = %e, "malformed checkpoint record, ignoring");
        None
      }
    }
  }

  /// Persist `checkpoint` for `storage_key`/`scope`. A no-op when every
  /// counter is zero and no checkpoint detail is otherwise present.
  pub async fn save(&self, storage_key: &str, scope: &str, checkpoint: &Checkpoint) {
    if checkpoint.all_zero() && checkpoint.run_state.is_none() {
      return;
    }

    let record = CheckpointRecord {
      version: 2,
      checkpoint: checkpoint.clone(),
    };

    let encoded = match serde_json::to_string(&record) {
      Ok(s) => s,
      Err(e) => {
        warn!(error = %e, "failed to encode checkpoint");
        return;
      }
    };

    if let Err(e) = self.kv.put(storage_key, &encoded, scope, Durability::Machine).await {
      warn!(error = %e, "checkpoint save failed");
    }
  }

  /// Best-effort delete of the checkpoint record.
  pub async fn clear(&self, storage_key: &str, scope: &str) {
    if let Err(e) = self.kv.delete(storage_key, scope).await {
      warn!(error = %e, "checkpoint clear failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashMap, sync::Mutex};

  use super::*;

  struct MemoryKv {
    data: Mutex<HashMap<(String, String), String>>,
  }

  impl MemoryKv {
    fn new() -> Self {
      Self { data: Mutex::new(HashMap::new()) }
    }
  }

  #[async_trait]
  impl KvStore for MemoryKv {
    async fn get(&self, key: &str, scope: &str) -> Result<Option<String>, KvError> {
      Ok(self.data.lock().unwrap().get(&(key.to_string(), scope.to_string())).cloned())
    }

    async fn put(&self, key: &str, value: &str, scope: &str, _durability: Durability) -> Result<(), KvError> {
      self
        .data
        .lock()
        .unwrap()
        .insert((key.to_string(), scope.to_string()), value.to_string());
      Ok(())
    }

    async fn delete(&self, key: &str, scope: &str) -> Result<(), KvError> {
      self.data.lock().unwrap().remove(&(key.to_string(), scope.to_string()));
      Ok(())
    }
  }

  #[tokio::test]
  async fn save_load_roundtrip() {
    let store = CheckpointStore::new(std::sync::Arc::new(MemoryKv::new()));
    let checkpoint = Checkpoint {
      total_files: 10,
      indexed_files: 3,
      total_chunks: 20,
      embedded_chunks: 6,
      run_state: Some(RunState::Running),
      completed_file_paths: Some(vec!["a.rs".into(), "b.rs".into()]),
      ..Default::default()
    };

    store.save("key", "scope", &checkpoint).await;
    let loaded = store.load("key", "scope").await.unwrap();
    assert_eq!(loaded.total_files, 10);
    assert_eq!(loaded.indexed_files, 3);
    assert_eq!(loaded.completed_file_paths, Some(vec!["a.rs".into(), "b.rs".into()]));
  }

  #[tokio::test]
  async fn all_zero_checkpoint_is_not_persisted() {
    let store = CheckpointStore::new(std::sync::Arc::new(MemoryKv::new()));
    store.save("key", "scope", &Checkpoint::default()).await;
    assert!(store.load("key", "scope").await.is_none());
  }

  #[tokio::test]
  async fn version_1_record_decodes_with_defaults() {
    let store = CheckpointStore::new(std::sync::Arc::new(MemoryKv::new()));
    let v1 = serde_json::json!({
      "version": 1,
      "total_files": 5,
      "indexed_files": 5,
      "total_chunks": 8,
      "embedded_chunks": 8,
    });
    store
      .kv
      .put("key", &v1.to_string(), "scope", Durability::Machine)
      .await
      .unwrap();

    let loaded = store.load("key", "scope").await.unwrap();
    assert_eq!(loaded.total_files, 5);
    assert!(loaded.run_state.is_none());
    assert!(loaded.completed_file_paths.is_none());
  }

  #[tokio::test]
  async fn unknown_version_is_treated_as_absent() {
    let store = CheckpointStore::new(std::sync::Arc::new(MemoryKv::new()));
    let bogus = serde_json::json!({ "version": 99 });
    store
      .kv
      .put("key", &bogus.to_string(), "scope", Durability::Machine)
      .await
      .unwrap();
    assert!(store.load("key", "scope").await.is_none());
  }

  #[test]
  fn encoding_switches_to_hash_above_limit() {
    let mut set = BTreeSet::new();
    for i in 0..(MAX_INLINE_COMPLETED_FILES + 1) {
      set.insert(format!("file_{i}.rs"));
    }
    let (paths, hash) = encode_completed_files(&set);
    assert!(paths.is_none());
    assert!(hash.is_some());
  }

  #[test]
  fn encoding_keeps_inline_array_at_or_below_limit() {
    let mut set = BTreeSet::new();
    for i in 0..MAX_INLINE_COMPLETED_FILES {
      set.insert(format!("file_{i}.rs"));
    }
    let (paths, hash) = encode_completed_files(&set);
    assert!(paths.is_some());
    assert!(hash.is_none());
  }

  #[test]
  fn fnv1a_is_deterministic() {
    assert_eq!(fnv1a_hash("abc"), fnv1a_hash("abc"));
    assert_ne!(fnv1a_hash("abc"), fnv1a_hash("abd"));
  }
}
