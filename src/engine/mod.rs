//! Indexing Engine (C7) — the state machine.
//!
//! `IndexingEngine` owns the collaborators (embedding provider, vector store,
//! checkpoint store), the shared resources it coordinates across workspaces
//! (status map, paused-workspaces set, active-operations single-flight map,
//! cooldown tracker), and exposes the full/resume/pause/cancel/refresh
//! operations as directly-callable async methods rather than message-passing
//! — the source package instead drives an `IndexerActor` over a channel
//! (`actor/indexer.rs`), but this crate's workspace count and call shape
//! don't need an actor's mailbox indirection.

pub mod run;
pub mod status;

use std::{path::PathBuf, sync::Arc, time::Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
  checkpoint::CheckpointStore, config::IndexerConfig, embedding::EmbeddingProvider, embedding::pacing::Pacer,
  vectorstore::VectorStoreClient,
};

pub use run::Diagnostics;
pub use status::{IndexState, ModelDownloadState, Status, StatusHub, Totals};

/// A workspace's identity and file-system roots, the unit every engine
/// operation is scoped to.
#[derive(Debug, Clone)]
pub struct WorkspaceRef {
  pub workspace_path: String,
  pub user_id: String,
  pub roots: Vec<PathBuf>,
}

impl WorkspaceRef {
  pub fn namespace(&self) -> String {
    crate::identity::namespace(&self.user_id, &self.workspace_path)
  }

  pub fn storage_key(&self) -> String {
    crate::identity::storage_key(&self.namespace())
  }

  /// Normalize `absolute` against whichever of this workspace's roots
  /// contains it, trying each in turn.
  pub fn relative_path(&self, absolute: &std::path::Path) -> Option<String> {
    self.roots.iter().find_map(|root| crate::identity::normalize_relative_path(root, absolute))
  }
}

/// A single-flight slot. Holding the surrounding `Mutex`'s guard for a
/// run's whole duration is what makes `try_lock` fail for concurrent
/// callers; the fields here are informational.
struct ActiveRun {
  started_at: Instant,
}

pub struct IndexingEngine {
  pub(crate) config: IndexerConfig,
  pub(crate) embedding: Arc<dyn EmbeddingProvider>,
  pub(crate) vector_store: Arc<dyn VectorStoreClient>,
  pub(crate) checkpoints: CheckpointStore,
  pub(crate) status: StatusHub,
  /// Shared across every workspace: spacing embed calls is a property of the
  /// provider's global request budget, not any one workspace's loop, since
  /// multiple workspaces may proceed in parallel.
  pub(crate) embed_pacer: Pacer,

  /// Enforces "exactly one active indexing run per workspace" (invariant 3).
  active_runs: DashMap<String, Arc<Mutex<Option<ActiveRun>>>>,
  /// Set by `pause`, cleared by `resume`; the run loop polls it.
  paused: DashMap<String, bool>,
  /// Last `build_full_index` completion time, for the cooldown between
  /// successive full builds on the same workspace.
  last_build_finished: DashMap<String, Instant>,
  /// Cancellation token for each workspace's running watcher task, so a
  /// fresh build or `delete_index` can stop a stale watcher before starting
  /// a new one (C8).
  pub(crate) watchers: DashMap<String, CancellationToken>,
  /// Chunk count last observed for `(workspace_path, relative_path)`, so a
  /// watcher-reported deletion knows how many deterministic vector ids to
  /// remove without re-chunking a file that no longer exists.
  pub(crate) file_chunk_counts: DashMap<(String, String), usize>,
  /// Whole-file content hash last indexed for `(workspace_path,
  /// relative_path)`, so a file whose content hasn't changed since its last
  /// successful index is skipped rather than re-embedded.
  pub(crate) file_content_hashes: DashMap<(String, String), String>,
  /// Cancellation token for `workspace_path`'s currently running
  /// `build_full_index`, if any. Kept separate from `active_runs` so a
  /// caller can request cancellation without contending on the single-flight
  /// lock the run loop holds for its whole duration.
  active_cancel: DashMap<String, CancellationToken>,
}

impl IndexingEngine {
  pub fn new(
    config: IndexerConfig,
    embedding: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreClient>,
    checkpoints: CheckpointStore,
  ) -> Self {
    Self {
      config,
      embedding,
      vector_store,
      checkpoints,
      status: StatusHub::new(),
      embed_pacer: Pacer::new(),
      active_runs: DashMap::new(),
      paused: DashMap::new(),
      last_build_finished: DashMap::new(),
      watchers: DashMap::new(),
      file_chunk_counts: DashMap::new(),
      file_content_hashes: DashMap::new(),
      active_cancel: DashMap::new(),
    }
  }

  pub fn status_hub(&self) -> &StatusHub {
    &self.status
  }

  pub fn config(&self) -> &IndexerConfig {
    &self.config
  }

  pub fn is_paused(&self, workspace_path: &str) -> bool {
    self.paused.get(workspace_path).map(|v| *v).unwrap_or(false)
  }

  fn run_slot(&self, workspace_path: &str) -> Arc<Mutex<Option<ActiveRun>>> {
    self.active_runs.entry(workspace_path.to_string()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
  }

  /// Stop a previously spawned watcher for `workspace_path`, if any.
  pub(crate) fn stop_watcher(&self, workspace_path: &str) {
    if let Some((_, cancel)) = self.watchers.remove(workspace_path) {
      cancel.cancel();
    }
  }

  /// Request cancellation of `workspace_path`'s in-flight `build_full_index`
  /// run, if any. Cooperative: honored at the next file or embedding-batch
  /// boundary, not pre-emptively.
  pub fn cancel_active_run(&self, workspace_path: &str) {
    if let Some(cancel) = self.active_cancel.get(workspace_path) {
      cancel.cancel();
    }
  }

  pub(crate) fn track_active_cancel(&self, workspace_path: &str, cancel: CancellationToken) {
    self.active_cancel.insert(workspace_path.to_string(), cancel);
  }

  pub(crate) fn untrack_active_cancel(&self, workspace_path: &str) {
    self.active_cancel.remove(workspace_path);
  }
}
