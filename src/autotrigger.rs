//! Auto-Trigger (C10)
//!
//! Schedules at most one automatic `build_full_index` run per workspace,
//! on workspace open, a workspace-folders-added event, or a configuration
//! change that enables indexing. The grace-period wait and the scheduler
//! shape follow the source package's `actor/scheduler.rs`
//! (`tokio::select!`/`CancellationToken` background loop), narrowed to the
//! single "has this workspace already been auto-triggered" flag this
//! component needs instead of a multi-timer daemon scheduler.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{IndexState, IndexingEngine, WorkspaceRef};

/// The events that can request an auto-triggered build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
  WorkspaceOpened,
  WorkspaceFoldersAdded,
  ConfigurationEnabledIndexing,
}

/// Tracks the "already-triggered" flag per workspace so a burst of events
/// (e.g. construction followed immediately by a config change) schedules at
/// most one run.
pub struct AutoTrigger {
  engine: Arc<IndexingEngine>,
  triggered: DashMap<String, bool>,
  grace: std::time::Duration,
}

impl AutoTrigger {
  pub fn new(engine: Arc<IndexingEngine>) -> Self {
    let grace = engine.config().autotrigger_grace();
    Self { engine, triggered: DashMap::new(), grace }
  }

  /// Request an auto-triggered build for `workspace`. Spawns a background
  /// task that waits out the grace period, re-checks eligibility, and calls
  /// `build_full_index` if still warranted. Returns immediately.
  pub fn request(self: &Arc<Self>, workspace: WorkspaceRef, reason: TriggerReason, cancel: CancellationToken) {
    if self.triggered.get(&workspace.workspace_path).map(|v| *v).unwrap_or(false) {
      debug!(workspace = %workspace.workspace_path, ?reason, "auto-trigger already scheduled, ignoring");
      return;
    }
    self.triggered.insert(workspace.workspace_path.clone(), true);

    let this = Arc::clone(self);
    tokio::spawn(async move {
      this.run_after_grace(workspace, reason, cancel).await;
    });
  }

  /// Clear the "already-triggered" flag, e.g. on a workspace-folders change
  /// that should allow a fresh auto-trigger cycle.
  pub fn reset(&self, workspace_path: &str) {
    self.triggered.remove(workspace_path);
  }

  async fn run_after_grace(&self, workspace: WorkspaceRef, reason: TriggerReason, cancel: CancellationToken) {
    tokio::select! {
      _ = tokio::time::sleep(self.grace) => {}
      _ = cancel.cancelled() => {
        self.reset(&workspace.workspace_path);
        return;
      }
    }

    let status = self.engine.get_status(&workspace).await;
    let eligible = matches!(status.state, IndexState::Idle | IndexState::Uninitialized) || status.last_full_scan_time.is_none();

    if !eligible {
      debug!(workspace = %workspace.workspace_path, ?reason, state = ?status.state, "auto-trigger skipped, workspace not eligible");
      return;
    }

    info!(workspace = %workspace.workspace_path, ?reason, "auto-triggering build_full_index");
    if let Err(e) = self.engine.build_full_index(&workspace, cancel.clone()).await {
      tracing::warn!(workspace = %workspace.workspace_path, error = %e, "auto-triggered build failed, allowing a future retry");
      self.reset(&workspace.workspace_path);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::{
    checkpoint::CheckpointStore,
    config::IndexerConfig,
    testing::{InMemoryKvStore, InMemoryVectorStore, MockEmbeddingProvider},
  };

  fn harness() -> (Arc<AutoTrigger>, Arc<IndexingEngine>, Arc<MockEmbeddingProvider>, tempfile::TempDir, WorkspaceRef) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.rs"), "fn f() {}\n").unwrap();

    let config = IndexerConfig { autotrigger_grace_secs: 0, cooldown_secs: 0, ..Default::default() };
    let embedding = Arc::new(MockEmbeddingProvider::new(8));
    let vector_store = Arc::new(InMemoryVectorStore::new());
    let kv = Arc::new(InMemoryKvStore::new());
    let checkpoints = CheckpointStore::new(kv);
    let engine = Arc::new(IndexingEngine::new(config, embedding.clone(), vector_store, checkpoints));
    let workspace = WorkspaceRef {
      workspace_path: dir.path().to_string_lossy().to_string(),
      user_id: "test-user".to_string(),
      roots: vec![dir.path().to_path_buf()],
    };
    let trigger = Arc::new(AutoTrigger::new(engine.clone()));
    (trigger, engine, embedding, dir, workspace)
  }

  async fn wait_until_ready(engine: &IndexingEngine, workspace: &WorkspaceRef) {
    for _ in 0..200 {
      if engine.get_status(workspace).await.state == IndexState::Ready {
        return;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  #[tokio::test]
  async fn runs_build_once_for_an_idle_workspace() {
    let (trigger, engine, embedding, _dir, workspace) = harness();

    trigger.request(workspace.clone(), TriggerReason::WorkspaceOpened, CancellationToken::new());
    wait_until_ready(&engine, &workspace).await;

    assert_eq!(embedding.call_count.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn duplicate_request_is_ignored_while_already_scheduled() {
    let (trigger, engine, embedding, _dir, workspace) = harness();

    trigger.request(workspace.clone(), TriggerReason::WorkspaceOpened, CancellationToken::new());
    trigger.request(workspace.clone(), TriggerReason::WorkspaceOpened, CancellationToken::new());
    wait_until_ready(&engine, &workspace).await;

    assert_eq!(embedding.call_count.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn cancelling_during_grace_resets_the_triggered_flag_and_skips_the_build() {
    let (_trigger, engine, embedding, _dir, workspace) = harness();
    let cancel = CancellationToken::new();

    // A long grace period so the cancellation always lands first.
    let long_grace = Arc::new(AutoTrigger { engine: engine.clone(), triggered: DashMap::new(), grace: Duration::from_secs(3600) });
    long_grace.request(workspace.clone(), TriggerReason::WorkspaceOpened, cancel.clone());
    cancel.cancel();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(embedding.call_count.load(std::sync::atomic::Ordering::SeqCst), 0);

    assert!(!long_grace.triggered.get(&workspace.workspace_path).map(|v| *v).unwrap_or(false));
  }

  #[tokio::test]
  async fn reset_allows_a_fresh_trigger_but_a_ready_workspace_stays_ineligible() {
    let (trigger, engine, embedding, _dir, workspace) = harness();

    trigger.request(workspace.clone(), TriggerReason::WorkspaceOpened, CancellationToken::new());
    wait_until_ready(&engine, &workspace).await;
    assert_eq!(embedding.call_count.load(std::sync::atomic::Ordering::SeqCst), 1);

    trigger.reset(&workspace.workspace_path);
    trigger.request(workspace.clone(), TriggerReason::WorkspaceOpened, CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The workspace is already `Ready` with a scan time set, so the
    // re-check after the grace period finds it ineligible.
    assert_eq!(embedding.call_count.load(std::sync::atomic::Ordering::SeqCst), 1);
  }
}
