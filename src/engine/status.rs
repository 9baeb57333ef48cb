//! Status Fan-out (C9)
//!
//! A per-workspace in-memory status map behind lock-free concurrent access
//! (`DashMap`, the same choice the source package makes for its project
//! router in `actor/router.rs`) plus a broadcast channel observers subscribe
//! to. Every mutation goes through [`StatusHub::publish`], the single
//! serializing point; throttling state lives alongside the status itself so
//! "publish at most every 100ms or every 10 files" is decided right where
//! the status is held.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
  Uninitialized,
  Idle,
  Building,
  Indexing,
  Ready,
  Degraded,
  Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelDownloadState {
  Idle,
  Checking,
  Downloading,
  Extracting,
  Ready,
  Error,
}

impl Default for ModelDownloadState {
  fn default() -> Self {
    Self::Idle
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
  pub total_files: u64,
  pub indexed_files: u64,
  pub total_chunks: u64,
  pub embedded_chunks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
  pub workspace: String,
  pub state: IndexState,
  pub totals: Totals,
  pub paused: bool,
  pub paused_reason: Option<String>,
  pub degraded_reason: Option<String>,
  pub error_message: Option<String>,
  pub last_full_scan_time: Option<DateTime<Utc>>,
  pub last_indexed_time: Option<DateTime<Utc>>,
  pub last_updated: DateTime<Utc>,
  pub embedding_model: Option<String>,
  pub model_download_state: ModelDownloadState,
}

impl Status {
  pub fn idle(workspace: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self {
      workspace: workspace.into(),
      state: IndexState::Idle,
      totals: Totals::default(),
      paused: false,
      paused_reason: None,
      degraded_reason: None,
      error_message: None,
      last_full_scan_time: None,
      last_indexed_time: None,
      last_updated: now,
      embedding_model: None,
      model_download_state: ModelDownloadState::Idle,
    }
  }

  pub fn uninitialized(workspace: impl Into<String>, now: DateTime<Utc>) -> Self {
    Self { state: IndexState::Uninitialized, ..Self::idle(workspace, now) }
  }
}

/// Tracks when a workspace last published, so the engine's run loop can
/// decide whether a given tick clears the throttle.
#[derive(Debug, Default)]
struct PublishThrottle {
  last_published: Option<std::time::Instant>,
  files_since_publish: u64,
}

pub const STATUS_CHANNEL_CAPACITY: usize = 256;

/// The engine's single ownership holder for workspace status: observers
/// receive copies through the fan-out channel below, never mutable aliases
/// into the map itself.
pub struct StatusHub {
  statuses: DashMap<String, Status>,
  throttles: DashMap<String, PublishThrottle>,
  sender: broadcast::Sender<Status>,
}

impl StatusHub {
  pub fn new() -> Self {
    let (sender, _receiver) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    Self { statuses: DashMap::new(), throttles: DashMap::new(), sender }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Status> {
    self.sender.subscribe()
  }

  pub fn get(&self, workspace: &str) -> Option<Status> {
    self.statuses.get(workspace).map(|s| s.clone())
  }

  /// Cache `status` without broadcasting it to observers. Used by
  /// `get_status`'s checkpoint hydration path, which is a pure read from the
  /// engine's public-API perspective and must not emit a spurious
  /// transition event.
  pub fn cache(&self, status: Status) {
    self.statuses.insert(status.workspace.clone(), status);
  }

  /// Unconditionally overwrite and broadcast `status`, ignoring throttling.
  /// Used for state transitions, which must always publish immediately.
  pub fn publish(&self, status: Status) {
    let workspace = status.workspace.clone();
    self.statuses.insert(workspace.clone(), status.clone());
    self.throttles.insert(workspace, PublishThrottle { last_published: Some(std::time::Instant::now()), files_since_publish: 0 });
    let _ = self.sender.send(status);
  }

  /// Publish `status` only if at least `interval` has elapsed since the last
  /// publish for this workspace, or at least `file_count` files have been
  /// processed since then.
  pub fn publish_throttled(&self, status: Status, interval: std::time::Duration, file_count: u64) {
    let workspace = status.workspace.clone();
    let should_publish = {
      let mut throttle = self.throttles.entry(workspace.clone()).or_default();
      throttle.files_since_publish += 1;
      let elapsed = throttle.last_published.map(|t| t.elapsed() >= interval).unwrap_or(true);
      let by_count = throttle.files_since_publish >= file_count;
      if elapsed || by_count {
        throttle.last_published = Some(std::time::Instant::now());
        throttle.files_since_publish = 0;
        true
      } else {
        false
      }
    };

    self.statuses.insert(workspace, status.clone());
    if should_publish {
      let _ = self.sender.send(status);
    }
  }

}

impl Default for StatusHub {
  fn default() -> Self {
    Self::new()
  }
}
