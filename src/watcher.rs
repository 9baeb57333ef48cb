//! Watcher (C8)
//!
//! Subscribes to recursive file-system change notifications for a
//! workspace's roots, debounces them into a single flush window, and
//! partitions the settled set into added/changed/deleted before re-entering
//! the engine via `refresh_paths`/`delete_paths`. Debounce/coalescing is
//! ported near-verbatim from the source package's `actor/watcher.rs`
//! (`ChangeKind`, `PendingChange::update`), re-targeted at this crate's
//! directly-callable engine instead of building `IndexJob` messages for a
//! separate actor; the gitignore matcher and incremental-parse content
//! cache it also carries are dropped, since this crate's chunker has
//! nothing to reuse them for.

use std::{
  collections::HashMap,
  path::PathBuf,
  sync::Arc,
  time::{Duration, Instant},
};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::engine::{IndexingEngine, WorkspaceRef};

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("failed to initialize file watcher: {0}")]
  Init(#[source] notify::Error),
  #[error("failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

/// The kind of pending change accumulated for one path during the debounce
/// window; the settled set partitions into added, changed, and deleted.
#[derive(Debug, Clone)]
enum ChangeKind {
  Added,
  Changed,
  Deleted,
  /// A coalesced notify rename-from + rename-to pair, handled as a delete
  /// of `from` plus a refresh of the new path.
  Renamed { from: PathBuf },
}

#[derive(Debug)]
struct PendingChange {
  kind: ChangeKind,
  last_event: Instant,
}

impl PendingChange {
  fn new(kind: ChangeKind) -> Self {
    Self { kind, last_event: Instant::now() }
  }

  fn update(&mut self, kind: ChangeKind) {
    self.last_event = Instant::now();
    match (&self.kind, &kind) {
      (ChangeKind::Added, ChangeKind::Changed) => trace!("coalescing added+changed -> added"),
      (ChangeKind::Deleted, ChangeKind::Added) => self.kind = ChangeKind::Changed,
      (ChangeKind::Added, ChangeKind::Deleted) => self.kind = ChangeKind::Deleted,
      (ChangeKind::Renamed { .. }, ChangeKind::Changed) => trace!("coalescing renamed+changed -> renamed"),
      _ => self.kind = kind,
    }
  }
}

/// A running watcher task for one workspace. Dropping or cancelling `cancel`
/// stops it.
pub struct WatcherHandle {
  pub cancel: CancellationToken,
  pub join: tokio::task::JoinHandle<()>,
}

/// Spawn a debounced watcher over `workspace`'s roots that feeds changes
/// back into `engine`. Started once a workspace's build reaches `Ready`.
pub fn spawn(engine: Arc<IndexingEngine>, workspace: WorkspaceRef, parent_cancel: CancellationToken) -> Result<WatcherHandle, WatcherError> {
  let cancel = parent_cancel.child_token();
  let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

  let notify_config = Config::default().with_poll_interval(Duration::from_secs(2));
  let mut notify_watcher = RecommendedWatcher::new(
    move |res| {
      let _ = event_tx.blocking_send(res);
    },
    notify_config,
  )
  .map_err(WatcherError::Init)?;

  for root in &workspace.roots {
    notify_watcher.watch(root, RecursiveMode::Recursive).map_err(WatcherError::Watch)?;
  }

  let debounce = Duration::from_millis(300);
  let task_cancel = cancel.clone();
  let join = tokio::spawn(async move {
    run(engine, workspace, notify_watcher, event_rx, debounce, task_cancel).await;
  });

  Ok(WatcherHandle { cancel, join })
}

async fn run(
  engine: Arc<IndexingEngine>,
  workspace: WorkspaceRef,
  _notify_watcher: RecommendedWatcher,
  mut event_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  debounce: Duration,
  cancel: CancellationToken,
) {
  info!(workspace = %workspace.workspace_path, "watcher started");
  let mut pending: HashMap<PathBuf, PendingChange> = HashMap::new();
  let mut debounce_interval = tokio::time::interval(debounce);
  debounce_interval.tick().await;

  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        info!(workspace = %workspace.workspace_path, "watcher shutting down (cancelled)");
        break;
      }

      event = event_rx.recv() => {
        match event {
          Some(Ok(event)) => process_event(&mut pending, event),
          Some(Err(e)) => warn!(error = %e, "watcher notify error"),
          None => {
            info!(workspace = %workspace.workspace_path, "watcher shutting down (channel closed)");
            break;
          }
        }
      }

      _ = debounce_interval.tick() => {
        flush(&engine, &workspace, &mut pending, &cancel).await;
      }
    }
  }

  if !pending.is_empty() {
    flush(&engine, &workspace, &mut pending, &cancel).await;
  }
  info!(workspace = %workspace.workspace_path, "watcher stopped");
}

fn process_event(pending: &mut HashMap<PathBuf, PendingChange>, event: Event) {
  if let EventKind::Modify(notify::event::ModifyKind::Name(notify::event::RenameMode::Both)) = &event.kind
    && let [from, to] = &event.paths[..]
  {
    if !to.is_dir() {
      pending.remove(from);
      pending.insert(to.clone(), PendingChange::new(ChangeKind::Renamed { from: from.clone() }));
    }
    return;
  }

  let Some(kind) = classify(&event.kind) else { return };

  for path in &event.paths {
    if path.is_dir() {
      continue;
    }
    match pending.get_mut(path) {
      Some(existing) => existing.update(kind.clone()),
      None => {
        pending.insert(path.clone(), PendingChange::new(kind.clone()));
      }
    }
  }
}

fn classify(kind: &EventKind) -> Option<ChangeKind> {
  use notify::event::RenameMode;
  Some(match kind {
    EventKind::Create(_) => ChangeKind::Added,
    EventKind::Modify(notify::event::ModifyKind::Name(rename_mode)) => match rename_mode {
      RenameMode::From => ChangeKind::Deleted,
      RenameMode::To | RenameMode::Both | RenameMode::Any | RenameMode::Other => ChangeKind::Changed,
    },
    EventKind::Modify(_) => ChangeKind::Changed,
    EventKind::Remove(_) => ChangeKind::Deleted,
    EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
  })
}

/// Flush settled changes into the engine. While the workspace is paused the
/// batch keeps accumulating but nothing is dispatched.
async fn flush(
  engine: &Arc<IndexingEngine>,
  workspace: &WorkspaceRef,
  pending: &mut HashMap<PathBuf, PendingChange>,
  cancel: &CancellationToken,
) {
  if pending.is_empty() || engine.is_paused(&workspace.workspace_path) {
    return;
  }

  let settled: HashMap<PathBuf, PendingChange> = pending.drain().collect();
  let mut refresh_paths = Vec::new();
  let mut deleted_relative_paths = Vec::new();

  for (path, change) in settled {
    match change.kind {
      ChangeKind::Added | ChangeKind::Changed => refresh_paths.push(path),
      ChangeKind::Deleted => {
        if let Some(relative_path) = workspace.relative_path(&path) {
          deleted_relative_paths.push(relative_path);
        }
      }
      ChangeKind::Renamed { from } => {
        if let Some(relative_path) = workspace.relative_path(&from) {
          deleted_relative_paths.push(relative_path);
        }
        refresh_paths.push(path);
      }
    }
  }

  if !deleted_relative_paths.is_empty() {
    debug!(workspace = %workspace.workspace_path, count = deleted_relative_paths.len(), "deleting vectors for removed files");
    engine.delete_paths(workspace, &deleted_relative_paths).await;
  }

  if !refresh_paths.is_empty() {
    debug!(workspace = %workspace.workspace_path, count = refresh_paths.len(), "refreshing changed files");
    engine.refresh_paths(workspace, refresh_paths, cancel.clone()).await;
  }
}
