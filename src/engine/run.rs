//! `build_full_index` / `index_file` / `refresh_paths` / `delete_index` and
//! friends — the indexing engine's state-machine operations, plus
//! `get_status` and `get_diagnostics`.
//!
//! Single-flight is implemented by holding a per-workspace `tokio::sync::Mutex`
//! for the whole duration of a run: a concurrent caller's `try_lock` fails,
//! and instead of starting a second walk it subscribes to the status
//! broadcast and waits for this run's terminal status.

use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActiveRun, IndexingEngine, WorkspaceRef};
use crate::{
  checkpoint::{Checkpoint, RunState, encode_completed_files},
  chunker::{chunk_file, language_id_for_extension},
  embedding::EmbeddingMode,
  engine::status::{IndexState, Status, Totals},
  error::{EngineError, FileIndexError},
  identity::{sha256_hex, vector_id},
  vectorstore::{VectorMetadata, VectorRecord},
  walker::{FileEntry, walk_workspace},
  watcher,
};

/// Outcome of `get_diagnostics`.
#[derive(Debug, Clone)]
pub struct Diagnostics {
  pub status: Status,
  pub namespace: String,
  pub pinecone_vector_count: u64,
  pub pinecone_connected: bool,
  pub checkpoint_run_id: Option<i64>,
  pub checkpoint_run_state: Option<RunState>,
  pub checkpoint_files_count: usize,
  pub sample_query_hit_count: usize,
}

/// Why the per-file loop stopped iterating, decided at every file and
/// pause-poll boundary (cancellation and pause are both cooperative).
enum LoopExit {
  /// Every remaining file was attempted.
  Exhausted,
  /// `cancel` fired, either between files or while waiting out a pause.
  Cancelled,
}

impl IndexingEngine {
  /// Build or resume a full index for `workspace`.
  ///
  /// Returns `Err(EngineError::WorkspaceNotFound)` only for the programmer-
  /// contract violation of calling this with zero roots; every other
  /// outcome (disabled, cooldown, cancelled, degraded, error) is reported
  /// through the returned `Status`, never as an `Err`.
  pub async fn build_full_index(
    self: &Arc<Self>,
    workspace: &WorkspaceRef,
    cancel: CancellationToken,
  ) -> Result<Status, EngineError> {
    if !self.config.enable_indexing {
      return Ok(self.get_status(workspace).await);
    }
    if workspace.roots.is_empty() {
      return Err(EngineError::WorkspaceNotFound(workspace.workspace_path.clone()));
    }

    if let Some(last) = self.last_build_finished.get(&workspace.workspace_path)
      && last.elapsed() < self.config.cooldown()
    {
      debug!(workspace = %workspace.workspace_path, "build_full_index inside cooldown, returning snapshot");
      return Ok(self.get_status(workspace).await);
    }

    let slot = self.run_slot(&workspace.workspace_path);
    let mut guard = match slot.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        info!(workspace = %workspace.workspace_path, "build_full_index already in flight, awaiting its result");
        return Ok(self.await_in_flight(workspace).await);
      }
    };

    *guard = Some(ActiveRun { started_at: std::time::Instant::now() });
    self.track_active_cancel(&workspace.workspace_path, cancel.clone());

    let status = self.run_build(workspace, &cancel).await;

    *guard = None;
    drop(guard);
    self.untrack_active_cancel(&workspace.workspace_path);
    self.last_build_finished.insert(workspace.workspace_path.clone(), std::time::Instant::now());

    Ok(status)
  }

  async fn await_in_flight(&self, workspace: &WorkspaceRef) -> Status {
    let mut rx = self.status.subscribe();
    loop {
      match rx.recv().await {
        Ok(status)
          if status.workspace == workspace.workspace_path
            && matches!(status.state, IndexState::Ready | IndexState::Degraded | IndexState::Error) =>
        {
          return status;
        }
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => {
          return self
            .status
            .get(&workspace.workspace_path)
            .unwrap_or_else(|| Status::idle(workspace.workspace_path.clone(), Utc::now()));
        }
      }
    }
  }

  async fn run_build(self: &Arc<Self>, workspace: &WorkspaceRef, cancel: &CancellationToken) -> Status {
    let namespace = workspace.namespace();
    let storage_key = workspace.storage_key();
    let run_id = Utc::now().timestamp_millis();

    let checkpoint = self.checkpoints.load(&storage_key, &workspace.workspace_path).await;
    let resumable = checkpoint.as_ref().is_some_and(Checkpoint::is_resumable);

    if !resumable {
      // A fresh rebuild supersedes whatever the previous run's watcher was
      // tracking; stop it before the walk starts so it can't race a
      // concurrent `refresh_paths` against this run's own file processing.
      self.stop_watcher(&workspace.workspace_path);
      if let Err(e) = self.vector_store.delete_namespace(&namespace).await {
        warn!(error = %e, workspace = %workspace.workspace_path, "fresh-run namespace delete failed, continuing");
      }
    }

    self.status.publish(Status {
      state: IndexState::Building,
      last_updated: Utc::now(),
      ..Status::idle(workspace.workspace_path.clone(), Utc::now())
    });

    let walked = walk_workspace(&workspace.roots, &self.config);
    let total_files = walked.len() as u64;

    let mut completed_files: BTreeSet<String> = BTreeSet::new();
    let (mut total_chunks, mut embedded_chunks) = (0u64, 0u64);
    if resumable && let Some(cp) = checkpoint.as_ref() {
      let on_disk: std::collections::HashSet<&str> = walked.iter().map(|f| f.relative_path.as_str()).collect();
      if let Some(paths) = cp.completed_file_paths.as_ref() {
        completed_files.extend(paths.iter().filter(|p| on_disk.contains(p.as_str())).cloned());
      }
      total_chunks = cp.total_chunks;
      embedded_chunks = cp.embedded_chunks;
    }

    let remaining: Vec<FileEntry> = walked.into_iter().filter(|f| !completed_files.contains(&f.relative_path)).collect();

    self.status.publish(Status {
      state: IndexState::Indexing,
      totals: Totals {
        total_files,
        indexed_files: completed_files.len() as u64,
        total_chunks,
        embedded_chunks,
      },
      last_updated: Utc::now(),
      ..Status::idle(workspace.workspace_path.clone(), Utc::now())
    });

    let mut file_errors: Vec<FileIndexError> = Vec::new();
    let mut last_status_publish = std::time::Instant::now();
    let mut files_since_publish = 0u64;
    let mut last_checkpoint_write = std::time::Instant::now();
    let mut files_since_checkpoint = 0u64;
    // Position within `remaining` (not `completed_files.len()`, which also
    // counts files resumed from a prior run's checkpoint and is therefore
    // not aligned with this loop's own attempt count).
    let mut attempt_idx = 0usize;

    let exit = 'outer: loop {
      let Some(file) = remaining.get(attempt_idx) else {
        break 'outer LoopExit::Exhausted;
      };

      while self.is_paused(&workspace.workspace_path) {
        let paused_checkpoint = self.make_checkpoint(
          total_files,
          completed_files.len() as u64,
          total_chunks,
          embedded_chunks,
          run_id,
          RunState::Paused,
          &completed_files,
        );
        self.checkpoints.save(&storage_key, &workspace.workspace_path, &paused_checkpoint).await;
        self.publish_paused(workspace, total_files, completed_files.len() as u64, total_chunks, embedded_chunks);

        if cancel.is_cancelled() {
          break 'outer LoopExit::Cancelled;
        }
        tokio::time::sleep(self.config.pause_poll_interval()).await;
      }

      if cancel.is_cancelled() {
        break 'outer LoopExit::Cancelled;
      }

      match self.index_file(workspace, file, &namespace, cancel).await {
        Ok(chunk_count) => {
          completed_files.insert(file.relative_path.clone());
          total_chunks += chunk_count as u64;
          embedded_chunks += chunk_count as u64;
        }
        Err(EngineError::Cancelled) => break 'outer LoopExit::Cancelled,
        Err(e) => {
          warn!(file = %file.relative_path, error = %e, "file indexing failed, will resume this file next run");
          file_errors.push(FileIndexError { relative_path: file.relative_path.clone(), message: e.to_string() });
        }
      }
      attempt_idx += 1;

      files_since_publish += 1;
      if last_status_publish.elapsed() >= self.config.status_publish_interval()
        || files_since_publish >= self.config.status_publish_file_count
      {
        self.status.publish_throttled(
          Status {
            state: IndexState::Indexing,
            totals: Totals {
              total_files,
              indexed_files: completed_files.len() as u64,
              total_chunks,
              embedded_chunks,
            },
            last_updated: Utc::now(),
            ..Status::idle(workspace.workspace_path.clone(), Utc::now())
          },
          self.config.status_publish_interval(),
          self.config.status_publish_file_count,
        );
        last_status_publish = std::time::Instant::now();
        files_since_publish = 0;
      }

      files_since_checkpoint += 1;
      if last_checkpoint_write.elapsed() >= self.config.checkpoint_write_interval()
        || files_since_checkpoint >= self.config.checkpoint_write_file_count
      {
        let running_checkpoint = self.make_checkpoint(
          total_files,
          completed_files.len() as u64,
          total_chunks,
          embedded_chunks,
          run_id,
          RunState::Running,
          &completed_files,
        );
        self.checkpoints.save(&storage_key, &workspace.workspace_path, &running_checkpoint).await;
        last_checkpoint_write = std::time::Instant::now();
        files_since_checkpoint = 0;
      }

      tokio::time::sleep(self.config.inter_file_pacing()).await;
    };

    let still_paused = self.is_paused(&workspace.workspace_path);
    let indexed_files = completed_files.len() as u64;
    let now = Utc::now();

    if still_paused {
      let checkpoint =
        self.make_checkpoint(total_files, indexed_files, total_chunks, embedded_chunks, run_id, RunState::Paused, &completed_files);
      self.checkpoints.save(&storage_key, &workspace.workspace_path, &checkpoint).await;
      let status = Status {
        state: IndexState::Indexing,
        paused: true,
        totals: Totals { total_files, indexed_files, total_chunks, embedded_chunks },
        last_updated: now,
        ..Status::idle(workspace.workspace_path.clone(), now)
      };
      self.status.publish(status.clone());
      return status;
    }

    if matches!(exit, LoopExit::Cancelled) || indexed_files < total_files {
      let checkpoint = self.make_checkpoint(
        total_files,
        indexed_files,
        total_chunks,
        embedded_chunks,
        run_id,
        RunState::Interrupted,
        &completed_files,
      );
      self.checkpoints.save(&storage_key, &workspace.workspace_path, &checkpoint).await;
      let reason = format!(
        "Indexing interrupted after {indexed_files}/{total_files} files ({} failed); re-run to resume.",
        file_errors.len()
      );
      let status = Status {
        state: IndexState::Degraded,
        degraded_reason: Some(reason),
        totals: Totals { total_files, indexed_files, total_chunks, embedded_chunks },
        last_updated: now,
        ..Status::idle(workspace.workspace_path.clone(), now)
      };
      self.status.publish(status.clone());
      return status;
    }

    // Complete: `completed_file_paths` is dropped rather than persisted,
    // since nothing reads it once `run_state = complete` (see DESIGN.md).
    let checkpoint = Checkpoint {
      total_files,
      indexed_files,
      total_chunks,
      embedded_chunks,
      last_full_scan_time: Some(now),
      last_indexed_time: Some(now),
      last_updated: Some(now),
      run_id: Some(run_id),
      run_state: Some(RunState::Complete),
      completed_file_paths: None,
      completed_file_set_hash: None,
    };
    self.checkpoints.save(&storage_key, &workspace.workspace_path, &checkpoint).await;

    match self.vector_store.stats(&namespace).await {
      Ok(stats) if stats.vector_count != total_chunks => {
        warn!(
          workspace = %workspace.workspace_path,
          expected = total_chunks,
          reported = stats.vector_count,
          "vector store reports a different chunk count than indexed; proceeding as Ready"
        );
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "post-index stats call failed, skipping validation"),
    }

    let status = Status {
      state: IndexState::Ready,
      totals: Totals { total_files, indexed_files, total_chunks, embedded_chunks },
      last_full_scan_time: Some(now),
      last_indexed_time: Some(now),
      last_updated: now,
      ..Status::idle(workspace.workspace_path.clone(), now)
    };
    self.status.publish(status.clone());

    self.stop_watcher(&workspace.workspace_path);
    match watcher::spawn(self.clone(), workspace.clone(), CancellationToken::new()) {
      Ok(handle) => {
        self.watchers.insert(workspace.workspace_path.clone(), handle.cancel);
      }
      Err(e) => warn!(error = %e, workspace = %workspace.workspace_path, "failed to start watcher after reaching Ready"),
    }

    status
  }

  fn publish_paused(&self, workspace: &WorkspaceRef, total_files: u64, indexed_files: u64, total_chunks: u64, embedded_chunks: u64) {
    self.status.publish(Status {
      state: IndexState::Indexing,
      paused: true,
      totals: Totals { total_files, indexed_files, total_chunks, embedded_chunks },
      last_updated: Utc::now(),
      ..Status::idle(workspace.workspace_path.clone(), Utc::now())
    });
  }

  #[allow(clippy::too_many_arguments)]
  fn make_checkpoint(
    &self,
    total_files: u64,
    indexed_files: u64,
    total_chunks: u64,
    embedded_chunks: u64,
    run_id: i64,
    run_state: RunState,
    completed_files: &BTreeSet<String>,
  ) -> Checkpoint {
    let (completed_file_paths, completed_file_set_hash) = encode_completed_files(completed_files);
    Checkpoint {
      total_files,
      indexed_files,
      total_chunks,
      embedded_chunks,
      last_full_scan_time: None,
      last_indexed_time: None,
      last_updated: Some(Utc::now()),
      run_id: Some(run_id),
      run_state: Some(run_state),
      completed_file_paths,
      completed_file_set_hash,
    }
  }

  /// Chunk, embed, and upsert one file.
  ///
  /// Fails atomically: on any error nothing about this file is recorded (no
  /// counters, no `completed_files` entry), so a future resume retries it
  /// from scratch.
  pub async fn index_file(
    &self,
    workspace: &WorkspaceRef,
    file: &FileEntry,
    namespace: &str,
    cancel: &CancellationToken,
  ) -> Result<usize, EngineError> {
    let text = tokio::fs::read_to_string(&file.absolute_path).await?;

    let content_key = (workspace.workspace_path.clone(), file.relative_path.clone());
    let content_hash = sha256_hex(&text);
    if self.file_content_hashes.get(&content_key).is_some_and(|h| *h == content_hash) {
      debug!(file = %file.relative_path, "content unchanged since last index, skipping re-embedding");
      return Ok(self.file_chunk_counts.get(&content_key).map(|c| *c).unwrap_or(0));
    }

    let language_id = file
      .absolute_path
      .extension()
      .and_then(|ext| ext.to_str())
      .and_then(language_id_for_extension);

    let chunks = chunk_file(&workspace.workspace_path, &file.relative_path, language_id, &text, self.config.chunk_size_lines);

    let mut records = Vec::with_capacity(chunks.len());
    let batch_size = self.config.embedding_batch_size.max(1);

    for batch in chunks.chunks(batch_size) {
      if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
      }
      // Paced against the pacer's own last-call timestamp, not a per-file
      // counter, since `embed_pacer` is shared across every file and every
      // workspace (see its doc comment in `engine/mod.rs`); the pacer
      // already no-ops correctly on the very first call ever made.
      self.embed_pacer.wait(self.config.embed_pacing()).await;

      let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
      let vectors = self.embedding.embed_batch(&texts, EmbeddingMode::Document).await?;

      for (chunk, vector) in batch.iter().zip(vectors) {
        records.push(VectorRecord {
          id: chunk.id.clone(),
          values: vector,
          metadata: VectorMetadata {
            user_id: workspace.user_id.clone(),
            workspace_id: namespace.to_string(),
            workspace_path: workspace.workspace_path.clone(),
            file_path: chunk.file_relative_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            language_id: chunk.language_id.clone(),
            content_preview: VectorMetadata::preview(&chunk.content),
            indexed_at: Utc::now(),
          },
        });
      }
    }

    if !records.is_empty() {
      self.vector_store.upsert(namespace, records).await?;
    }

    self.file_chunk_counts.insert(content_key.clone(), chunks.len());
    self.file_content_hashes.insert(content_key, content_hash);

    Ok(chunks.len())
  }

  /// Re-index a specific set of changed/added paths, fed by the watcher's
  /// added-or-changed partition of a debounced batch.
  pub async fn refresh_paths(&self, workspace: &WorkspaceRef, paths: Vec<PathBuf>, cancel: CancellationToken) -> Status {
    if !self.config.enable_indexing {
      return self.get_status(workspace).await;
    }

    let namespace = workspace.namespace();
    let mut current = self.status.get(&workspace.workspace_path).unwrap_or_else(|| Status::idle(workspace.workspace_path.clone(), Utc::now()));
    current.state = IndexState::Indexing;
    current.last_updated = Utc::now();
    self.status.publish(current.clone());

    for path in paths {
      if cancel.is_cancelled() {
        break;
      }
      let Some(relative_path) = workspace.relative_path(&path) else { continue };
      let content_key = (workspace.workspace_path.clone(), relative_path.clone());
      let previously_indexed = self.file_chunk_counts.contains_key(&content_key);
      let previous_chunk_count = self.file_chunk_counts.get(&content_key).map(|c| *c).unwrap_or(0) as u64;
      let entry = FileEntry { relative_path, absolute_path: path };

      match self.index_file(workspace, &entry, &namespace, &cancel).await {
        Ok(chunk_count) => {
          let chunk_count = chunk_count as u64;
          if !previously_indexed {
            current.totals.indexed_files = current.totals.indexed_files.saturating_add(1);
            current.totals.total_files = current.totals.total_files.saturating_add(1);
          }
          if chunk_count >= previous_chunk_count {
            let added = chunk_count - previous_chunk_count;
            current.totals.total_chunks = current.totals.total_chunks.saturating_add(added);
            current.totals.embedded_chunks = current.totals.embedded_chunks.saturating_add(added);
          } else {
            let removed = previous_chunk_count - chunk_count;
            current.totals.total_chunks = current.totals.total_chunks.saturating_sub(removed);
            current.totals.embedded_chunks = current.totals.embedded_chunks.saturating_sub(removed);
          }
        }
        Err(e) => warn!(file = %entry.relative_path, error = %e, "refresh of changed file failed"),
      }
    }

    current.state = IndexState::Ready;
    current.last_indexed_time = Some(Utc::now());
    current.last_updated = Utc::now();
    self.status.publish(current.clone());

    let storage_key = workspace.storage_key();
    let checkpoint = self.make_checkpoint(
      current.totals.total_files,
      current.totals.indexed_files,
      current.totals.total_chunks,
      current.totals.embedded_chunks,
      Utc::now().timestamp_millis(),
      RunState::Complete,
      &BTreeSet::new(),
    );
    self.checkpoints.save(&storage_key, &workspace.workspace_path, &checkpoint).await;

    current
  }

  /// Delete vectors for files the watcher reported as removed, via per-id
  /// delete against the deterministic `vector_id` scheme.
  pub async fn delete_paths(&self, workspace: &WorkspaceRef, relative_paths: &[String]) {
    let namespace = workspace.namespace();
    for relative_path in relative_paths {
      let key = (workspace.workspace_path.clone(), relative_path.clone());
      self.file_content_hashes.remove(&key);
      let Some((_, chunk_count)) = self.file_chunk_counts.remove(&key) else {
        continue;
      };
      if chunk_count == 0 {
        continue;
      }
      let ids: Vec<String> =
        (0..chunk_count).map(|ordinal| vector_id(&workspace.workspace_path, relative_path, ordinal)).collect();
      if let Err(e) = self.vector_store.delete_ids(&namespace, &ids).await {
        warn!(error = %e, relative_path, "failed to delete vectors for removed file");
      }
    }
  }

  /// Purge a workspace's index entirely.
  pub async fn delete_index(&self, workspace: &WorkspaceRef) {
    let namespace = workspace.namespace();
    if let Err(e) = self.vector_store.delete_namespace(&namespace).await {
      warn!(error = %e, workspace = %workspace.workspace_path, "delete_namespace failed during delete_index");
    }
    self.stop_watcher(&workspace.workspace_path);
    self.checkpoints.clear(&workspace.storage_key(), &workspace.workspace_path).await;
    self.paused.insert(workspace.workspace_path.clone(), false);
    self.file_chunk_counts.retain(|(ws, _), _| ws != &workspace.workspace_path);
    self.file_content_hashes.retain(|(ws, _), _| ws != &workspace.workspace_path);
    self.status.publish(Status::idle(workspace.workspace_path.clone(), Utc::now()));
  }

  /// Set the pause flag for `workspace_path`.
  pub fn pause(&self, workspace_path: &str, reason: Option<String>) {
    self.paused.insert(workspace_path.to_string(), true);
    if let Some(mut status) = self.status.get(workspace_path) {
      status.paused = true;
      status.paused_reason = reason;
      status.last_updated = Utc::now();
      self.status.publish(status);
    }
  }

  /// Clear the pause flag for `workspace_path`.
  pub fn resume(&self, workspace_path: &str) {
    self.paused.insert(workspace_path.to_string(), false);
    if let Some(mut status) = self.status.get(workspace_path) {
      status.paused = false;
      status.paused_reason = None;
      status.last_updated = Utc::now();
      self.status.publish(status);
    }
  }

  /// Pure read, hydrating from the checkpoint store when no in-memory
  /// status exists yet.
  pub async fn get_status(&self, workspace: &WorkspaceRef) -> Status {
    if let Some(status) = self.status.get(&workspace.workspace_path) {
      return status;
    }

    let namespace = workspace.namespace();
    let storage_key = workspace.storage_key();

    if let Ok(stats) = self.vector_store.stats(&namespace).await
      && stats.vector_count == 0
    {
      self.checkpoints.clear(&storage_key, &workspace.workspace_path).await;
    }

    let checkpoint = self.checkpoints.load(&storage_key, &workspace.workspace_path).await;
    let status = hydrate_status(workspace, checkpoint);
    self.status.cache(status.clone());
    status
  }

  /// Status fields plus store/checkpoint diagnostics.
  pub async fn get_diagnostics(&self, workspace: &WorkspaceRef) -> Diagnostics {
    let status = self.get_status(workspace).await;
    let namespace = workspace.namespace();

    let stats = self.vector_store.stats(&namespace).await;
    let pinecone_connected = stats.is_ok();
    let pinecone_vector_count = stats.map(|s| s.vector_count).unwrap_or(0);

    let checkpoint = self.checkpoints.load(&workspace.storage_key(), &workspace.workspace_path).await;

    let sample_query_hit_count = if pinecone_vector_count == 0 {
      0
    } else {
      match self.embedding.embed("test query", EmbeddingMode::Query).await {
        Ok(vector) => self.vector_store.query(&namespace, &vector, 5).await.map(|m| m.len()).unwrap_or(0),
        Err(_) => 0,
      }
    };

    Diagnostics {
      status,
      namespace,
      pinecone_vector_count,
      pinecone_connected,
      checkpoint_run_id: checkpoint.as_ref().and_then(|c| c.run_id),
      checkpoint_run_state: checkpoint.as_ref().and_then(|c| c.run_state),
      checkpoint_files_count: checkpoint.as_ref().and_then(|c| c.completed_file_paths.as_ref().map(Vec::len)).unwrap_or(0),
      sample_query_hit_count,
    }
  }
}

fn hydrate_status(workspace: &WorkspaceRef, checkpoint: Option<Checkpoint>) -> Status {
  let now = Utc::now();
  let Some(cp) = checkpoint else {
    return Status::idle(workspace.workspace_path.clone(), now);
  };

  let totals = Totals {
    total_files: cp.total_files,
    indexed_files: cp.indexed_files,
    total_chunks: cp.total_chunks,
    embedded_chunks: cp.embedded_chunks,
  };
  let base = Status { totals, last_full_scan_time: cp.last_full_scan_time, ..Status::idle(workspace.workspace_path.clone(), now) };

  match cp.run_state {
    Some(RunState::Complete) => Status { state: IndexState::Ready, last_indexed_time: cp.last_indexed_time, ..base },
    Some(RunState::Paused) => Status { state: IndexState::Indexing, paused: true, ..base },
    Some(RunState::Interrupted) | Some(RunState::Running) => Status {
      state: IndexState::Degraded,
      degraded_reason: Some(format!(
        "Previous run did not complete ({}/{} files indexed); re-run to resume.",
        cp.indexed_files, cp.total_files
      )),
      ..base
    },
    None if cp.indexed_files > 0 => {
      Status { state: IndexState::Degraded, degraded_reason: Some("Index incomplete".to_string()), ..base }
    }
    None => Status::idle(workspace.workspace_path.clone(), now),
  }
}

/// End-to-end coverage of the indexing engine's state machine. Vector
/// cleanup for deleted files is exercised separately in `watcher.rs`/
/// `delete_paths`, not asserted here alongside a changed-file refresh.
#[cfg(test)]
mod tests {
  use std::sync::atomic::Ordering;

  use async_trait::async_trait;

  use super::*;
  use crate::{
    checkpoint::CheckpointStore,
    config::IndexerConfig,
    testing::{InMemoryKvStore, InMemoryVectorStore, MockEmbeddingProvider},
    vectorstore::{NamespaceStats, QueryMatch, VectorRecord, VectorStoreClient, VectorStoreError},
  };

  fn fast_config() -> IndexerConfig {
    IndexerConfig {
      chunk_size_lines: 5,
      inter_file_pacing_ms: 0,
      pause_poll_ms: 5,
      status_publish_interval_ms: 0,
      status_publish_file_count: 1,
      checkpoint_write_interval_secs: 0,
      checkpoint_write_file_count: 1,
      cooldown_secs: 0,
      ..Default::default()
    }
  }

  struct Harness {
    engine: Arc<IndexingEngine>,
    embedding: Arc<MockEmbeddingProvider>,
    vector_store: Arc<InMemoryVectorStore>,
    _dir: tempfile::TempDir,
    workspace: WorkspaceRef,
  }

  fn harness_with(config: IndexerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let embedding = Arc::new(MockEmbeddingProvider::new(8));
    let vector_store = Arc::new(InMemoryVectorStore::new());
    let kv = Arc::new(InMemoryKvStore::new());
    let checkpoints = CheckpointStore::new(kv);
    let workspace = WorkspaceRef {
      workspace_path: dir.path().to_string_lossy().to_string(),
      user_id: "test-user".to_string(),
      roots: vec![dir.path().to_path_buf()],
    };
    let engine = Arc::new(IndexingEngine::new(config, embedding.clone(), vector_store.clone(), checkpoints));
    Harness { engine, embedding, vector_store, _dir: dir, workspace }
  }

  fn write_lines(root: &std::path::Path, relative: &str, line_count: usize) {
    let text = (0..line_count).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
    std::fs::write(root.join(relative), text).unwrap();
  }

  #[tokio::test]
  async fn fresh_index_of_three_files_reaches_ready() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();
    write_lines(&root, "a.ts", 10);
    write_lines(&root, "b.py", 10);
    write_lines(&root, "c.md", 10);

    let status = h.engine.build_full_index(&h.workspace, CancellationToken::new()).await.unwrap();

    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.totals.total_files, 3);
    assert_eq!(status.totals.indexed_files, 3);
    assert_eq!(status.totals.total_chunks, 6);
    assert_eq!(status.totals.embedded_chunks, 6);
    assert!(status.last_full_scan_time.is_some());
    assert_eq!(h.vector_store.vector_count(&h.workspace.namespace()), 6);
  }

  #[tokio::test]
  async fn embedding_failure_leaves_the_file_unindexed_for_a_future_retry() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();
    write_lines(&root, "a.ts", 10);
    write_lines(&root, "b.py", 10);

    h.embedding.fail_next.store(true, Ordering::SeqCst);
    let status = h.engine.build_full_index(&h.workspace, CancellationToken::new()).await.unwrap();

    // The file whose embed call hit the forced failure is counted neither
    // as indexed nor upserted, so a future resume would retry it; the other
    // file still completes normally in the same run.
    assert_eq!(status.state, IndexState::Degraded);
    assert_eq!(status.totals.total_files, 2);
    assert_eq!(status.totals.indexed_files, 1);
    assert_eq!(status.totals.total_chunks, 2);
    assert_eq!(h.vector_store.vector_count(&h.workspace.namespace()), 2);
    assert_eq!(h.embedding.call_count.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn resume_after_crash_skips_already_completed_files() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();

    let mut all_paths = Vec::new();
    for i in 0..100 {
      let name = format!("file_{i:03}.rs");
      write_lines(&root, &name, 1);
      all_paths.push(name);
    }
    all_paths.sort();
    let completed: Vec<String> = all_paths[..40].to_vec();

    let checkpoint = Checkpoint {
      total_files: 100,
      indexed_files: 40,
      total_chunks: 40,
      embedded_chunks: 40,
      run_state: Some(RunState::Interrupted),
      completed_file_paths: Some(completed),
      ..Default::default()
    };
    h.engine.checkpoints.save(&h.workspace.storage_key(), &h.workspace.workspace_path, &checkpoint).await;

    let status = h.engine.build_full_index(&h.workspace, CancellationToken::new()).await.unwrap();

    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.totals.total_files, 100);
    assert_eq!(status.totals.indexed_files, 100);
    assert_eq!(status.totals.total_chunks, 100);
    // Only the 60 files missing from `completed_file_paths` should ever
    // reach the embedder.
    assert_eq!(h.embedding.call_count.load(Ordering::SeqCst), 60);
  }

  #[tokio::test]
  async fn pause_then_resume_reaches_ready() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();
    for i in 0..10 {
      write_lines(&root, &format!("file_{i:02}.rs"), 1);
    }

    let engine = h.engine.clone();
    let workspace = h.workspace.clone();
    let join = tokio::spawn(async move { engine.build_full_index(&workspace, CancellationToken::new()).await.unwrap() });

    while h.embedding.call_count.load(Ordering::SeqCst) < 3 {
      tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    h.engine.pause(&h.workspace.workspace_path, Some("test pause".to_string()));

    loop {
      let status = h.engine.get_status(&h.workspace).await;
      if status.paused {
        assert_eq!(status.state, IndexState::Indexing);
        assert!(status.totals.indexed_files < 10);
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }

    h.engine.resume(&h.workspace.workspace_path);
    let status = join.await.unwrap();

    assert_eq!(status.state, IndexState::Ready);
    assert!(!status.paused);
    assert_eq!(status.totals.indexed_files, 10);
  }

  #[tokio::test]
  async fn file_change_after_ready_reindexes_only_that_file() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();
    write_lines(&root, "a.ts", 10);
    write_lines(&root, "b.py", 10);
    write_lines(&root, "c.md", 10);

    let status = h.engine.build_full_index(&h.workspace, CancellationToken::new()).await.unwrap();
    assert_eq!(status.state, IndexState::Ready);
    let calls_before = h.embedding.call_count.load(Ordering::SeqCst);

    write_lines(&root, "a.ts", 15);

    let status = h.engine.refresh_paths(&h.workspace, vec![root.join("a.ts")], CancellationToken::new()).await;

    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(h.embedding.call_count.load(Ordering::SeqCst), calls_before + 1);

    // a.ts now has 3 chunks (15 lines / 5), replacing its old 2 by
    // deterministic id; b.py and c.md are untouched.
    assert_eq!(h.vector_store.vector_count(&h.workspace.namespace()), 2 + 2 + 3);
  }

  #[tokio::test]
  async fn stats_mismatch_logs_warning_but_still_reaches_ready() {
    struct LyingStore {
      inner: Arc<InMemoryVectorStore>,
    }

    #[async_trait]
    impl VectorStoreClient for LyingStore {
      async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        self.inner.upsert(namespace, records).await
      }

      async fn delete_namespace(&self, namespace: &str) -> Result<(), VectorStoreError> {
        self.inner.delete_namespace(namespace).await
      }

      async fn delete_ids(&self, namespace: &str, ids: &[String]) -> Result<(), VectorStoreError> {
        self.inner.delete_ids(namespace, ids).await
      }

      async fn stats(&self, namespace: &str) -> Result<NamespaceStats, VectorStoreError> {
        let real = self.inner.stats(namespace).await?;
        Ok(NamespaceStats { vector_count: real.vector_count.saturating_sub(1) })
      }

      async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<QueryMatch>, VectorStoreError> {
        self.inner.query(namespace, vector, top_k).await
      }
    }

    let dir = tempfile::tempdir().unwrap();
    let embedding = Arc::new(MockEmbeddingProvider::new(8));
    let inner_store = Arc::new(InMemoryVectorStore::new());
    let vector_store = Arc::new(LyingStore { inner: inner_store });
    let kv = Arc::new(InMemoryKvStore::new());
    let checkpoints = CheckpointStore::new(kv);
    let workspace = WorkspaceRef {
      workspace_path: dir.path().to_string_lossy().to_string(),
      user_id: "test-user".to_string(),
      roots: vec![dir.path().to_path_buf()],
    };
    let engine = Arc::new(IndexingEngine::new(fast_config(), embedding, vector_store, checkpoints));
    write_lines(dir.path(), "a.ts", 10);

    let status = engine.build_full_index(&workspace, CancellationToken::new()).await.unwrap();

    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.totals.total_chunks, 2);
  }

  #[tokio::test]
  async fn delete_index_clears_status_checkpoint_and_vectors() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();
    write_lines(&root, "a.ts", 10);

    let status = h.engine.build_full_index(&h.workspace, CancellationToken::new()).await.unwrap();
    assert_eq!(status.state, IndexState::Ready);

    // Reaching `Ready` auto-starts a watcher (C8); grab its real cancellation
    // token instead of faking one, so this test exercises `delete_index`
    // actually stopping the watcher `build_full_index` itself started.
    let watcher_cancel = h.engine.watchers.get(&h.workspace.workspace_path).expect("watcher started on ready").value().clone();

    h.engine.delete_index(&h.workspace).await;

    assert_eq!(h.vector_store.vector_count(&h.workspace.namespace()), 0);
    assert!(h.engine.checkpoints.load(&h.workspace.storage_key(), &h.workspace.workspace_path).await.is_none());
    assert!(watcher_cancel.is_cancelled());
    assert!(h.engine.watchers.get(&h.workspace.workspace_path).is_none());

    let status = h.engine.get_status(&h.workspace).await;
    assert_eq!(status.state, IndexState::Idle);
    assert_eq!(status.totals.total_files, 0);
  }

  #[tokio::test]
  async fn concurrent_build_full_index_calls_share_a_single_walk() {
    let h = harness_with(fast_config());
    let root = h.workspace.roots[0].clone();
    for i in 0..5 {
      write_lines(&root, &format!("file_{i}.rs"), 5);
    }

    let engine_a = h.engine.clone();
    let workspace_a = h.workspace.clone();
    let engine_b = h.engine.clone();
    let workspace_b = h.workspace.clone();

    // The first future's poll runs synchronously through `try_lock` before
    // its first await point, so it always wins the race and the second
    // observes the run already in flight rather than starting its own walk.
    let (status_a, status_b) = tokio::join!(
      engine_a.build_full_index(&workspace_a, CancellationToken::new()),
      engine_b.build_full_index(&workspace_b, CancellationToken::new()),
    );

    let status_a = status_a.unwrap();
    let status_b = status_b.unwrap();
    assert_eq!(status_a.state, IndexState::Ready);
    assert_eq!(status_b.state, IndexState::Ready);
    assert_eq!(status_a.totals.total_files, 5);
    assert_eq!(status_b.totals.total_files, 5);

    // If the second call had also walked and indexed independently, every
    // file would have reached the embedder twice.
    assert_eq!(h.embedding.call_count.load(Ordering::SeqCst), 5);
    assert_eq!(h.vector_store.vector_count(&h.workspace.namespace()), 5);
  }
}
