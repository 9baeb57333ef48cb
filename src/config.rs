//! Engine configuration.
//!
//! A single typed, `Clone + Debug` struct constructed once and handed to the
//! engine at construction time, following the source package's
//! `Config::load_for_project` project-then-user-then-default load order
//! (`rewrite/crates/core/src/config.rs`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed extension allow-list.
pub const DEFAULT_EXTENSION_ALLOW_LIST: &[&str] = &[
  "ts", "tsx", "js", "jsx", "py", "java", "go", "rs", "cpp", "c", "h", "hpp", "cs", "php", "rb", "swift", "kt",
  "scala", "md", "txt", "json", "yaml", "yml", "xml", "html", "css", "scss", "less",
];

/// Fixed excluded-directories list.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", ".vscode", "dist", "build"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
  /// Master switch: off => all operations are no-ops returning current
  /// status.
  pub enable_indexing: bool,

  /// Lines per chunk. Must be >= 1.
  pub chunk_size_lines: usize,

  /// Texts per `embed` call. Must be >= 1.
  pub embedding_batch_size: usize,

  /// File extensions eligible for indexing (without the leading dot).
  pub extension_allow_list: Vec<String>,

  /// Directory names skipped entirely during the walk.
  pub excluded_dirs: Vec<String>,

  /// Per-root cap on enumerated files.
  pub max_files_per_root: usize,

  /// Maximum directory recursion depth.
  pub max_recursion_depth: usize,

  /// Minimum spacing between successive `embed` calls, in milliseconds.
  pub embed_pacing_ms: u64,

  /// Sleep between files within a run, in milliseconds.
  pub inter_file_pacing_ms: u64,

  /// Poll interval while paused, in milliseconds.
  pub pause_poll_ms: u64,

  /// Minimum interval between status publications during steady-state
  /// progress, in milliseconds.
  pub status_publish_interval_ms: u64,

  /// Publish status at least this often, measured in files processed.
  pub status_publish_file_count: u64,

  /// Minimum interval between checkpoint writes during a run, in seconds.
  pub checkpoint_write_interval_secs: u64,

  /// Persist a checkpoint at least this often, measured in files processed.
  pub checkpoint_write_file_count: u64,

  /// Cooldown between `build_full_index` invocations on the same workspace,
  /// in seconds.
  pub cooldown_secs: u64,

  /// Grace period `autotrigger` waits for the file system to settle before
  /// considering a workspace ready for an auto-run.
  pub autotrigger_grace_secs: u64,
}

impl Default for IndexerConfig {
  fn default() -> Self {
    Self {
      enable_indexing: true,
      chunk_size_lines: 200,
      embedding_batch_size: 50,
      extension_allow_list: DEFAULT_EXTENSION_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
      excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
      max_files_per_root: 20_000,
      max_recursion_depth: 20,
      embed_pacing_ms: 30,
      inter_file_pacing_ms: 50,
      pause_poll_ms: 100,
      status_publish_interval_ms: 100,
      status_publish_file_count: 10,
      checkpoint_write_interval_secs: 10,
      checkpoint_write_file_count: 100,
      cooldown_secs: 60,
      autotrigger_grace_secs: 2,
    }
  }
}

impl IndexerConfig {
  pub fn embed_pacing(&self) -> Duration {
    Duration::from_millis(self.embed_pacing_ms)
  }

  pub fn inter_file_pacing(&self) -> Duration {
    Duration::from_millis(self.inter_file_pacing_ms)
  }

  pub fn pause_poll_interval(&self) -> Duration {
    Duration::from_millis(self.pause_poll_ms)
  }

  pub fn status_publish_interval(&self) -> Duration {
    Duration::from_millis(self.status_publish_interval_ms)
  }

  pub fn checkpoint_write_interval(&self) -> Duration {
    Duration::from_secs(self.checkpoint_write_interval_secs)
  }

  pub fn cooldown(&self) -> Duration {
    Duration::from_secs(self.cooldown_secs)
  }

  pub fn autotrigger_grace(&self) -> Duration {
    Duration::from_secs(self.autotrigger_grace_secs)
  }

  /// Load from `<project_path>/.vybe/indexer.toml` if present, else
  /// `<user config dir>/vybe-code-indexer/indexer.toml`, else defaults.
  pub fn load_for_project(project_path: &Path) -> Self {
    let project_config = Self::project_config_path(project_path);
    if project_config.exists()
      && let Ok(content) = std::fs::read_to_string(&project_config)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    if let Some(user_config_path) = Self::user_config_path()
      && user_config_path.exists()
      && let Ok(content) = std::fs::read_to_string(&user_config_path)
      && let Ok(config) = toml::from_str(&content)
    {
      return config;
    }

    Self::default()
  }

  pub fn project_config_path(project_path: &Path) -> std::path::PathBuf {
    project_path.join(".vybe").join("indexer.toml")
  }

  pub fn user_config_path() -> Option<std::path::PathBuf> {
    Some(crate::dirs::default_config_dir().join("indexer.toml"))
  }
}
