//! Namespace & Identity (C1)
//!
//! Derives the stable identifiers the rest of the engine keys everything off
//! of: a per-installation `user_id`, the opaque `namespace` that scopes
//! vectors in the remote store, per-chunk `vector_id`s, and the KV
//! `storage_key` that holds a workspace's checkpoint.
//!
//! All four functions are pure given their inputs except `user_id`, which is
//! lazily created and persisted to disk on first use so it survives process
//! restarts.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const STORAGE_KEY_PREFIX: &str = "vybe.cloudIndexing.status.";

/// Errors reading or persisting the installation-wide user id.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
  #[error("failed to read user id file: {0}")]
  Read(#[source] std::io::Error),
  #[error("failed to persist user id file: {0}")]
  Write(#[source] std::io::Error),
}

/// Path to the file holding the persisted installation user id.
///
/// Follows the same override chain as `dirs::default_data_dir`: an explicit
/// `DATA_DIR` env var, then `XDG_DATA_HOME`, then the platform default.
pub fn user_id_path() -> PathBuf {
  crate::dirs::default_data_dir().join("user_id")
}

/// Return the stable per-installation user id, creating and persisting one
/// at `path` on first call if none exists yet.
pub fn user_id_at(path: &Path) -> Result<String, IdentityError> {
  match std::fs::read_to_string(path) {
    Ok(existing) => {
      let trimmed = existing.trim();
      if !trimmed.is_empty() {
        return Ok(trimmed.to_string());
      }
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => return Err(IdentityError::Read(e)),
  }

  let fresh = uuid::Uuid::new_v4().to_string();
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(IdentityError::Write)?;
  }
  std::fs::write(path, &fresh).map_err(IdentityError::Write)?;
  Ok(fresh)
}

/// Return the stable per-installation user id from the default location.
pub fn user_id() -> Result<String, IdentityError> {
  user_id_at(&user_id_path())
}

pub(crate) fn sha256_hex(input: &str) -> String {
  let digest = Sha256::digest(input.as_bytes());
  digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derive the opaque namespace scoping a user's vectors for one workspace.
///
/// Deterministic, collision-resistant (SHA-256), and filesystem-and-key-safe
/// (hex digest only).
pub fn namespace(user_id: &str, workspace_path: &str) -> String {
  sha256_hex(&format!("{user_id}\u{0}{workspace_path}"))
}

/// Derive a stable vector id for one chunk of one file in one workspace.
///
/// `ordinal` is the chunk's zero-based position within the file.
pub fn vector_id(workspace_path: &str, relative_path: &str, ordinal: usize) -> String {
  sha256_hex(&format!("{workspace_path}\u{0}{relative_path}\u{0}{ordinal}"))
}

/// Derive the KV key that holds a workspace's persisted checkpoint.
///
/// Any character outside `[A-Za-z0-9_-]` in `namespace` is replaced with `_`
/// so the result is safe to use as a key in stores that restrict key
/// charsets.
pub fn storage_key(namespace: &str) -> String {
  let sanitized: String = namespace
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
    .collect();
  format!("{STORAGE_KEY_PREFIX}{sanitized}")
}

/// Normalize a path into the `relative_path` shape the rest of the crate
/// expects: forward slashes, no leading separator, relative to `root`.
pub fn normalize_relative_path(root: &Path, absolute: &Path) -> Option<String> {
  let rel = absolute.strip_prefix(root).ok()?;
  let mut s = rel.to_string_lossy().replace('\\', "/");
  while s.starts_with('/') {
    s.remove(0);
  }
  Some(s)
}
