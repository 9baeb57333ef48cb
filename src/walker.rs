//! File Walker (C3)
//!
//! Enumerates a workspace's roots into a bounded, de-duplicated list of
//! indexable files: regular files with an allow-listed extension, outside an
//! excluded directory, reachable within a bounded recursion depth. Errors on
//! individual entries are logged and skipped — one unreadable directory must
//! never fail the whole walk.

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
};

use tracing::trace;

use crate::config::IndexerConfig;

/// A single enumerated file, stat-only (no content read yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
  /// Normalized relative path (forward slashes, no leading separator).
  pub relative_path: String,
  pub absolute_path: PathBuf,
}

/// Walk `roots`, returning a de-duplicated, bounded list of indexable files.
///
/// Bounded to `config.max_files_per_root` entries per root, summed across
/// roots. Recursion below `config.max_recursion_depth` is not descended
/// into. Directories named in `config.excluded_dirs` are skipped entirely.
pub fn walk_workspace(roots: &[PathBuf], config: &IndexerConfig) -> Vec<FileEntry> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();

  for root in roots {
    let mut count_for_root = 0usize;
    let walker = walkdir::WalkDir::new(root)
      .follow_links(false)
      .max_depth(config.max_recursion_depth)
      .into_iter()
      .filter_entry(|entry| !is_excluded_dir(entry, config));

    for entry in walker {
      if count_for_root >= config.max_files_per_root {
        trace!(root = %root.display(), limit = config.max_files_per_root, "file walk root limit reached");
        break;
      }

      let entry = match entry {
        Ok(e) => e,
        Err(e) => {
          trace!(error = %e, "skipping unreadable entry during walk");
          continue;
        }
      };

      if !entry.file_type().is_file() {
        continue;
      }

      let path = entry.path();
      if !has_allowed_extension(path, config) {
        continue;
      }

      let Some(relative_path) = crate::identity::normalize_relative_path(root, path) else {
        continue;
      };

      if seen.insert(relative_path.clone()) {
        out.push(FileEntry {
          relative_path,
          absolute_path: path.to_path_buf(),
        });
        count_for_root += 1;
      }
    }
  }

  out
}

fn is_excluded_dir(entry: &walkdir::DirEntry, config: &IndexerConfig) -> bool {
  if entry.depth() == 0 || !entry.file_type().is_dir() {
    return false;
  }
  let name = entry.file_name().to_string_lossy();
  config.excluded_dirs.iter().any(|excluded| excluded == name.as_ref())
}

fn has_allowed_extension(path: &Path, config: &IndexerConfig) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| config.extension_allow_list.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}
