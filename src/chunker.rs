//! Chunker (C4)
//!
//! Splits a file's UTF-8 text into fixed line-count windows. No overlap, no
//! AST awareness — the last window may be shorter than the rest, and an
//! empty file yields zero chunks. Chunk `id`s reuse `identity::vector_id` so
//! a chunk's identity is determined purely by `(workspace_path,
//! relative_path, ordinal)`, stable across re-indexing of an unchanged file.

use sha2::{Digest, Sha256};

use crate::identity::vector_id;

/// A single line-bounded chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
  pub id: String,
  pub file_relative_path: String,
  /// 1-based, inclusive.
  pub start_line: u32,
  /// 1-based, inclusive.
  pub end_line: u32,
  pub start_col: u32,
  pub end_col: u32,
  pub language_id: Option<String>,
  pub content: String,
  pub content_hash: String,
}

/// Map a file extension to a coarse language id for chunk metadata.
///
/// A thin label, not the source package's full `Language` enum — this crate
/// doesn't parse or chunk by syntax, so a display-only string is all the
/// spec's `Chunk.language_id` needs.
pub fn language_id_for_extension(extension: &str) -> Option<&'static str> {
  Some(match extension.to_ascii_lowercase().as_str() {
    "ts" => "typescript",
    "tsx" => "tsx",
    "js" | "jsx" => "javascript",
    "py" => "python",
    "java" => "java",
    "go" => "go",
    "rs" => "rust",
    "cpp" => "cpp",
    "c" | "h" => "c",
    "hpp" => "cpp",
    "cs" => "csharp",
    "php" => "php",
    "rb" => "ruby",
    "swift" => "swift",
    "kt" => "kotlin",
    "scala" => "scala",
    "md" => "markdown",
    "json" => "json",
    "yaml" | "yml" => "yaml",
    "xml" => "xml",
    "html" => "html",
    "css" => "css",
    "scss" => "scss",
    "less" => "less",
    "txt" => "plaintext",
    _ => return None,
  })
}

fn content_hash(content: &str) -> String {
  let digest = Sha256::digest(content.as_bytes());
  format!("{:016x}", u64::from_be_bytes(digest[0..8].try_into().unwrap()))
}

/// Split `text` into chunks of at most `window_size` lines each.
///
/// `workspace_path` and `relative_path` feed the deterministic chunk id;
/// `language_id` is carried through to each chunk's metadata unchanged.
pub fn chunk_file(
  workspace_path: &str,
  relative_path: &str,
  language_id: Option<&str>,
  text: &str,
  window_size: usize,
) -> Vec<Chunk> {
  debug_assert!(window_size >= 1);
  if text.is_empty() {
    return Vec::new();
  }

  let lines: Vec<&str> = text.lines().collect();
  if lines.is_empty() {
    return Vec::new();
  }

  let mut chunks = Vec::with_capacity(lines.len().div_ceil(window_size));
  let mut ordinal = 0usize;
  let mut start_idx = 0usize;

  while start_idx < lines.len() {
    let end_idx = (start_idx + window_size).min(lines.len());
    let window = &lines[start_idx..end_idx];
    let content = window.join("\n");
    let end_col = window.last().map(|l| l.chars().count() as u32).unwrap_or(0);

    chunks.push(Chunk {
      id: vector_id(workspace_path, relative_path, ordinal),
      file_relative_path: relative_path.to_string(),
      start_line: (start_idx + 1) as u32,
      end_line: end_idx as u32,
      start_col: 0,
      end_col,
      language_id: language_id.map(str::to_string),
      content_hash: content_hash(&content),
      content,
    });

    ordinal += 1;
    start_idx = end_idx;
  }

  chunks
}
