//! Platform default directories, shared by [`identity`](crate::identity) (the
//! persisted `user_id` file) and [`config`](crate::config) (the user-level
//! `indexer.toml`). Each honors an explicit env var override before falling
//! back to the `dirs` crate's platform-appropriate default, the same
//! override chain the source package used for its own data/config
//! directories — narrowed to the two helpers this crate actually needs,
//! with the daemon socket-path helpers dropped since this crate exposes no
//! IPC surface.

const APP_DIR_NAME: &str = "vybe-code-indexer";

/// Default data directory.
///
/// 1. `DATA_DIR` explicit override
/// 2. `XDG_DATA_HOME`
/// 3. `dirs::data_local_dir()` platform default
pub fn default_data_dir() -> std::path::PathBuf {
  if let Ok(dir) = std::env::var("DATA_DIR") {
    return std::path::PathBuf::from(dir);
  }
  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return std::path::PathBuf::from(xdg_data).join(APP_DIR_NAME);
  }
  dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(APP_DIR_NAME)
}

/// Default config directory.
///
/// 1. `CONFIG_DIR` explicit override
/// 2. `XDG_CONFIG_HOME`
/// 3. `dirs::config_dir()` platform default
pub fn default_config_dir() -> std::path::PathBuf {
  if let Ok(dir) = std::env::var("CONFIG_DIR") {
    return std::path::PathBuf::from(dir);
  }
  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return std::path::PathBuf::from(xdg_config).join(APP_DIR_NAME);
  }
  dirs::config_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn data_dir_honors_explicit_override() {
    // SAFETY: single-threaded test, no concurrent env access.
    unsafe { std::env::set_var("DATA_DIR", "/tmp/vybe-test-data") };
    assert_eq!(default_data_dir(), std::path::PathBuf::from("/tmp/vybe-test-data"));
    unsafe { std::env::remove_var("DATA_DIR") };
  }
}
