//! Filesystem adapters: data directory layout and the task record store.

pub mod records;

use std::path::PathBuf;

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `TASKLOOM_DATA_DIR` environment variable
/// 2. `~/.taskloom`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TASKLOOM_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".taskloom");
    }

    PathBuf::from(".taskloom")
}

/// Default record root inside `data_dir`.
pub fn records_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("records")
}
