//! Filesystem helpers shared by the file-backed stores.
//!
//! Every durable write goes through [`atomic_write`]: the payload lands in a
//! temporary file in the target directory, is flushed to disk, renamed over
//! the target, and the directory entry is flushed. Readers therefore see
//! either the previous content or the new content, never a torn file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Durably replace `path` with `bytes`, creating parent directories.
pub async fn atomic_write(path: &Path, bytes: Vec<u8>) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_durable(&path, &bytes))
        .await
        .map_err(io::Error::other)?
}

/// Serialize `value` as pretty JSON and write it atomically.
pub async fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    atomic_write(path, bytes).await
}

fn write_durable(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `WAYPOINT_DATA_DIR` environment variable
/// 2. `~/.waypoint`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WAYPOINT_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".waypoint");
    }

    // Last resort: current directory
    PathBuf::from(".waypoint")
}
