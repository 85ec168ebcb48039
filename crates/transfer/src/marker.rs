//! Zero-byte `.ok` / `.err` completion markers.
//!
//! A marker is the durable per-object signal remote callers poll for.
//! Writing one disposition removes a stale marker of the other kind left
//! by an earlier attempt, so at most one of the pair exists afterwards.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;

pub const OK_SUFFIX: &str = ".ok";
pub const ERR_SUFFIX: &str = ".err";

/// Returns `<base><suffix>`.
pub fn marker_path(base: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(base.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

pub fn ok_path(base: &Path) -> PathBuf {
    marker_path(base, OK_SUFFIX)
}

pub fn err_path(base: &Path) -> PathBuf {
    marker_path(base, ERR_SUFFIX)
}

/// Writes the success marker for `base`.
pub async fn write_ok(base: &Path) -> std::io::Result<PathBuf> {
    write_marker(base, OK_SUFFIX, ERR_SUFFIX).await
}

/// Writes the failure marker for `base`.
pub async fn write_err(base: &Path) -> std::io::Result<PathBuf> {
    write_marker(base, ERR_SUFFIX, OK_SUFFIX).await
}

async fn write_marker(base: &Path, suffix: &str, stale: &str) -> std::io::Result<PathBuf> {
    let path = marker_path(base, suffix);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::File::create(&path).await?;

    match tokio::fs::remove_file(marker_path(base, stale)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    debug!(marker = %path.display(), "marker written");
    Ok(path)
}
