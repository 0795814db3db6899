//! Filesystem collaborators: share scanning, ranged reads, atomic writes.
//!
//! Everything here is called from the engine's event tasks, so blocking the
//! runtime is not an option: reads go through `tokio::fs`, and the directory
//! walk and the write-rename pair run on the blocking pool.

use partake_proto::CHUNK_SIZE;
use partake_proto::message::FileEntry;
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::warn;

/// Most files a share will list before truncation.
pub const MAX_SHARE_FILES: usize = 50_000;

/// Recursively list the share, relative `/`-separated paths, sorted.
///
/// Unreadable entries are skipped with a warning rather than failing the
/// whole scan. Lists longer than [`MAX_SHARE_FILES`] are truncated. The walk
/// touches up to [`MAX_SHARE_FILES`] inodes, so it runs on the blocking
/// pool.
pub async fn list_entries(root: &Path) -> Vec<FileEntry> {
    let root = root.to_path_buf();
    let scan = tokio::task::spawn_blocking(move || {
        let mut entries = Vec::new();
        walk(&root, &root, &mut entries);
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        if entries.len() > MAX_SHARE_FILES {
            warn!(
                total = entries.len(),
                kept = MAX_SHARE_FILES,
                "share listing truncated"
            );
            entries.truncate(MAX_SHARE_FILES);
        }
        entries
    });
    match scan.await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%err, "share scan task failed");
            Vec::new()
        }
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<FileEntry>) {
    let reader = match std::fs::read_dir(dir) {
        Ok(reader) => reader,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "skipping unreadable directory");
            return;
        }
    };
    for entry in reader {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable entry");
                continue;
            }
        };
        if meta.is_dir() {
            walk(root, &path, out);
        } else if meta.is_file() {
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let Some(rel) = relative_string(rel) else {
                warn!(path = %path.display(), "skipping non-unicode path");
                continue;
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_millis() as u64);
            out.push(FileEntry {
                path: rel,
                size: meta.len(),
                modified,
            });
        }
    }
}

fn relative_string(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

/// Resolve a validated relative path under the share root.
#[must_use]
pub fn resolve(root: &Path, rel_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for component in rel_path.split('/') {
        out.push(component);
    }
    out
}

/// Size of the file at `rel_path`, or an io error.
///
/// # Errors
///
/// Propagates metadata failures, including not-found.
pub async fn file_size(root: &Path, rel_path: &str) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(resolve(root, rel_path)).await?.len())
}

/// Read chunk `index` of the file (up to [`CHUNK_SIZE`] bytes).
///
/// # Errors
///
/// Propagates open/seek/read failures.
pub async fn read_chunk(root: &Path, rel_path: &str, index: u32) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(resolve(root, rel_path)).await?;
    file.seek(SeekFrom::Start(u64::from(index) * CHUNK_SIZE as u64))
        .await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Write `bytes` to `rel_path` under `root` atomically.
///
/// Parents are created; the data lands in a temp file in the destination
/// directory and is renamed into place, so a crash never leaves a partial
/// file under the final name. The write-flush-rename sequence runs on the
/// blocking pool.
///
/// # Errors
///
/// Propagates directory creation, write, and rename failures.
pub async fn write_atomic(root: &Path, rel_path: &str, bytes: Vec<u8>) -> std::io::Result<PathBuf> {
    let target = resolve(root, rel_path);
    let parent = target.parent().unwrap_or(root).to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&target).map_err(|err| err.error)?;
        Ok(target)
    })
    .await
    .map_err(std::io::Error::other)?
}
