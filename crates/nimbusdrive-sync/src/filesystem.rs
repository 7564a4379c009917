//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: write-to-temp + rename in the same directory so a
//!   crash or power loss never leaves partial content at the target path.
//! - **Walk filtering**: hidden entries are skipped and symlinks are
//!   never followed, so nothing outside the sync root can enter the
//!   namespace through a link.
//! - **Trash**: freedesktop-style layout (`files/` plus `info/` with a
//!   `.trashinfo` record) under the user data directory, overridable for
//!   tests. A failed move surfaces as an error; the executor falls back
//!   to permanent deletion with a logged warning.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nimbusdrive_core::domain::{ItemKind, ItemPath};
use nimbusdrive_core::ports::local_filesystem::{ILocalFileSystem, LocalEntry, LocalMetadata};
use tracing::{debug, instrument, trace};

/// Adapter that bridges the [`ILocalFileSystem`] port to the real
/// filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileSystemAdapter {
    trash_dir: PathBuf,
}

impl LocalFileSystemAdapter {
    /// Create an adapter using the platform trash location.
    #[must_use]
    pub fn new() -> Self {
        let trash_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("Trash");
        Self { trash_dir }
    }

    /// Create an adapter trashing into the given directory (tests).
    #[must_use]
    pub fn with_trash_dir(trash_dir: PathBuf) -> Self {
        Self { trash_dir }
    }

    /// Pick a non-colliding name inside the trash `files/` directory.
    async fn trash_target(&self, name: &str) -> anyhow::Result<(PathBuf, PathBuf, String)> {
        let files_dir = self.trash_dir.join("files");
        let info_dir = self.trash_dir.join("info");
        tokio::fs::create_dir_all(&files_dir).await?;
        tokio::fs::create_dir_all(&info_dir).await?;

        let mut candidate = name.to_string();
        let mut counter = 1u32;
        loop {
            let target = files_dir.join(&candidate);
            match tokio::fs::symlink_metadata(&target).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let info = info_dir.join(format!("{candidate}.trashinfo"));
                    return Ok((target, info, candidate));
                }
                Err(e) => return Err(e.into()),
                Ok(_) => {
                    candidate = format!("{name}.{counter}");
                    counter += 1;
                }
            }
        }
    }
}

impl Default for LocalFileSystemAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn system_time_to_utc(time: std::time::SystemTime) -> Option<DateTime<Utc>> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
}

fn metadata_to_local(metadata: &std::fs::Metadata) -> LocalMetadata {
    let kind = if metadata.is_dir() {
        ItemKind::Folder
    } else {
        ItemKind::File
    };
    LocalMetadata {
        kind,
        size: (kind == ItemKind::File).then(|| metadata.len()),
        mtime: metadata.modified().ok().and_then(system_time_to_utc),
    }
}

/// Recursive directory walk. Boxed because async recursion needs an
/// explicit indirection.
fn walk_directory<'a>(
    dir: PathBuf,
    root: &'a Path,
    entries: &'a mut Vec<LocalEntry>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let mut read_dir = tokio::fs::read_dir(&dir).await?;

        while let Some(dirent) = read_dir.next_entry().await? {
            let path = dirent.path();

            let name = dirent.file_name();
            if name.to_string_lossy().starts_with('.') {
                trace!(path = %path.display(), "skipping hidden entry");
                continue;
            }

            // symlink_metadata does not follow links.
            let metadata = tokio::fs::symlink_metadata(&path).await?;
            if metadata.is_symlink() {
                trace!(path = %path.display(), "skipping symlink");
                continue;
            }

            let item = match ItemPath::from_local(&path, root) {
                Ok(item) => item,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unrepresentable entry");
                    continue;
                }
            };

            let local = metadata_to_local(&metadata);
            entries.push(LocalEntry {
                path: item,
                kind: local.kind,
                size: local.size,
                mtime: local.mtime,
            });

            if metadata.is_dir() {
                walk_directory(path, root, entries).await?;
            }
        }

        Ok(())
    })
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(root = %root.display()))]
    async fn walk(&self, root: &Path) -> anyhow::Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        walk_directory(root.to_path_buf(), root, &mut entries).await?;
        debug!(count = entries.len(), "walk complete");
        Ok(entries)
    }

    async fn metadata(&self, path: &Path) -> anyhow::Result<Option<LocalMetadata>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(m) if m.is_symlink() => Ok(None),
            Ok(m) => Ok(Some(metadata_to_local(&m))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    #[instrument(skip(self, data), fields(path = %path.display(), bytes = data.len()))]
    async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temporary sibling in the same directory so the rename is atomic.
        let tmp_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!("write complete");
        Ok(())
    }

    async fn create_directory(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn move_to_trash(&self, path: &Path) -> anyhow::Result<()> {
        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))?
            .to_string_lossy()
            .into_owned();

        let (target, info_path, _stored_name) = self.trash_target(&name).await?;

        let info = format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            path.display(),
            Utc::now().format("%Y-%m-%dT%H:%M:%S")
        );
        tokio::fs::write(&info_path, info).await?;

        // rename fails across filesystems; the caller falls back to
        // permanent deletion in that case.
        tokio::fs::rename(path, &target).await?;
        debug!(target = %target.display(), "moved to trash");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn remove_dir_if_empty(&self, path: &Path) -> anyhow::Result<bool> {
        let mut read_dir = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if read_dir.next_entry().await?.is_some() {
            return Ok(false);
        }
        tokio::fs::remove_dir(path).await?;
        Ok(true)
    }
}
