//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for interacting with the local
//! filesystem: walking the sync root, reading and atomically writing
//! files, and moving items to the trash.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific;
//!   the engine scopes any local I/O failure to the single affected item.
//! - `walk` returns entries keyed by [`ItemPath`], so hidden entries and
//!   paths that escape the root (symlinks, traversal) are already filtered
//!   by the adapter.
//! - `write_file` must be atomic (write to a temporary in the same
//!   directory, then rename) so a crash never leaves partial content.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::domain::newtypes::ItemPath;
use crate::domain::record::ItemKind;

// ============================================================================
// DTOs
// ============================================================================

/// A single entry from a walk of the sync root
#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntry {
    /// Path relative to the walked root
    pub path: ItemPath,
    /// File or folder
    pub kind: ItemKind,
    /// Size in bytes (None for folders)
    pub size: Option<u64>,
    /// Last modification time, when available
    pub mtime: Option<DateTime<Utc>>,
}

/// Metadata snapshot for a single local path
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMetadata {
    /// File or folder
    pub kind: ItemKind,
    /// Size in bytes (None for folders)
    pub size: Option<u64>,
    /// Last modification time, when available
    pub mtime: Option<DateTime<Utc>>,
}

// ============================================================================
// Port trait
// ============================================================================

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Recursively walk `root`, returning files and folders beneath it
    ///
    /// Hidden entries (dotfiles) are skipped, symlinks are not followed,
    /// and entries whose names do not form a valid [`ItemPath`] are
    /// omitted with a log rather than failing the walk.
    async fn walk(&self, root: &Path) -> anyhow::Result<Vec<LocalEntry>>;

    /// Metadata for one absolute path, or `None` if it does not exist
    async fn metadata(&self, path: &Path) -> anyhow::Result<Option<LocalMetadata>>;

    /// Read the entire contents of a file
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    /// Atomically write data to a file, creating parent directories as
    /// needed
    async fn write_file(&self, path: &Path, data: &[u8]) -> anyhow::Result<()>;

    /// Create a directory and all parents (`mkdir -p`)
    async fn create_directory(&self, path: &Path) -> anyhow::Result<()>;

    /// Move a file or directory to the trash (recoverable deletion)
    ///
    /// # Errors
    /// Returns an error if no trash location is usable; callers fall back
    /// to [`remove`](Self::remove) with a logged warning
    async fn move_to_trash(&self, path: &Path) -> anyhow::Result<()>;

    /// Permanently delete a file or directory (recursively)
    async fn remove(&self, path: &Path) -> anyhow::Result<()>;

    /// Remove a directory only if it is empty; returns true if removed
    ///
    /// Used by evict to clean up parent directories that only existed to
    /// hold the evicted item.
    async fn remove_dir_if_empty(&self, path: &Path) -> anyhow::Result<bool>;
}
