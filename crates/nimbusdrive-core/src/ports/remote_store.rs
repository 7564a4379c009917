//! Remote content store port (driven/secondary port)
//!
//! This module defines the interface for the remote content store. The
//! actual transport (HTTP client, authentication, rate limiting) is an
//! external collaborator; the engine only sees list/upload/download/delete
//! operations on items.
//!
//! ## Design Notes
//!
//! - Unlike the local filesystem port, this boundary uses a typed error
//!   enum rather than `anyhow`: the engine's retry and abort logic must
//!   distinguish failure classes (transient vs. authentication vs.
//!   not-found).
//! - Pagination is exposed via an opaque cursor so the enumerator can
//!   drive it to completion; callers never see partial listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::newtypes::{ItemPath, RemoteId};
use crate::domain::record::ItemKind;

// ============================================================================
// Error taxonomy
// ============================================================================

/// Failure classes for remote store operations
///
/// Every operation on [`IRemoteStore`] fails with exactly one of these,
/// so the caller can choose between retrying, aborting the cycle, or
/// treating absence as a fact.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteStoreError {
    /// Connectivity or server-side failure; safe to retry with backoff
    #[error("Network failure: {0}")]
    Network(String),

    /// The operation did not complete within its deadline
    #[error("Remote operation timed out after {0}s")]
    Timeout(u64),

    /// Credentials are missing, expired, or rejected; the cycle must
    /// abort until the auth collaborator refreshes them
    #[error("Authentication failure: {0}")]
    Authentication(String),

    /// The referenced item does not exist on the remote side
    #[error("Remote item not found: {0}")]
    NotFound(String),

    /// The remote store asked us to slow down
    #[error("Rate limited by remote store{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited {
        /// Server-suggested wait, when provided
        retry_after_secs: Option<u64>,
    },
}

impl RemoteStoreError {
    /// Returns true if the failure is worth retrying with backoff
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. }
        )
    }
}

// ============================================================================
// Listing DTOs
// ============================================================================

/// A single entry from a remote listing
///
/// This is a port-level DTO describing what the remote store currently
/// holds at one path; the reconciler maps it against records and local
/// observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Path of the item relative to the remote root
    pub path: ItemPath,
    /// Store-assigned identifier
    pub id: RemoteId,
    /// Version tag; changes whenever the content changes
    pub etag: String,
    /// Size in bytes (None for folders)
    pub size: Option<u64>,
    /// Last modification time, when the store reports one
    pub mtime: Option<DateTime<Utc>>,
    /// File or folder
    pub kind: ItemKind,
}

/// One page of a remote listing
#[derive(Debug, Clone)]
pub struct RemotePage {
    /// Entries on this page
    pub entries: Vec<RemoteEntry>,
    /// Cursor for the next page, or None on the last page
    pub next: Option<String>,
}

// ============================================================================
// Port trait
// ============================================================================

/// Port trait for remote content store operations
///
/// Implementations handle the provider-specific API calls; the engine
/// wraps every call in a timeout and applies its own retry policy, so
/// implementations should fail fast rather than retry internally.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Fetch one page of the recursive listing of the remote tree
    ///
    /// Pass `None` to start from the beginning; pass the previous page's
    /// `next` cursor to continue. Folders are included in the listing.
    ///
    /// # Errors
    /// Any [`RemoteStoreError`]; a failed page invalidates the whole
    /// enumeration for this cycle
    async fn list_page(&self, cursor: Option<&str>) -> Result<RemotePage, RemoteStoreError>;

    /// Create or replace the item at `path` with the given content
    ///
    /// For folders, `data` is empty and the call creates the directory.
    ///
    /// # Returns
    /// The entry describing the stored item (with its new version tag)
    async fn upload(
        &self,
        path: &ItemPath,
        kind: ItemKind,
        data: &[u8],
    ) -> Result<RemoteEntry, RemoteStoreError>;

    /// Download an item's content by its remote ID
    async fn download(&self, id: &RemoteId) -> Result<Vec<u8>, RemoteStoreError>;

    /// Delete an item (recursively, for folders)
    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteStoreError>;

    /// Fetch current metadata for an item, or `None` if it no longer
    /// exists
    ///
    /// Used by deletion verification; absence is a successful answer
    /// here, not an error.
    async fn get_metadata(&self, id: &RemoteId) -> Result<Option<RemoteEntry>, RemoteStoreError>;
}
