//! The per-path synchronization record and its status state machine
//!
//! A [`SyncRecord`] is the persisted last-known-synced state for one item,
//! keyed by its [`ItemPath`]. The reconciler compares every record against
//! the current local and remote observations to decide what, if anything,
//! must happen to the item.
//!
//! ## Status state machine
//!
//! ```text
//! (untracked) ──> CloudOnly ──────────────> Synced
//!                     │                    ╱  │  ╲
//!                     │   LocalModifiedPending │ RemoteModifiedPending
//!                     │            │  ╲        │       ╱  │
//!                     │            │   Conflicted <────┘  │
//!                     │            │        │             │
//!                     └────────> (record removed) <───────┘
//!                                     ▲
//!                          PendingDeleteVerification
//! ```
//!
//! `Untracked` is implicit (no record exists). Record removal is the
//! terminal state; `PendingDeleteVerification` only ever leaves the map by
//! removal once the deletion is confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ItemPath, RemoteId};

// ============================================================================
// Item kind
// ============================================================================

/// Whether a tracked item is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A regular file
    File,
    /// A directory
    Folder,
}

impl ItemKind {
    /// Human-readable name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

// ============================================================================
// Record status
// ============================================================================

/// Explicit synchronization status of a tracked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Known remotely, not materialized locally (`downloaded = false`)
    CloudOnly,
    /// Local and remote agree with the record
    Synced,
    /// Local content changed since the last sync; upload pending
    LocalModifiedPending,
    /// Remote content changed since the last sync; download pending
    RemoteModifiedPending,
    /// Divergent edits detected; a `.conflict` artifact was produced and
    /// no automatic resolution will happen
    Conflicted,
    /// A propagated deletion awaits confirmation from the authoritative
    /// side; surfaced for attention if confirmation never arrives
    PendingDeleteVerification,
}

impl RecordStatus {
    /// Human-readable status name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CloudOnly => "cloud_only",
            Self::Synced => "synced",
            Self::LocalModifiedPending => "local_modified_pending",
            Self::RemoteModifiedPending => "remote_modified_pending",
            Self::Conflicted => "conflicted",
            Self::PendingDeleteVerification => "pending_delete_verification",
        }
    }

    /// Returns true if this status allows transitioning to `target`
    ///
    /// Self-transitions are always allowed. `PendingDeleteVerification`
    /// is terminal: the record leaves it only by being removed.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        use RecordStatus::*;

        if *self == target {
            return true;
        }

        match self {
            CloudOnly => matches!(target, Synced | RemoteModifiedPending),
            Synced => matches!(
                target,
                CloudOnly
                    | LocalModifiedPending
                    | RemoteModifiedPending
                    | Conflicted
                    | PendingDeleteVerification
            ),
            // A remote deletion can land while an item sits in any
            // pending or conflicted status, so all of them may enter
            // deletion verification.
            LocalModifiedPending => {
                matches!(target, Synced | Conflicted | CloudOnly | PendingDeleteVerification)
            }
            RemoteModifiedPending => {
                matches!(target, Synced | Conflicted | CloudOnly | PendingDeleteVerification)
            }
            Conflicted => matches!(target, Synced | CloudOnly | PendingDeleteVerification),
            PendingDeleteVerification => false,
        }
    }
}

// ============================================================================
// SyncRecord
// ============================================================================

/// Persisted per-path synchronization metadata and status
///
/// Exactly one record exists per path. A record is created on first
/// observation from either side (local event, remote listing entry, or an
/// explicit materialize request) and removed only once both sides agree the
/// item is gone or the user opts out of tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Relative path uniquely identifying this item
    path: ItemPath,
    /// File or folder
    kind: ItemKind,
    /// Last observed local modification time; None when not materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_mtime: Option<DateTime<Utc>>,
    /// Last observed local size in bytes; None when not materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_size: Option<u64>,
    /// Last observed remote identity; None when not known remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_id: Option<RemoteId>,
    /// Last observed remote version tag; None when not known remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_etag: Option<String>,
    /// Whether the item is opted into local materialization and sync
    downloaded: bool,
    /// A previously-downloaded item was removed locally; the remote copy
    /// is preserved and the item stays out of sync until re-opt-in
    #[serde(default)]
    deleted_locally: bool,
    /// Timestamp of the last successful reconciliation touching this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_synced_at: Option<DateTime<Utc>>,
    /// Divergent edits were detected and a conflict artifact was written
    #[serde(default)]
    conflict_pending: bool,
    /// Current status in the record state machine
    status: RecordStatus,
    /// Last failed action's error message, cleared on the next success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl SyncRecord {
    /// Create a record for an item first observed locally
    #[must_use]
    pub fn from_local(
        path: ItemPath,
        kind: ItemKind,
        mtime: Option<DateTime<Utc>>,
        size: Option<u64>,
    ) -> Self {
        Self {
            path,
            kind,
            local_mtime: mtime,
            local_size: size,
            remote_id: None,
            remote_etag: None,
            downloaded: true,
            deleted_locally: false,
            last_synced_at: None,
            conflict_pending: false,
            status: RecordStatus::LocalModifiedPending,
            last_error: None,
        }
    }

    /// Create a cloud-only record for an item first observed remotely
    ///
    /// Cloud-only records are never written to the local filesystem until
    /// the user materializes them.
    #[must_use]
    pub fn from_remote(
        path: ItemPath,
        kind: ItemKind,
        remote_id: RemoteId,
        remote_etag: Option<String>,
    ) -> Self {
        Self {
            path,
            kind,
            local_mtime: None,
            local_size: None,
            remote_id: Some(remote_id),
            remote_etag,
            downloaded: false,
            deleted_locally: false,
            last_synced_at: None,
            conflict_pending: false,
            status: RecordStatus::CloudOnly,
            last_error: None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The path keying this record
    #[must_use]
    pub fn path(&self) -> &ItemPath {
        &self.path
    }

    /// File or folder
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Last observed local modification time
    #[must_use]
    pub fn local_mtime(&self) -> Option<DateTime<Utc>> {
        self.local_mtime
    }

    /// Last observed local size
    #[must_use]
    pub fn local_size(&self) -> Option<u64> {
        self.local_size
    }

    /// Last observed remote identity
    #[must_use]
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    /// Last observed remote version tag
    #[must_use]
    pub fn remote_etag(&self) -> Option<&str> {
        self.remote_etag.as_deref()
    }

    /// Whether the item is opted into local materialization
    #[must_use]
    pub fn downloaded(&self) -> bool {
        self.downloaded
    }

    /// Whether a previously-downloaded item was removed locally
    #[must_use]
    pub fn deleted_locally(&self) -> bool {
        self.deleted_locally
    }

    /// Timestamp of the last successful reconciliation
    #[must_use]
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Whether a conflict artifact is awaiting manual resolution
    #[must_use]
    pub fn conflict_pending(&self) -> bool {
        self.conflict_pending
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> RecordStatus {
        self.status
    }

    /// Last failed action's error message
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // ------------------------------------------------------------------
    // Status transitions
    // ------------------------------------------------------------------

    /// Attempt a status transition, enforcing the state machine
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTransition` if the move is not allowed
    pub fn transition_to(&mut self, target: RecordStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidTransition {
                from: self.status.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reconciliation outcomes
    // ------------------------------------------------------------------

    /// Record a successful sync: both sides now agree on this content
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTransition` if the record cannot reach
    /// `Synced` from its current status
    pub fn mark_synced(
        &mut self,
        remote_id: RemoteId,
        remote_etag: Option<String>,
        local_mtime: Option<DateTime<Utc>>,
        local_size: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(RecordStatus::Synced)?;
        self.remote_id = Some(remote_id);
        self.remote_etag = remote_etag;
        self.local_mtime = local_mtime;
        self.local_size = local_size;
        self.downloaded = true;
        self.deleted_locally = false;
        self.conflict_pending = false;
        self.last_synced_at = Some(now);
        self.last_error = None;
        Ok(())
    }

    /// Record a detected divergence: a conflict artifact was written
    ///
    /// The remote version tag observed at detection time is stored so the
    /// next cycle does not re-detect the same divergence.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTransition` if the record cannot reach
    /// `Conflicted` from its current status
    pub fn mark_conflicted(
        &mut self,
        remote_etag: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(RecordStatus::Conflicted)?;
        self.conflict_pending = true;
        self.remote_etag = remote_etag;
        self.last_synced_at = Some(now);
        Ok(())
    }

    /// Record a local deletion: the remote copy is preserved and the item
    /// leaves automatic sync until the user re-opts-in
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTransition` if the record cannot reach
    /// `CloudOnly` from its current status
    pub fn mark_deleted_locally(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(RecordStatus::CloudOnly)?;
        self.deleted_locally = true;
        self.downloaded = false;
        self.local_mtime = None;
        self.local_size = None;
        self.last_synced_at = Some(now);
        Ok(())
    }

    /// Enter deletion verification after a propagated delete
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTransition` if the record cannot reach
    /// `PendingDeleteVerification` from its current status
    pub fn mark_pending_delete_verification(&mut self) -> Result<(), DomainError> {
        self.transition_to(RecordStatus::PendingDeleteVerification)
    }

    /// Opt the item into local materialization (user "keep local copy")
    pub fn request_download(&mut self) {
        self.downloaded = true;
        self.deleted_locally = false;
        if self.status == RecordStatus::CloudOnly {
            self.status = RecordStatus::RemoteModifiedPending;
        }
    }

    /// Opt the item out of local materialization (user "free up space")
    pub fn request_evict(&mut self) {
        self.downloaded = false;
        self.local_mtime = None;
        self.local_size = None;
        self.status = RecordStatus::CloudOnly;
    }

    /// Refresh last observed local metadata
    pub fn observe_local(&mut self, mtime: Option<DateTime<Utc>>, size: Option<u64>) {
        self.local_mtime = mtime;
        self.local_size = size;
    }

    /// Refresh last observed remote identity without changing sync intent
    ///
    /// Used to keep cloud-only records current as the remote item moves
    /// through versions the local side never fetches.
    pub fn observe_remote(&mut self, remote_id: RemoteId, remote_etag: Option<String>) {
        self.remote_id = Some(remote_id);
        self.remote_etag = remote_etag;
    }

    /// Store a failed action's error for later inspection
    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}
