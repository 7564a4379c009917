//! Reconciliation engine for nimbusdrive
//!
//! This crate contains the moving parts that keep a local subtree and a
//! remote content store consistent:
//!
//! - [`watcher`] - normalized, debounced local change notifications
//! - [`enumerator`] - complete point-in-time remote listings
//! - [`reconciler`] - the pure decision engine over Local/Remote/State sets
//! - [`executor`] - carries decisions out with timeouts, retry, and
//!   bounded parallelism
//! - [`verifier`] - confirms propagated deletions and suppresses
//!   resurrection races
//! - [`engine`] - one reconciliation cycle end to end, plus the
//!   materialize/evict user operations
//! - [`scheduler`] - the long-lived loop tying events, the periodic
//!   timer, and the forced-sync trigger together
//! - [`filesystem`] - the local filesystem adapter (walk, atomic writes,
//!   trash)

use nimbusdrive_core::domain::DomainError;
use nimbusdrive_core::ports::RemoteStoreError;
use thiserror::Error;

pub mod backoff;
pub mod engine;
pub mod enumerator;
pub mod executor;
pub mod filesystem;
pub mod reconciler;
pub mod scheduler;
pub mod verifier;
pub mod watcher;

/// Errors produced by the sync engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote store failure, classified by the port taxonomy
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteStoreError),

    /// Domain validation or transition failure
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Local filesystem adapter failure
    #[error("Local filesystem error: {0}")]
    Local(#[source] anyhow::Error),

    /// State store failure
    #[error("State store error: {0}")]
    State(#[source] anyhow::Error),

    /// An operation referenced a path with no record
    #[error("Path is not tracked: {0}")]
    NotTracked(nimbusdrive_core::domain::ItemPath),
}

impl SyncError {
    /// Returns true if this error means credentials must be refreshed
    /// before another cycle can proceed
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Remote(RemoteStoreError::Authentication(_)))
    }
}
