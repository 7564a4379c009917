//! Deletion verification
//!
//! A propagated remote deletion is not taken at face value. After the
//! local copy is trashed, the remote store is re-queried for the deleted
//! item's metadata until its absence is confirmed; only then does the
//! record leave the state table. Attempts are bounded and spaced by an
//! injectable [`BackoffPolicy`], and items whose absence was never
//! confirmed are surfaced rather than silently dropped.
//!
//! The verifier also owns the resurrection suppression set: for a short
//! window after a deletion propagates, a path reappearing locally is not
//! re-uploaded. Watcher races (a stale Created event arriving after the
//! trash) would otherwise resurrect the item on the remote side.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use nimbusdrive_core::domain::{ItemPath, RemoteId};
use nimbusdrive_core::ports::{IRemoteStore, IStateStore, RemoteStoreError};
use tracing::{debug, info, instrument, warn};

use crate::backoff::BackoffPolicy;

/// One deletion awaiting confirmation from the remote store.
#[derive(Debug, Clone)]
struct PendingDeletion {
    remote_id: RemoteId,
    /// Verification attempts made so far.
    attempts: u32,
    /// When the last attempt ran; None before the first.
    last_attempt: Option<Instant>,
}

/// A deletion whose remote absence could not be confirmed within the
/// attempt budget. Surfaced for user attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedDeletion {
    pub path: ItemPath,
    pub remote_id: RemoteId,
    pub attempts: u32,
}

/// Confirms propagated deletions and suppresses resurrections.
pub struct DeletionVerifier {
    remote: Arc<dyn IRemoteStore>,
    state: Arc<dyn IStateStore>,
    policy: Arc<dyn BackoffPolicy>,
    /// Deletions awaiting remote confirmation, keyed by path.
    pending: DashMap<ItemPath, PendingDeletion>,
    /// Recently deleted paths and when their suppression started.
    suppressed: DashMap<ItemPath, Instant>,
    suppression_window: Duration,
}

impl DeletionVerifier {
    /// Create a verifier over the given remote store and state table.
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        state: Arc<dyn IStateStore>,
        policy: Arc<dyn BackoffPolicy>,
        suppression_window: Duration,
    ) -> Self {
        Self {
            remote,
            state,
            policy,
            pending: DashMap::new(),
            suppressed: DashMap::new(),
            suppression_window,
        }
    }

    /// Register a just-trashed item for verification and start its
    /// suppression window.
    pub fn register(&self, path: ItemPath, remote_id: RemoteId) {
        debug!(path = %path, "deletion registered for verification");
        self.suppressed.insert(path.clone(), Instant::now());
        self.pending.insert(
            path,
            PendingDeletion {
                remote_id,
                attempts: 0,
                last_attempt: None,
            },
        );
    }

    /// Whether a path is inside its post-deletion suppression window.
    /// Expired entries are dropped on the way.
    pub fn is_suppressed(&self, path: &ItemPath) -> bool {
        if let Some(entry) = self.suppressed.get(path) {
            if entry.elapsed() < self.suppression_window {
                return true;
            }
        }
        self.suppressed.remove(path);
        false
    }

    /// The currently suppressed paths, with expired entries swept out.
    /// Fed to the reconciler at the start of each cycle.
    pub fn suppressed_paths(&self) -> HashSet<ItemPath> {
        self.suppressed
            .retain(|_, started| started.elapsed() < self.suppression_window);
        self.suppressed
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Deletions that exhausted their attempt budget without the remote
    /// store ever confirming absence.
    pub fn pending_attention(&self) -> Vec<UnverifiedDeletion> {
        self.pending
            .iter()
            .filter(|entry| entry.value().attempts >= self.policy.max_attempts())
            .map(|entry| UnverifiedDeletion {
                path: entry.key().clone(),
                remote_id: entry.value().remote_id.clone(),
                attempts: entry.value().attempts,
            })
            .collect()
    }

    /// Number of deletions still awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run one verification pass: re-query every due pending deletion.
    ///
    /// Confirmed absences remove the record (and, for folders, its
    /// subtree) from the state table. A metadata response showing the
    /// item still present consumes an attempt; transient errors only
    /// push the next try out by the backoff delay.
    #[instrument(skip(self))]
    pub async fn verify_pending(&self) -> anyhow::Result<()> {
        let due: Vec<(ItemPath, PendingDeletion)> = self
            .pending
            .iter()
            .filter(|entry| {
                let p = entry.value();
                p.attempts < self.policy.max_attempts()
                    && p.last_attempt
                        .map_or(true, |at| at.elapsed() >= self.policy.delay(p.attempts))
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (path, pending) in due {
            match self.remote.get_metadata(&pending.remote_id).await {
                Ok(None) | Err(RemoteStoreError::NotFound(_)) => {
                    info!(path = %path, "remote deletion confirmed; dropping record");
                    self.state.remove_subtree(&path).await?;
                    self.pending.remove(&path);
                }
                Ok(Some(_)) => {
                    let attempts = pending.attempts + 1;
                    if attempts >= self.policy.max_attempts() {
                        warn!(
                            path = %path,
                            attempts,
                            "remote item still present after deletion; giving up and surfacing"
                        );
                    } else {
                        debug!(path = %path, attempts, "remote item still present; will re-verify");
                    }
                    self.pending.insert(
                        path,
                        PendingDeletion {
                            remote_id: pending.remote_id,
                            attempts,
                            last_attempt: Some(Instant::now()),
                        },
                    );
                }
                Err(err) => {
                    debug!(path = %path, error = %err, "verification query failed; will retry");
                    self.pending.insert(
                        path,
                        PendingDeletion {
                            last_attempt: Some(Instant::now()),
                            ..pending
                        },
                    );
                }
            }
        }

        Ok(())
    }
}
