//! The reconciliation decision engine
//!
//! Pure planning over three sets: what the filesystem walk saw
//! (LocalSet), what the remote enumeration returned (RemoteSet), and
//! what the state snapshot remembers (StateSet), plus the deletion
//! verifier's resurrection suppression set. For every path in the union
//! a single decision is produced; no I/O happens here, so every row of
//! the decision table is testable without adapters.
//!
//! Authority is asymmetric: a remote deletion propagates to the local
//! side (via trash), a local deletion never touches the remote copy.
//! Items tracked with `downloaded = false` exist only as records and are
//! never materialized.

use std::collections::{BTreeMap, HashSet};

use nimbusdrive_core::domain::{ItemKind, ItemPath, RecordStatus, RemoteId, SyncRecord};
use nimbusdrive_core::ports::{LocalEntry, RemoteEntry};
use tracing::{debug, info};

// ============================================================================
// Planned actions
// ============================================================================

/// One decision for one path. The executor carries these out; at most
/// one action exists per path per cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// Send local content to the remote store (create or replace)
    Upload { path: ItemPath, kind: ItemKind },
    /// Fetch remote content and write it at the tracked path
    Download { path: ItemPath, remote: RemoteEntry },
    /// Create a tracked remote folder locally
    CreateLocalFolder { path: ItemPath, remote: RemoteEntry },
    /// Divergent edits: write the remote content to the `.conflict`
    /// sibling and flag the record; the local file is left untouched.
    /// `write_artifact` is false when the remote side is a folder (kind
    /// tie-break) and there is no content to fetch.
    WriteConflict {
        path: ItemPath,
        remote: RemoteEntry,
        write_artifact: bool,
    },
    /// Same content on both sides with no usable prior state: adopt the
    /// remote identity instead of uploading a duplicate
    AdoptRemote {
        path: ItemPath,
        remote: RemoteEntry,
        local: LocalEntry,
    },
    /// Track a newly discovered remote item without materializing it
    CreateCloudOnlyRecord { path: ItemPath, remote: RemoteEntry },
    /// Refresh the stored remote identity of a cloud-only record
    RefreshCloudOnlyRecord { path: ItemPath, remote: RemoteEntry },
    /// Remote deletion propagating: move the local copy to trash and
    /// enter deletion verification
    TrashLocal {
        path: ItemPath,
        kind: ItemKind,
        remote_id: RemoteId,
    },
    /// Local deletion detected: preserve the remote copy, flag the
    /// record, and stop syncing until the user re-opts-in
    MarkDeletedLocally { path: ItemPath },
    /// Both sides agree the item is gone; drop the record
    RemoveRecord { path: ItemPath },
}

impl PlannedAction {
    /// The path this action touches.
    #[must_use]
    pub fn path(&self) -> &ItemPath {
        match self {
            Self::Upload { path, .. }
            | Self::Download { path, .. }
            | Self::CreateLocalFolder { path, .. }
            | Self::WriteConflict { path, .. }
            | Self::AdoptRemote { path, .. }
            | Self::CreateCloudOnlyRecord { path, .. }
            | Self::RefreshCloudOnlyRecord { path, .. }
            | Self::TrashLocal { path, .. }
            | Self::MarkDeletedLocally { path }
            | Self::RemoveRecord { path } => path,
        }
    }

    /// True for actions that remove local content. These are ordered
    /// depth-first (deepest path first) and executed sequentially so a
    /// folder's descendants are gone before the folder itself.
    #[must_use]
    pub fn is_local_delete(&self) -> bool {
        matches!(self, Self::TrashLocal { .. })
    }
}

/// The full decision set for one cycle.
#[derive(Debug, Default)]
pub struct Plan {
    /// Ordered actions: transfers and record maintenance in path order,
    /// then local deletions deepest-first.
    pub actions: Vec<PlannedAction>,
    /// Paths whose re-upload was blocked by the resurrection
    /// suppression window.
    pub blocked: Vec<ItemPath>,
}

impl Plan {
    /// True when the cycle has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// The decision engine. Stateless; all inputs arrive per cycle.
pub struct Reconciler;

impl Reconciler {
    /// Compute the decision set for one cycle.
    pub fn plan(
        local: &BTreeMap<ItemPath, LocalEntry>,
        remote: &BTreeMap<ItemPath, RemoteEntry>,
        state: &BTreeMap<ItemPath, SyncRecord>,
        suppressed: &HashSet<ItemPath>,
    ) -> Plan {
        let mut union: HashSet<&ItemPath> = HashSet::new();
        union.extend(local.keys());
        union.extend(remote.keys());
        union.extend(state.keys());

        let mut ordered: Vec<&ItemPath> = union.into_iter().collect();
        ordered.sort();

        let mut actions = Vec::new();
        let mut deletes = Vec::new();
        let mut blocked = Vec::new();

        for path in ordered {
            let decision = Self::decide(
                path,
                local.get(path),
                remote.get(path),
                state.get(path),
                suppressed,
            );
            match decision {
                Decision::Nothing => {}
                Decision::Blocked => {
                    info!(path = %path, "upload blocked: path is inside the post-deletion suppression window");
                    blocked.push(path.clone());
                }
                Decision::Act(action) if action.is_local_delete() => deletes.push(action),
                Decision::Act(action) => actions.push(action),
            }
        }

        // Descendants must be trashed before their parent folder.
        deletes.sort_by(|a, b| {
            b.path()
                .depth()
                .cmp(&a.path().depth())
                .then_with(|| a.path().cmp(b.path()))
        });
        actions.extend(deletes);

        debug!(
            actions = actions.len(),
            blocked = blocked.len(),
            "cycle plan computed"
        );
        Plan { actions, blocked }
    }

    /// The decision table, applied to a single path.
    fn decide(
        path: &ItemPath,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
        record: Option<&SyncRecord>,
        suppressed: &HashSet<ItemPath>,
    ) -> Decision {
        // Paths awaiting delete verification belong to the verifier; the
        // reconciler never races it.
        if let Some(rec) = record {
            if rec.status() == RecordStatus::PendingDeleteVerification {
                return Decision::Nothing;
            }
        }

        match (local, remote, record) {
            // ----------------------------------------------------------
            // Present on both sides
            // ----------------------------------------------------------
            (Some(l), Some(r), Some(rec)) if rec.downloaded() => {
                if l.kind != r.kind {
                    // A file on one side, a folder on the other. The
                    // record's kind matches at most one of them, which is
                    // not enough to pick an authority. The conflict is
                    // surfaced once per remote version: the record keeps
                    // the etag seen at detection time, and the table stays
                    // quiet until either side actually changes.
                    if rec.status() == RecordStatus::Conflicted
                        && rec.remote_etag() == Some(r.etag.as_str())
                    {
                        return Decision::Nothing;
                    }
                    return Decision::Act(PlannedAction::WriteConflict {
                        path: path.clone(),
                        remote: r.clone(),
                        write_artifact: r.kind == ItemKind::File,
                    });
                }

                if l.kind == ItemKind::Folder {
                    // Folders carry no content; just make sure the record
                    // reflects the current remote identity.
                    if rec.status() != RecordStatus::Synced
                        || rec.remote_id() != Some(&r.id)
                    {
                        return Decision::Act(PlannedAction::AdoptRemote {
                            path: path.clone(),
                            remote: r.clone(),
                            local: l.clone(),
                        });
                    }
                    return Decision::Nothing;
                }

                let local_changed =
                    rec.local_mtime() != l.mtime || rec.local_size() != l.size;
                let remote_changed = rec.remote_etag() != Some(r.etag.as_str());

                match (local_changed, remote_changed) {
                    (false, false) => Decision::Nothing,
                    (true, false) => Decision::Act(PlannedAction::Upload {
                        path: path.clone(),
                        kind: l.kind,
                    }),
                    (false, true) => Decision::Act(PlannedAction::Download {
                        path: path.clone(),
                        remote: r.clone(),
                    }),
                    (true, true) => Decision::Act(PlannedAction::WriteConflict {
                        path: path.clone(),
                        remote: r.clone(),
                        write_artifact: true,
                    }),
                }
            }

            // Both present but the record opted out of local sync, or no
            // record at all: a local twin of a remote item has appeared.
            (Some(l), Some(r), _) => Self::decide_adoption(path, l, r),

            // ----------------------------------------------------------
            // Present locally only
            // ----------------------------------------------------------
            (Some(l), None, record) => {
                if suppressed.contains(path) {
                    return Decision::Blocked;
                }
                match record
                    .filter(|rec| rec.downloaded())
                    .and_then(|rec| rec.remote_id())
                {
                    // Tracked, previously uploaded, and now missing from
                    // the remote listing: the remote deletion wins.
                    Some(id) => Decision::Act(PlannedAction::TrashLocal {
                        path: path.clone(),
                        kind: l.kind,
                        remote_id: id.clone(),
                    }),
                    // Never reached the remote yet (or the record opted
                    // out and the user created new content): upload.
                    None => Decision::Act(PlannedAction::Upload {
                        path: path.clone(),
                        kind: l.kind,
                    }),
                }
            }

            // ----------------------------------------------------------
            // Present remotely only
            // ----------------------------------------------------------
            (None, Some(r), None) => Decision::Act(PlannedAction::CreateCloudOnlyRecord {
                path: path.clone(),
                remote: r.clone(),
            }),
            (None, Some(r), Some(rec)) => {
                if !rec.downloaded() {
                    // Cloud-only (including locally-deleted items waiting
                    // for re-opt-in): keep the stored identity fresh.
                    if rec.remote_id() != Some(&r.id)
                        || rec.remote_etag() != Some(r.etag.as_str())
                    {
                        return Decision::Act(PlannedAction::RefreshCloudOnlyRecord {
                            path: path.clone(),
                            remote: r.clone(),
                        });
                    }
                    return Decision::Nothing;
                }

                if rec.local_mtime().is_some() {
                    // Was materialized and is now gone: a local deletion.
                    // The remote copy is left untouched.
                    return Decision::Act(PlannedAction::MarkDeletedLocally {
                        path: path.clone(),
                    });
                }

                // Opted in but never materialized: fetch it.
                if r.kind == ItemKind::Folder {
                    Decision::Act(PlannedAction::CreateLocalFolder {
                        path: path.clone(),
                        remote: r.clone(),
                    })
                } else {
                    Decision::Act(PlannedAction::Download {
                        path: path.clone(),
                        remote: r.clone(),
                    })
                }
            }

            // ----------------------------------------------------------
            // Gone from both sides
            // ----------------------------------------------------------
            (None, None, Some(_)) => Decision::Act(PlannedAction::RemoveRecord {
                path: path.clone(),
            }),
            (None, None, None) => Decision::Nothing,
        }
    }

    /// A local item and a remote item share a path with no usable prior
    /// state. Sizes matching is taken as "same content" and the remote
    /// identity is adopted; this can conflate distinct files of equal
    /// size, since the remote contract exposes no content hash to check
    /// against. Differing sizes are a conflict, never a guess.
    fn decide_adoption(path: &ItemPath, l: &LocalEntry, r: &RemoteEntry) -> Decision {
        if l.kind != r.kind {
            return Decision::Act(PlannedAction::WriteConflict {
                path: path.clone(),
                remote: r.clone(),
                write_artifact: r.kind == ItemKind::File,
            });
        }

        if l.kind == ItemKind::Folder || l.size == r.size {
            if l.kind == ItemKind::File {
                info!(path = %path, size = ?l.size, "adopting remote identity for same-sized local twin");
            }
            return Decision::Act(PlannedAction::AdoptRemote {
                path: path.clone(),
                remote: r.clone(),
                local: l.clone(),
            });
        }

        Decision::Act(PlannedAction::WriteConflict {
            path: path.clone(),
            remote: r.clone(),
            write_artifact: true,
        })
    }
}

enum Decision {
    Nothing,
    Blocked,
    Act(PlannedAction),
}
