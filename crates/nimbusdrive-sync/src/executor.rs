//! Action execution
//!
//! Carries out the reconciler's plan against the real adapters. Remote
//! calls get a per-call timeout and transient failures are retried with
//! the injected [`BackoffPolicy`]; an item that exhausts its retries is
//! deferred to a later cycle with its error stored on the record, while
//! an authentication failure aborts the whole cycle since every further
//! remote call would fail the same way.
//!
//! Transfers and record maintenance run in parallel up to the worker
//! limit. Local deletions run afterwards, one at a time, in the
//! deepest-first order the reconciler produced.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nimbusdrive_core::domain::{ItemKind, ItemPath, RecordStatus, RemoteId, SyncRecord};
use nimbusdrive_core::ports::{
    ILocalFileSystem, IRemoteStore, IStateStore, LocalEntry, RemoteEntry, RemoteStoreError,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::reconciler::{Plan, PlannedAction};
use crate::verifier::DeletionVerifier;
use crate::SyncError;

// ============================================================================
// Execution report
// ============================================================================

/// What one executed plan actually did.
#[derive(Debug, Default, Clone)]
pub struct ExecutionReport {
    pub uploads: usize,
    pub downloads: usize,
    pub conflicts: usize,
    pub adopted: usize,
    pub trashed: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub records_removed: usize,
    /// Items whose action failed and will be retried next cycle.
    pub deferred: usize,
    pub item_errors: Vec<(ItemPath, String)>,
}

impl ExecutionReport {
    /// True when every planned action completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.deferred == 0 && self.item_errors.is_empty()
    }

    fn absorb(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Uploaded => self.uploads += 1,
            Outcome::Downloaded => self.downloads += 1,
            Outcome::Conflict => self.conflicts += 1,
            Outcome::Adopted => self.adopted += 1,
            Outcome::Trashed => self.trashed += 1,
            Outcome::RecordCreated => self.records_created += 1,
            Outcome::RecordUpdated => self.records_updated += 1,
            Outcome::RecordRemoved => self.records_removed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Uploaded,
    Downloaded,
    Conflict,
    Adopted,
    Trashed,
    RecordCreated,
    RecordUpdated,
    RecordRemoved,
}

// ============================================================================
// Executor
// ============================================================================

/// Executes planned actions against the local and remote adapters.
pub struct ActionExecutor {
    local: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    state: Arc<dyn IStateStore>,
    verifier: Arc<DeletionVerifier>,
    policy: Arc<dyn BackoffPolicy>,
    root: PathBuf,
    remote_timeout: Duration,
    worker_count: usize,
}

impl ActionExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        state: Arc<dyn IStateStore>,
        verifier: Arc<DeletionVerifier>,
        policy: Arc<dyn BackoffPolicy>,
        root: PathBuf,
        remote_timeout: Duration,
        worker_count: usize,
    ) -> Self {
        Self {
            local,
            remote,
            state,
            verifier,
            policy,
            root,
            remote_timeout,
            worker_count: worker_count.max(1),
        }
    }

    /// Execute one plan.
    ///
    /// # Errors
    /// Returns an error only for failures that invalidate the whole
    /// cycle (authentication); per-item failures are deferred and
    /// reported, not raised.
    #[instrument(skip_all, fields(actions = plan.actions.len()))]
    pub async fn execute(self: &Arc<Self>, plan: Plan) -> Result<ExecutionReport, SyncError> {
        let (deletes, transfers): (Vec<_>, Vec<_>) = plan
            .actions
            .into_iter()
            .partition(PlannedAction::is_local_delete);

        let mut report = ExecutionReport::default();
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks = JoinSet::new();

        for action in transfers {
            let executor = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let path = action.path().clone();
                (path, executor.dispatch(action).await)
            });
        }

        let mut auth_failure: Option<SyncError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.absorb(outcome),
                Ok((path, Err(err))) if err.is_authentication() => {
                    if auth_failure.is_none() {
                        warn!(path = %path, error = %err, "authentication failure; aborting cycle");
                        auth_failure = Some(err);
                    }
                }
                Ok((path, Err(err))) => self.defer(&path, &err, &mut report).await,
                Err(join_err) => warn!(error = %join_err, "action task failed to complete"),
            }
        }
        if let Some(err) = auth_failure {
            return Err(err);
        }

        for action in deletes {
            let path = action.path().clone();
            match self.dispatch(action).await {
                Ok(outcome) => report.absorb(outcome),
                Err(err) if err.is_authentication() => return Err(err),
                Err(err) => {
                    // A failed deletion aborts the phase so a parent
                    // folder is never trashed past a surviving child;
                    // the whole subtree is re-planned next cycle.
                    self.defer(&path, &err, &mut report).await;
                    warn!(path = %path, "local deletion failed; deferring the rest of the delete phase");
                    break;
                }
            }
        }

        Ok(report)
    }

    pub(crate) async fn run_action(&self, action: PlannedAction) -> Result<(), SyncError> {
        self.dispatch(action).await.map(|_| ())
    }

    async fn dispatch(&self, action: PlannedAction) -> Result<Outcome, SyncError> {
        match action {
            PlannedAction::Upload { path, kind } => self.upload(path, kind).await,
            PlannedAction::Download { path, remote } => self.download(path, remote).await,
            PlannedAction::CreateLocalFolder { path, remote } => {
                self.create_local_folder(path, remote).await
            }
            PlannedAction::WriteConflict {
                path,
                remote,
                write_artifact,
            } => self.write_conflict(path, remote, write_artifact).await,
            PlannedAction::AdoptRemote {
                path,
                remote,
                local,
            } => self.adopt(path, remote, local).await,
            PlannedAction::CreateCloudOnlyRecord { path, remote } => {
                self.create_cloud_only(path, remote).await
            }
            PlannedAction::RefreshCloudOnlyRecord { path, remote } => {
                self.refresh_cloud_only(path, remote).await
            }
            PlannedAction::TrashLocal {
                path,
                kind,
                remote_id,
            } => self.trash_local(path, kind, remote_id).await,
            PlannedAction::MarkDeletedLocally { path } => self.mark_deleted_locally(path).await,
            PlannedAction::RemoveRecord { path } => self.remove_record(path).await,
        }
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    async fn upload(&self, path: ItemPath, kind: ItemKind) -> Result<Outcome, SyncError> {
        let abs = path.to_local(&self.root);
        let data = match kind {
            ItemKind::File => self.local.read_file(&abs).await.map_err(SyncError::Local)?,
            ItemKind::Folder => Vec::new(),
        };

        let entry = self
            .with_retry("upload", &path, || {
                let remote = Arc::clone(&self.remote);
                let path = path.clone();
                let data = data.clone();
                async move { remote.upload(&path, kind, &data).await }
            })
            .await?;

        // Re-observe local metadata after the transfer so a write that
        // raced the upload shows up as a change next cycle.
        let meta = self.local.metadata(&abs).await.map_err(SyncError::Local)?;
        let (mtime, size) = meta.map_or((None, None), |m| (m.mtime, m.size));

        let mut rec = match self.state.get(&path).await.map_err(SyncError::State)? {
            Some(existing) => existing,
            None => SyncRecord::from_local(path.clone(), kind, mtime, size),
        };
        rec.mark_synced(entry.id, Some(entry.etag), mtime, size, Utc::now())?;
        self.state.put(rec).await.map_err(SyncError::State)?;

        info!(path = %path, kind = kind.name(), "uploaded");
        Ok(Outcome::Uploaded)
    }

    async fn download(&self, path: ItemPath, remote: RemoteEntry) -> Result<Outcome, SyncError> {
        let data = self
            .with_retry("download", &path, || {
                let store = Arc::clone(&self.remote);
                let id = remote.id.clone();
                async move { store.download(&id).await }
            })
            .await?;

        let abs = path.to_local(&self.root);
        self.local
            .write_file(&abs, &data)
            .await
            .map_err(SyncError::Local)?;
        let meta = self.local.metadata(&abs).await.map_err(SyncError::Local)?;
        let (mtime, size) = meta.map_or((None, None), |m| (m.mtime, m.size));

        let mut rec = match self.state.get(&path).await.map_err(SyncError::State)? {
            Some(existing) => existing,
            None => SyncRecord::from_remote(
                path.clone(),
                remote.kind,
                remote.id.clone(),
                Some(remote.etag.clone()),
            ),
        };
        rec.mark_synced(
            remote.id.clone(),
            Some(remote.etag.clone()),
            mtime,
            size,
            Utc::now(),
        )?;
        self.state.put(rec).await.map_err(SyncError::State)?;

        info!(path = %path, bytes = data.len(), "downloaded");
        Ok(Outcome::Downloaded)
    }

    async fn create_local_folder(
        &self,
        path: ItemPath,
        remote: RemoteEntry,
    ) -> Result<Outcome, SyncError> {
        let abs = path.to_local(&self.root);
        self.local
            .create_directory(&abs)
            .await
            .map_err(SyncError::Local)?;

        // Record the observed directory mtime; a record with no local
        // observation reads as "never materialized", which would turn a
        // later local delete of this folder into a re-create.
        let meta = self.local.metadata(&abs).await.map_err(SyncError::Local)?;
        let (mtime, size) = meta.map_or((None, None), |m| (m.mtime, m.size));

        let mut rec = match self.state.get(&path).await.map_err(SyncError::State)? {
            Some(existing) => existing,
            None => SyncRecord::from_remote(
                path.clone(),
                ItemKind::Folder,
                remote.id.clone(),
                Some(remote.etag.clone()),
            ),
        };
        rec.mark_synced(
            remote.id.clone(),
            Some(remote.etag.clone()),
            mtime,
            size,
            Utc::now(),
        )?;
        self.state.put(rec).await.map_err(SyncError::State)?;

        info!(path = %path, "folder materialized");
        Ok(Outcome::Downloaded)
    }

    // ------------------------------------------------------------------
    // Conflicts and adoption
    // ------------------------------------------------------------------

    async fn write_conflict(
        &self,
        path: ItemPath,
        remote: RemoteEntry,
        write_artifact: bool,
    ) -> Result<Outcome, SyncError> {
        // Fetch the remote content into the artifact sibling; the local
        // file stays exactly as the user left it. A remote folder has no
        // content to capture.
        if write_artifact {
            let data = self
                .with_retry("download", &path, || {
                    let store = Arc::clone(&self.remote);
                    let id = remote.id.clone();
                    async move { store.download(&id).await }
                })
                .await?;
            let artifact = path.conflict_sibling().to_local(&self.root);
            self.local
                .write_file(&artifact, &data)
                .await
                .map_err(SyncError::Local)?;
        }

        let abs = path.to_local(&self.root);
        let meta = self.local.metadata(&abs).await.map_err(SyncError::Local)?;

        let mut rec = match self.state.get(&path).await.map_err(SyncError::State)? {
            Some(existing) if existing.status().can_transition_to(RecordStatus::Conflicted) => {
                existing
            }
            // No usable prior record (first observation, or a cloud-only
            // record whose path grew a conflicting local twin).
            _ => {
                let kind = meta.as_ref().map_or(ItemKind::File, |m| m.kind);
                SyncRecord::from_local(path.clone(), kind, None, None)
            }
        };
        if let Some(m) = meta {
            rec.observe_local(m.mtime, m.size);
        }
        rec.observe_remote(remote.id.clone(), Some(remote.etag.clone()));
        rec.mark_conflicted(Some(remote.etag), Utc::now())?;
        self.state.put(rec).await.map_err(SyncError::State)?;

        warn!(path = %path, "divergent edits; conflict artifact written, manual resolution required");
        Ok(Outcome::Conflict)
    }

    async fn adopt(
        &self,
        path: ItemPath,
        remote: RemoteEntry,
        local: LocalEntry,
    ) -> Result<Outcome, SyncError> {
        let mut rec = match self.state.get(&path).await.map_err(SyncError::State)? {
            Some(existing) => existing,
            None => SyncRecord::from_local(path.clone(), local.kind, local.mtime, local.size),
        };
        rec.mark_synced(
            remote.id.clone(),
            Some(remote.etag.clone()),
            local.mtime,
            local.size,
            Utc::now(),
        )?;
        self.state.put(rec).await.map_err(SyncError::State)?;

        debug!(path = %path, remote_id = %remote.id, "adopted remote identity");
        Ok(Outcome::Adopted)
    }

    // ------------------------------------------------------------------
    // Record maintenance
    // ------------------------------------------------------------------

    async fn create_cloud_only(
        &self,
        path: ItemPath,
        remote: RemoteEntry,
    ) -> Result<Outcome, SyncError> {
        let rec = SyncRecord::from_remote(
            path.clone(),
            remote.kind,
            remote.id,
            Some(remote.etag),
        );
        self.state.put(rec).await.map_err(SyncError::State)?;

        debug!(path = %path, "remote item tracked as cloud-only");
        Ok(Outcome::RecordCreated)
    }

    async fn refresh_cloud_only(
        &self,
        path: ItemPath,
        remote: RemoteEntry,
    ) -> Result<Outcome, SyncError> {
        match self.state.get(&path).await.map_err(SyncError::State)? {
            Some(mut rec) => {
                rec.observe_remote(remote.id, Some(remote.etag));
                self.state.put(rec).await.map_err(SyncError::State)?;
                Ok(Outcome::RecordUpdated)
            }
            None => self.create_cloud_only(path, remote).await,
        }
    }

    async fn trash_local(
        &self,
        path: ItemPath,
        kind: ItemKind,
        remote_id: RemoteId,
    ) -> Result<Outcome, SyncError> {
        let abs = path.to_local(&self.root);
        if let Err(err) = self.local.move_to_trash(&abs).await {
            warn!(path = %path, error = %err, "trash unavailable; removing permanently");
            self.local.remove(&abs).await.map_err(SyncError::Local)?;
        }

        if let Some(mut rec) = self.state.get(&path).await.map_err(SyncError::State)? {
            rec.mark_pending_delete_verification()?;
            self.state.put(rec).await.map_err(SyncError::State)?;
        }
        self.verifier.register(path.clone(), remote_id);

        info!(path = %path, kind = kind.name(), "remote deletion propagated; local copy trashed");
        Ok(Outcome::Trashed)
    }

    async fn mark_deleted_locally(&self, path: ItemPath) -> Result<Outcome, SyncError> {
        if let Some(mut rec) = self.state.get(&path).await.map_err(SyncError::State)? {
            rec.mark_deleted_locally(Utc::now())?;
            self.state.put(rec).await.map_err(SyncError::State)?;
            info!(path = %path, "local deletion recorded; remote copy preserved");
        }
        Ok(Outcome::RecordUpdated)
    }

    async fn remove_record(&self, path: ItemPath) -> Result<Outcome, SyncError> {
        self.state.delete(&path).await.map_err(SyncError::State)?;
        debug!(path = %path, "record removed; both sides gone");
        Ok(Outcome::RecordRemoved)
    }

    // ------------------------------------------------------------------
    // Retry plumbing
    // ------------------------------------------------------------------

    /// Run a remote call under the per-call timeout, retrying transient
    /// failures per the backoff policy. A rate-limit response with a
    /// server-provided delay overrides the policy's delay.
    async fn with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        path: &ItemPath,
        mut call: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteStoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.remote_timeout, call()).await {
                Ok(inner) => inner,
                Err(_) => Err(RemoteStoreError::Timeout(self.remote_timeout.as_secs())),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.policy.max_attempts() => {
                    let delay = match &err {
                        RemoteStoreError::RateLimited {
                            retry_after_secs: Some(secs),
                        } => Duration::from_secs(*secs),
                        _ => self.policy.delay(attempt),
                    };
                    warn!(
                        op,
                        path = %path,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient remote failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(SyncError::Remote(err)),
            }
        }
    }

    async fn defer(&self, path: &ItemPath, err: &SyncError, report: &mut ExecutionReport) {
        warn!(path = %path, error = %err, "action deferred to a later cycle");
        report.deferred += 1;
        report.item_errors.push((path.clone(), err.to_string()));

        match self.state.get(path).await {
            Ok(Some(mut rec)) => {
                rec.set_last_error(err.to_string());
                if let Err(put_err) = self.state.put(rec).await {
                    warn!(path = %path, error = %put_err, "failed to store item error");
                }
            }
            Ok(None) => {}
            Err(get_err) => {
                warn!(path = %path, error = %get_err, "state lookup failed while deferring")
            }
        }
    }
}
