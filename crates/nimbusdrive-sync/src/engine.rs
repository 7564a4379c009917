//! One reconciliation cycle end to end
//!
//! [`SyncEngine`] wires the enumerator, walk, snapshot, reconciler,
//! executor, and deletion verifier into a single `run_cycle` operation,
//! and exposes the two user-facing per-item operations: `materialize`
//! (fetch a cloud-only item now) and `evict` (drop the local copy while
//! keeping the item tracked).
//!
//! A cycle observes first and mutates second: the remote enumeration,
//! local walk, and state snapshot are all taken before any action runs,
//! and an enumeration failure fails the cycle before anything changes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nimbusdrive_core::config::Config;
use nimbusdrive_core::domain::{DomainError, ItemKind, ItemPath, SyncRecord};
use nimbusdrive_core::ports::{
    ILocalFileSystem, IRemoteStore, IStateStore, LocalEntry, RemoteStoreError,
};
use tracing::{info, instrument, warn};

use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::enumerator::RemoteEnumerator;
use crate::executor::{ActionExecutor, ExecutionReport};
use crate::reconciler::{PlannedAction, Reconciler};
use crate::verifier::{DeletionVerifier, UnverifiedDeletion};
use crate::SyncError;

/// What one reconciliation cycle accomplished.
#[derive(Debug, Clone)]
pub struct CycleResult {
    /// Per-action counters and deferred items.
    pub report: ExecutionReport,
    /// Paths whose re-upload the suppression window blocked.
    pub blocked: Vec<ItemPath>,
    /// Deletions that exhausted verification without confirmation.
    pub pending_attention: Vec<UnverifiedDeletion>,
    pub duration: Duration,
}

/// Drives reconciliation cycles over the configured sync root.
pub struct SyncEngine {
    root: PathBuf,
    local: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    state: Arc<dyn IStateStore>,
    enumerator: RemoteEnumerator,
    executor: Arc<ActionExecutor>,
    verifier: Arc<DeletionVerifier>,
}

impl SyncEngine {
    /// Build an engine with backoff policies derived from the config.
    pub fn new(
        config: &Config,
        local: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        state: Arc<dyn IStateStore>,
    ) -> Self {
        let retry = Arc::new(ExponentialBackoff::new(
            Duration::from_secs(config.retry.base_delay),
            config.retry.max_attempts,
        ));
        let verify = Arc::new(ExponentialBackoff::new(
            Duration::from_secs(config.retry.base_delay),
            config.deletion.verify_attempts,
        ));
        Self::with_policies(config, local, remote, state, retry, verify)
    }

    /// Build an engine with explicit backoff policies. Tests inject
    /// zero-delay policies here.
    pub fn with_policies(
        config: &Config,
        local: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        state: Arc<dyn IStateStore>,
        retry_policy: Arc<dyn BackoffPolicy>,
        verify_policy: Arc<dyn BackoffPolicy>,
    ) -> Self {
        let verifier = Arc::new(DeletionVerifier::new(
            Arc::clone(&remote),
            Arc::clone(&state),
            verify_policy,
            Duration::from_secs(config.deletion.suppression_window),
        ));
        let executor = Arc::new(ActionExecutor::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            Arc::clone(&state),
            Arc::clone(&verifier),
            retry_policy,
            config.sync.root.clone(),
            Duration::from_secs(config.retry.remote_timeout),
            config.sync.worker_count,
        ));
        Self {
            root: config.sync.root.clone(),
            enumerator: RemoteEnumerator::new(Arc::clone(&remote)),
            local,
            remote,
            state,
            executor,
            verifier,
        }
    }

    /// Run one full reconciliation cycle.
    ///
    /// # Errors
    /// Fails without mutating anything if the remote enumeration, local
    /// walk, or state snapshot fails; fails mid-cycle (with state
    /// flushed) on an authentication error.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleResult, SyncError> {
        let started = Instant::now();

        let remote_listing = self.enumerator.enumerate().await?;
        self.local
            .create_directory(&self.root)
            .await
            .map_err(SyncError::Local)?;
        let local_entries = self.local.walk(&self.root).await.map_err(SyncError::Local)?;
        let local_map: BTreeMap<ItemPath, LocalEntry> = local_entries
            .into_iter()
            .map(|entry| (entry.path.clone(), entry))
            .collect();
        let snapshot = self.state.snapshot().await.map_err(SyncError::State)?;
        let state_map: BTreeMap<ItemPath, SyncRecord> = snapshot
            .into_iter()
            .map(|rec| (rec.path().clone(), rec))
            .collect();

        let suppressed = self.verifier.suppressed_paths();
        let plan = Reconciler::plan(&local_map, &remote_listing, &state_map, &suppressed);
        let blocked = plan.blocked.clone();

        let report = match self.executor.execute(plan).await {
            Ok(report) => report,
            Err(err) => {
                // Keep whatever landed before the abort.
                if let Err(flush_err) = self.state.flush().await {
                    warn!(error = %flush_err, "state flush failed after aborted cycle");
                }
                return Err(err);
            }
        };

        self.verifier
            .verify_pending()
            .await
            .map_err(SyncError::State)?;
        self.state.flush().await.map_err(SyncError::State)?;

        let result = CycleResult {
            blocked,
            pending_attention: self.verifier.pending_attention(),
            duration: started.elapsed(),
            report,
        };
        info!(
            uploads = result.report.uploads,
            downloads = result.report.downloads,
            conflicts = result.report.conflicts,
            trashed = result.report.trashed,
            deferred = result.report.deferred,
            blocked = result.blocked.len(),
            duration_ms = result.duration.as_millis() as u64,
            "cycle complete"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Per-item operations
    // ------------------------------------------------------------------

    /// Fetch a tracked cloud-only item to the local filesystem now.
    ///
    /// # Errors
    /// Fails if the path has no record, the record has no remote
    /// identity, or the item no longer exists remotely.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn materialize(&self, path: &ItemPath) -> Result<(), SyncError> {
        let mut rec = self
            .state
            .get(path)
            .await
            .map_err(SyncError::State)?
            .ok_or_else(|| SyncError::NotTracked(path.clone()))?;
        let id = rec
            .remote_id()
            .cloned()
            .ok_or_else(|| SyncError::NotTracked(path.clone()))?;

        rec.request_download();
        self.state.put(rec).await.map_err(SyncError::State)?;

        let entry = self
            .remote
            .get_metadata(&id)
            .await?
            .ok_or_else(|| SyncError::Remote(RemoteStoreError::NotFound(id.to_string())))?;
        let action = match entry.kind {
            ItemKind::Folder => PlannedAction::CreateLocalFolder {
                path: path.clone(),
                remote: entry,
            },
            ItemKind::File => PlannedAction::Download {
                path: path.clone(),
                remote: entry,
            },
        };
        self.executor.run_action(action).await?;
        self.state.flush().await.map_err(SyncError::State)?;

        info!(path = %path, "materialized");
        Ok(())
    }

    /// Remove the local copy of a tracked item while keeping it in the
    /// remote store and the state table. Parent directories that end up
    /// empty are cleaned away.
    ///
    /// # Errors
    /// Fails if the path has no record or the record has no remote copy
    /// to fall back on.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn evict(&self, path: &ItemPath) -> Result<(), SyncError> {
        let mut rec = self
            .state
            .get(path)
            .await
            .map_err(SyncError::State)?
            .ok_or_else(|| SyncError::NotTracked(path.clone()))?;
        if rec.remote_id().is_none() {
            return Err(SyncError::Domain(DomainError::ValidationFailed(format!(
                "cannot evict {path}: the local copy is the only copy"
            ))));
        }

        let abs = path.to_local(&self.root);
        self.local.remove(&abs).await.map_err(SyncError::Local)?;

        let mut parent = path.parent();
        while let Some(dir) = parent {
            let removed = self
                .local
                .remove_dir_if_empty(&dir.to_local(&self.root))
                .await
                .map_err(SyncError::Local)?;
            if !removed {
                break;
            }
            parent = dir.parent();
        }

        rec.request_evict();
        self.state.put(rec).await.map_err(SyncError::State)?;
        self.state.flush().await.map_err(SyncError::State)?;

        info!(path = %path, "evicted; remote copy retained");
        Ok(())
    }

    /// Deletions that exhausted verification without confirmation.
    pub fn pending_attention(&self) -> Vec<UnverifiedDeletion> {
        self.verifier.pending_attention()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use nimbusdrive_core::config::ConfigBuilder;
    use nimbusdrive_core::domain::{RecordStatus, RemoteId};
    use nimbusdrive_core::ports::{RemoteEntry, RemotePage};
    use nimbusdrive_state::InMemoryStateStore;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    use super::*;
    use crate::backoff::NoBackoff;
    use crate::filesystem::LocalFileSystemAdapter;

    fn path(s: &str) -> ItemPath {
        ItemPath::new(s).unwrap()
    }

    /// Full in-memory remote store: a listing plus content by id.
    #[derive(Default)]
    struct FakeRemote {
        items: Mutex<HashMap<ItemPath, (RemoteEntry, Vec<u8>)>>,
        next_id: AtomicU64,
        upload_calls: AtomicU64,
    }

    impl FakeRemote {
        async fn seed_file(&self, p: &str, data: &[u8]) -> RemoteEntry {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let entry = RemoteEntry {
                path: path(p),
                id: RemoteId::new(format!("id-{n}")).unwrap(),
                etag: format!("etag-{n}"),
                size: Some(data.len() as u64),
                mtime: None,
                kind: ItemKind::File,
            };
            self.items
                .lock()
                .await
                .insert(path(p), (entry.clone(), data.to_vec()));
            entry
        }

        async fn seed_folder(&self, p: &str) -> RemoteEntry {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let entry = RemoteEntry {
                path: path(p),
                id: RemoteId::new(format!("id-{n}")).unwrap(),
                etag: format!("etag-{n}"),
                size: None,
                mtime: None,
                kind: ItemKind::Folder,
            };
            self.items
                .lock()
                .await
                .insert(path(p), (entry.clone(), Vec::new()));
            entry
        }

        async fn replace_content(&self, p: &str, data: &[u8]) {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut items = self.items.lock().await;
            let (entry, content) = items.get_mut(&path(p)).unwrap();
            entry.etag = format!("etag-{n}");
            entry.size = Some(data.len() as u64);
            *content = data.to_vec();
        }

        async fn remove_path(&self, p: &str) {
            self.items.lock().await.remove(&path(p));
        }

        async fn contains(&self, p: &str) -> bool {
            self.items.lock().await.contains_key(&path(p))
        }

        async fn content_of(&self, p: &str) -> Option<Vec<u8>> {
            self.items.lock().await.get(&path(p)).map(|(_, c)| c.clone())
        }
    }

    #[async_trait::async_trait]
    impl IRemoteStore for FakeRemote {
        async fn list_page(&self, _cursor: Option<&str>) -> Result<RemotePage, RemoteStoreError> {
            Ok(RemotePage {
                entries: self
                    .items
                    .lock()
                    .await
                    .values()
                    .map(|(e, _)| e.clone())
                    .collect(),
                next: None,
            })
        }

        async fn upload(
            &self,
            p: &ItemPath,
            kind: ItemKind,
            data: &[u8],
        ) -> Result<RemoteEntry, RemoteStoreError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let entry = RemoteEntry {
                path: p.clone(),
                id: RemoteId::new(format!("id-{n}")).unwrap(),
                etag: format!("etag-{n}"),
                size: (kind == ItemKind::File).then(|| data.len() as u64),
                mtime: None,
                kind,
            };
            self.items
                .lock()
                .await
                .insert(p.clone(), (entry.clone(), data.to_vec()));
            Ok(entry)
        }

        async fn download(&self, id: &RemoteId) -> Result<Vec<u8>, RemoteStoreError> {
            self.items
                .lock()
                .await
                .values()
                .find(|(e, _)| &e.id == id)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| RemoteStoreError::NotFound(id.to_string()))
        }

        async fn delete(&self, id: &RemoteId) -> Result<(), RemoteStoreError> {
            self.items.lock().await.retain(|_, (e, _)| &e.id != id);
            Ok(())
        }

        async fn get_metadata(
            &self,
            id: &RemoteId,
        ) -> Result<Option<RemoteEntry>, RemoteStoreError> {
            Ok(self
                .items
                .lock()
                .await
                .values()
                .find(|(e, _)| &e.id == id)
                .map(|(e, _)| e.clone()))
        }
    }

    struct Fixture {
        engine: SyncEngine,
        remote: Arc<FakeRemote>,
        state: Arc<InMemoryStateStore>,
        root: TempDir,
        _trash: TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with_suppression(60)
    }

    fn fixture_with_suppression(suppression_secs: u64) -> Fixture {
        let root = TempDir::new().unwrap();
        let trash = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .sync_root(root.path().to_path_buf())
            .retry_remote_timeout(5)
            .deletion_suppression_window(suppression_secs)
            .build();

        let remote = Arc::new(FakeRemote::default());
        let state = Arc::new(InMemoryStateStore::new());
        let local: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::with_trash_dir(
            trash.path().to_path_buf(),
        ));
        let engine = SyncEngine::with_policies(
            &config,
            local,
            remote.clone(),
            state.clone(),
            Arc::new(NoBackoff::new(3)),
            Arc::new(NoBackoff::new(3)),
        );
        Fixture {
            engine,
            remote,
            state,
            root,
            _trash: trash,
        }
    }

    async fn assert_quiescent(fx: &Fixture) {
        let result = fx.engine.run_cycle().await.unwrap();
        assert_eq!(result.report.uploads, 0, "unexpected uploads on re-run");
        assert_eq!(result.report.downloads, 0, "unexpected downloads on re-run");
        assert_eq!(result.report.conflicts, 0, "unexpected conflicts on re-run");
        assert_eq!(result.report.trashed, 0, "unexpected trashing on re-run");
        assert_eq!(result.report.deferred, 0, "unexpected deferrals on re-run");
    }

    // ------------------------------------------------------------------
    // Basic flows
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_new_local_file_is_uploaded_once() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("a.txt"), b"hello").unwrap();

        let result = fx.engine.run_cycle().await.unwrap();
        assert_eq!(result.report.uploads, 1);
        assert_eq!(fx.remote.content_of("a.txt").await.unwrap(), b"hello");

        let rec = fx.state.get(&path("a.txt")).await.unwrap().unwrap();
        assert_eq!(rec.status(), RecordStatus::Synced);

        // A converged tree plans nothing.
        assert_quiescent(&fx).await;
        assert_eq!(fx.remote.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_item_is_tracked_but_never_materialized() {
        let fx = fixture();
        fx.remote.seed_file("cloud.txt", b"cloud data").await;

        let result = fx.engine.run_cycle().await.unwrap();
        assert_eq!(result.report.records_created, 1);
        assert!(!fx.root.path().join("cloud.txt").exists());

        let rec = fx.state.get(&path("cloud.txt")).await.unwrap().unwrap();
        assert_eq!(rec.status(), RecordStatus::CloudOnly);
        assert!(!rec.downloaded());

        // Still never fetched on later cycles.
        assert_quiescent(&fx).await;
        assert!(!fx.root.path().join("cloud.txt").exists());
    }

    #[tokio::test]
    async fn test_local_edit_is_uploaded() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("a.txt"), b"v1").unwrap();
        fx.engine.run_cycle().await.unwrap();

        std::fs::write(fx.root.path().join("a.txt"), b"version two").unwrap();
        let result = fx.engine.run_cycle().await.unwrap();

        assert_eq!(result.report.uploads, 1);
        assert_eq!(fx.remote.content_of("a.txt").await.unwrap(), b"version two");
        assert_quiescent(&fx).await;
    }

    #[tokio::test]
    async fn test_remote_edit_is_downloaded() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("a.txt"), b"v1").unwrap();
        fx.engine.run_cycle().await.unwrap();

        fx.remote.replace_content("a.txt", b"remote v2").await;
        let result = fx.engine.run_cycle().await.unwrap();

        assert_eq!(result.report.downloads, 1);
        assert_eq!(
            std::fs::read(fx.root.path().join("a.txt")).unwrap(),
            b"remote v2"
        );
        assert_quiescent(&fx).await;
    }

    // ------------------------------------------------------------------
    // Materialize and evict
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_materialize_fetches_cloud_only_item() {
        let fx = fixture();
        fx.remote.seed_file("docs/far.txt", b"far away").await;
        fx.engine.run_cycle().await.unwrap();

        fx.engine.materialize(&path("docs/far.txt")).await.unwrap();

        assert_eq!(
            std::fs::read(fx.root.path().join("docs/far.txt")).unwrap(),
            b"far away"
        );
        let rec = fx.state.get(&path("docs/far.txt")).await.unwrap().unwrap();
        assert_eq!(rec.status(), RecordStatus::Synced);
        assert!(rec.downloaded());
        assert_quiescent(&fx).await;
    }

    #[tokio::test]
    async fn test_materialize_unknown_path_fails() {
        let fx = fixture();
        let err = fx.engine.materialize(&path("nope.txt")).await.unwrap_err();
        assert!(matches!(err, SyncError::NotTracked(_)));
    }

    #[tokio::test]
    async fn test_evict_removes_local_copy_and_keeps_tracking() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("big.bin"), b"lots of bytes").unwrap();
        fx.engine.run_cycle().await.unwrap();

        fx.engine.evict(&path("big.bin")).await.unwrap();

        assert!(!fx.root.path().join("big.bin").exists());
        assert!(fx.remote.contains("big.bin").await);
        let rec = fx.state.get(&path("big.bin")).await.unwrap().unwrap();
        assert_eq!(rec.status(), RecordStatus::CloudOnly);
        assert!(!rec.downloaded());

        // Evicted content must not come back on its own.
        assert_quiescent(&fx).await;
        assert!(!fx.root.path().join("big.bin").exists());
    }

    #[tokio::test]
    async fn test_evict_refuses_sole_copy() {
        let fx = fixture();
        fx.state
            .put(SyncRecord::from_local(
                path("only.txt"),
                ItemKind::File,
                None,
                Some(1),
            ))
            .await
            .unwrap();

        let err = fx.engine.evict(&path("only.txt")).await.unwrap_err();
        assert!(matches!(err, SyncError::Domain(_)));
    }

    #[tokio::test]
    async fn test_evict_cleans_empty_parent_directories() {
        let fx = fixture();
        std::fs::create_dir_all(fx.root.path().join("a/b")).unwrap();
        std::fs::write(fx.root.path().join("a/b/c.txt"), b"deep").unwrap();
        fx.engine.run_cycle().await.unwrap();

        fx.engine.evict(&path("a/b/c.txt")).await.unwrap();

        assert!(!fx.root.path().join("a/b").exists());
        assert!(!fx.root.path().join("a").exists());
    }

    // ------------------------------------------------------------------
    // Deletion authority
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_remote_deletion_trashes_local_and_removes_record() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("doomed.txt"), b"bye").unwrap();
        fx.engine.run_cycle().await.unwrap();

        fx.remote.remove_path("doomed.txt").await;
        let result = fx.engine.run_cycle().await.unwrap();

        assert_eq!(result.report.trashed, 1);
        assert!(!fx.root.path().join("doomed.txt").exists());
        // The same cycle's verification pass confirmed the absence and
        // dropped the record.
        assert!(fx.state.get(&path("doomed.txt")).await.unwrap().is_none());
        assert!(result.pending_attention.is_empty());
    }

    #[tokio::test]
    async fn test_remote_folder_deletion_clears_subtree() {
        let fx = fixture();
        std::fs::create_dir_all(fx.root.path().join("docs")).unwrap();
        std::fs::write(fx.root.path().join("docs/b.txt"), b"doomed").unwrap();
        fx.engine.run_cycle().await.unwrap();

        fx.remote.remove_path("docs/b.txt").await;
        fx.remote.remove_path("docs").await;
        let result = fx.engine.run_cycle().await.unwrap();

        assert_eq!(result.report.trashed, 2);
        assert!(!fx.root.path().join("docs").exists());
        assert!(fx.state.snapshot().await.unwrap().is_empty());

        // Nothing reappears on later cycles.
        assert_quiescent(&fx).await;
        assert!(!fx.root.path().join("docs").exists());
    }

    #[tokio::test]
    async fn test_local_deletion_never_touches_remote() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("keep.txt"), b"precious").unwrap();
        fx.engine.run_cycle().await.unwrap();

        std::fs::remove_file(fx.root.path().join("keep.txt")).unwrap();
        fx.engine.run_cycle().await.unwrap();

        assert!(fx.remote.contains("keep.txt").await);
        let rec = fx.state.get(&path("keep.txt")).await.unwrap().unwrap();
        assert!(rec.deleted_locally());
        assert_eq!(rec.status(), RecordStatus::CloudOnly);

        // And it stays deleted: no re-download on later cycles.
        assert_quiescent(&fx).await;
        assert!(!fx.root.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_suppression_blocks_resurrection() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("ghost.txt"), b"v1").unwrap();
        fx.engine.run_cycle().await.unwrap();

        fx.remote.remove_path("ghost.txt").await;
        fx.engine.run_cycle().await.unwrap();

        // A stale write lands after the deletion propagated.
        std::fs::write(fx.root.path().join("ghost.txt"), b"stale").unwrap();
        let result = fx.engine.run_cycle().await.unwrap();

        assert_eq!(result.report.uploads, 0);
        assert_eq!(result.blocked, vec![path("ghost.txt")]);
        assert!(!fx.remote.contains("ghost.txt").await);
    }

    // ------------------------------------------------------------------
    // Conflicts and adoption
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_divergent_edits_produce_conflict_artifact() {
        let fx = fixture();
        std::fs::write(fx.root.path().join("a.txt"), b"base").unwrap();
        fx.engine.run_cycle().await.unwrap();

        std::fs::write(fx.root.path().join("a.txt"), b"local change").unwrap();
        fx.remote.replace_content("a.txt", b"remote change").await;
        let result = fx.engine.run_cycle().await.unwrap();

        assert_eq!(result.report.conflicts, 1);
        assert_eq!(
            std::fs::read(fx.root.path().join("a.txt")).unwrap(),
            b"local change"
        );
        assert_eq!(
            std::fs::read(fx.root.path().join("a.txt.conflict")).unwrap(),
            b"remote change"
        );
        let rec = fx.state.get(&path("a.txt")).await.unwrap().unwrap();
        assert!(rec.conflict_pending());
        assert_eq!(rec.status(), RecordStatus::Conflicted);
    }

    #[tokio::test]
    async fn test_kind_conflict_settles_after_one_cycle() {
        let fx = fixture();
        std::fs::create_dir_all(fx.root.path().join("thing")).unwrap();
        fx.remote.seed_file("thing", b"remote file").await;

        let first = fx.engine.run_cycle().await.unwrap();
        assert_eq!(first.report.conflicts, 1);
        assert!(fx.root.path().join("thing").is_dir());
        assert_eq!(
            std::fs::read(fx.root.path().join("thing.conflict")).unwrap(),
            b"remote file"
        );

        // No external change: the same divergence is not re-detected and
        // the artifact is not rewritten.
        let second = fx.engine.run_cycle().await.unwrap();
        assert_eq!(second.report.conflicts, 0);
    }

    #[tokio::test]
    async fn test_locally_deleted_materialized_folder_stays_deleted() {
        let fx = fixture();
        fx.remote.seed_folder("docs").await;
        fx.engine.run_cycle().await.unwrap();
        fx.engine.materialize(&path("docs")).await.unwrap();
        assert!(fx.root.path().join("docs").is_dir());

        std::fs::remove_dir_all(fx.root.path().join("docs")).unwrap();
        fx.engine.run_cycle().await.unwrap();

        // Recorded as a local deletion, not recreated.
        assert!(!fx.root.path().join("docs").exists());
        let rec = fx.state.get(&path("docs")).await.unwrap().unwrap();
        assert_eq!(rec.status(), RecordStatus::CloudOnly);
        assert!(rec.deleted_locally());
        assert!(fx.remote.contains("docs").await);

        assert_quiescent(&fx).await;
        assert!(!fx.root.path().join("docs").exists());
    }

    #[tokio::test]
    async fn test_same_size_twin_adopts_without_transfer() {
        let fx = fixture();
        fx.remote.seed_file("twin.txt", b"same bytes").await;
        std::fs::write(fx.root.path().join("twin.txt"), b"same bytes").unwrap();

        let result = fx.engine.run_cycle().await.unwrap();
        assert_eq!(result.report.adopted, 1);
        assert_eq!(fx.remote.upload_calls.load(Ordering::SeqCst), 0);

        let rec = fx.state.get(&path("twin.txt")).await.unwrap().unwrap();
        assert_eq!(rec.status(), RecordStatus::Synced);
        assert_quiescent(&fx).await;
    }

    // ------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_nested_local_tree_syncs_up() {
        let fx = fixture();
        std::fs::create_dir_all(fx.root.path().join("docs/sub")).unwrap();
        std::fs::write(fx.root.path().join("docs/sub/deep.txt"), b"deep").unwrap();

        let result = fx.engine.run_cycle().await.unwrap();
        // Two folders and one file.
        assert_eq!(result.report.uploads, 3);
        assert!(fx.remote.contains("docs").await);
        assert!(fx.remote.contains("docs/sub").await);
        assert!(fx.remote.contains("docs/sub/deep.txt").await);
        assert_quiescent(&fx).await;
    }
}
