//! The long-lived sync loop
//!
//! [`SyncScheduler`] owns the select loop that decides when a cycle
//! runs: debounced watcher events, the periodic poll interval (which
//! catches remote-side changes the watcher cannot see), or an explicit
//! [`SyncTrigger`] request. Cycles never overlap; whatever fires while
//! one is running is folded into the next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nimbusdrive_core::config::Config;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::watcher::{ChangeEvent, DebouncedChangeQueue};

/// How often the loop checks the debounce queue and the poll deadline.
const TICK: Duration = Duration::from_millis(250);

/// Handle for requesting an immediate reconciliation cycle.
///
/// Cheap to clone through an [`Arc`]; callers hold one while the
/// scheduler runs elsewhere.
#[derive(Default)]
pub struct SyncTrigger {
    notify: Notify,
}

impl SyncTrigger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Request a cycle as soon as the scheduler is free. Requests made
    /// while a cycle is running coalesce into one.
    pub fn request_sync(&self) {
        self.notify.notify_one();
    }
}

/// Ties watcher events, the poll timer, and forced syncs to the engine.
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    changes: mpsc::Receiver<ChangeEvent>,
    queue: DebouncedChangeQueue,
    trigger: Arc<SyncTrigger>,
    poll_interval: Duration,
}

impl SyncScheduler {
    pub fn new(
        config: &Config,
        engine: Arc<SyncEngine>,
        changes: mpsc::Receiver<ChangeEvent>,
        trigger: Arc<SyncTrigger>,
    ) -> Self {
        Self {
            engine,
            changes,
            queue: DebouncedChangeQueue::new(Duration::from_secs(config.sync.debounce_window)),
            trigger,
            poll_interval: Duration::from_secs(config.sync.poll_interval),
        }
    }

    /// Run until the token is cancelled. An initial cycle runs at
    /// startup to converge whatever changed while the process was down.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            poll_secs = self.poll_interval.as_secs(),
            "sync scheduler started"
        );

        self.cycle().await;
        let mut last_cycle = Instant::now();
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sync scheduler stopping");
                    break;
                }
                event = self.changes.recv() => {
                    match event {
                        Some(event) => {
                            debug!(path = %event.path, kind = ?event.kind, "change queued");
                            self.queue.push(event);
                        }
                        None => {
                            warn!("watcher channel closed; continuing on poll interval only");
                            // Replace the receiver with one that never
                            // yields so the select arm goes quiet.
                            let (_tx, rx) = mpsc::channel(1);
                            self.changes = rx;
                        }
                    }
                }
                _ = self.trigger.notify.notified() => {
                    debug!("forced sync requested");
                    self.cycle().await;
                    last_cycle = Instant::now();
                }
                _ = ticker.tick() => {
                    let quiet = self.queue.drain_ready();
                    if !quiet.is_empty() || last_cycle.elapsed() >= self.poll_interval {
                        self.cycle().await;
                        last_cycle = Instant::now();
                    }
                }
            }
        }
    }

    async fn cycle(&self) {
        match self.engine.run_cycle().await {
            Ok(result) => {
                if !result.pending_attention.is_empty() {
                    warn!(
                        count = result.pending_attention.len(),
                        "deletions awaiting user attention"
                    );
                }
            }
            Err(err) if err.is_authentication() => {
                // Stay alive; cycles resume once credentials are fixed.
                error!(error = %err, "cycle aborted: authentication required");
            }
            Err(err) => warn!(error = %err, "cycle failed; will retry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use nimbusdrive_core::config::ConfigBuilder;
    use nimbusdrive_core::domain::{ItemKind, ItemPath, RemoteId};
    use nimbusdrive_core::ports::{
        ILocalFileSystem, IRemoteStore, RemoteEntry, RemotePage, RemoteStoreError,
    };
    use nimbusdrive_state::InMemoryStateStore;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    use super::*;
    use crate::backoff::NoBackoff;
    use crate::filesystem::LocalFileSystemAdapter;
    use crate::watcher::ChangeKind;

    /// Minimal in-memory remote, counting list calls as a cycle proxy.
    #[derive(Default)]
    struct CountingRemote {
        items: Mutex<HashMap<ItemPath, (RemoteEntry, Vec<u8>)>>,
        next_id: AtomicU64,
        list_calls: AtomicU64,
    }

    impl CountingRemote {
        async fn contains(&self, p: &str) -> bool {
            self.items
                .lock()
                .await
                .contains_key(&ItemPath::new(p).unwrap())
        }

        async fn content_of(&self, p: &str) -> Option<Vec<u8>> {
            self.items
                .lock()
                .await
                .get(&ItemPath::new(p).unwrap())
                .map(|(_, c)| c.clone())
        }
    }

    #[async_trait::async_trait]
    impl IRemoteStore for CountingRemote {
        async fn list_page(&self, _cursor: Option<&str>) -> Result<RemotePage, RemoteStoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
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
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let entry = RemoteEntry {
                path: p.clone(),
                id: RemoteId::new(format!("id-{n}")).unwrap(),
                etag: format!("etag-{n}"),
                size: Some(data.len() as u64),
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

        async fn delete(&self, _id: &RemoteId) -> Result<(), RemoteStoreError> {
            Ok(())
        }

        async fn get_metadata(
            &self,
            _id: &RemoteId,
        ) -> Result<Option<RemoteEntry>, RemoteStoreError> {
            Ok(None)
        }
    }

    struct Harness {
        remote: Arc<CountingRemote>,
        trigger: Arc<SyncTrigger>,
        change_tx: mpsc::Sender<ChangeEvent>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
        root: TempDir,
        _trash: TempDir,
    }

    fn start(debounce_secs: u64, poll_secs: u64) -> Harness {
        let root = TempDir::new().unwrap();
        let trash = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .sync_root(root.path().to_path_buf())
            .sync_debounce_window(debounce_secs)
            .sync_poll_interval(poll_secs)
            .build();

        let remote = Arc::new(CountingRemote::default());
        let state = Arc::new(InMemoryStateStore::new());
        let local: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::with_trash_dir(
            trash.path().to_path_buf(),
        ));
        let engine = Arc::new(SyncEngine::with_policies(
            &config,
            local,
            remote.clone(),
            state,
            Arc::new(NoBackoff::new(2)),
            Arc::new(NoBackoff::new(2)),
        ));

        let (change_tx, change_rx) = mpsc::channel(16);
        let trigger = SyncTrigger::new();
        let scheduler = SyncScheduler::new(&config, engine, change_rx, trigger.clone());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        Harness {
            remote,
            trigger,
            change_tx,
            cancel,
            handle,
            root,
            _trash: trash,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached within 5s");
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_loop() {
        let h = start(1, 3600);
        h.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), h.handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_forced_sync_runs_a_cycle() {
        let h = start(3600, 3600);
        // Startup cycle first.
        let remote = h.remote.clone();
        wait_until(move || remote.list_calls.load(Ordering::SeqCst) >= 1).await;

        std::fs::write(h.root.path().join("forced.txt"), b"now").unwrap();
        h.trigger.request_sync();

        for _ in 0..100 {
            if h.remote.contains("forced.txt").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(h.remote.contains("forced.txt").await);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_debounced_change_event_drives_a_cycle() {
        let h = start(1, 3600);
        std::fs::write(h.root.path().join("watched.txt"), b"event").unwrap();

        h.change_tx
            .send(ChangeEvent {
                path: ItemPath::new("watched.txt").unwrap(),
                kind: ChangeKind::Created,
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if h.remote.contains("watched.txt").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(h.remote.contains("watched.txt").await);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_rapid_writes_coalesce_into_one_upload() {
        let h = start(1, 3600);
        let remote = h.remote.clone();
        wait_until(move || remote.list_calls.load(Ordering::SeqCst) >= 1).await;
        // Let the startup cycle finish before the burst begins.
        tokio::time::sleep(Duration::from_millis(500)).await;

        for i in 0..10 {
            std::fs::write(h.root.path().join("burst.txt"), format!("rev {i}")).unwrap();
            h.change_tx
                .send(ChangeEvent {
                    path: ItemPath::new("burst.txt").unwrap(),
                    kind: ChangeKind::Modified,
                })
                .await
                .unwrap();
        }

        for _ in 0..100 {
            if h.remote.contains("burst.txt").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert_eq!(
            h.remote.content_of("burst.txt").await.unwrap(),
            b"rev 9".to_vec()
        );
        // The burst collapsed into a single upload.
        assert_eq!(h.remote.next_id.load(Ordering::SeqCst), 1);
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn test_long_poll_interval_stays_quiet() {
        let h = start(3600, 3600);
        let remote = h.remote.clone();
        wait_until(move || remote.list_calls.load(Ordering::SeqCst) >= 1).await;

        // No events, no trigger: only the startup cycle should run.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.remote.list_calls.load(Ordering::SeqCst), 1);
        h.cancel.cancel();
    }
}
