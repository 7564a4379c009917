//! Local change observation (watcher + debounce)
//!
//! Wraps `notify` filesystem events into the normalized [`ChangeEvent`]
//! stream the scheduler consumes. Hidden entries and paths that do not
//! validate as an [`ItemPath`] under the sync root are filtered here, at
//! the source. Rapid repeated events for the same path are coalesced by
//! [`DebouncedChangeQueue`]: the last event within the window wins, and
//! it is released only after the path has been quiet for the full window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nimbusdrive_core::domain::ItemPath;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Capacity of the watcher event channel. When it fills, `blocking_send`
/// stalls the notify thread until the scheduler drains events; sends fail
/// only once the receiver is gone.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// ChangeEvent
// ============================================================================

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new file or directory appeared
    Created,
    /// Existing content or metadata changed
    Modified,
    /// The path is gone
    Removed,
}

/// A normalized local change notification.
///
/// Renames are decomposed into `Removed` for the old path and `Created`
/// for the new one; the engine has no move tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path relative to the sync root
    pub path: ItemPath,
    /// What happened
    pub kind: ChangeKind,
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches the sync root and forwards normalized events to a channel.
///
/// Dropping the watcher stops observation. The `notify` callback runs on
/// a background thread, so events cross into async code via
/// `blocking_send` on a bounded channel.
pub struct FileWatcher {
    // Kept alive for the lifetime of the watch.
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively, delivering events to the
    /// returned receiver.
    pub fn new(root: &Path) -> anyhow::Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let callback_root = root.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for change in map_notify_event(&event, &callback_root) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "change event channel closed; dropping event");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watch error"),
            }
        })?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "filesystem watch started");

        Ok((
            Self {
                _watcher: watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    /// The root being watched.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Translate one `notify` event into zero or more normalized events.
///
/// Paths outside the root, hidden entries, and names that fail
/// [`ItemPath`] validation are dropped here with a trace log.
fn map_notify_event(event: &notify::Event, root: &Path) -> Vec<ChangeEvent> {
    let kinds: Vec<ChangeKind> = match event.kind {
        EventKind::Create(_) => vec![ChangeKind::Created],
        EventKind::Remove(_) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths[0] is the old name, paths[1] the new one.
            vec![ChangeKind::Removed, ChangeKind::Created]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => vec![ChangeKind::Removed],
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => vec![ChangeKind::Created],
        EventKind::Modify(_) => vec![ChangeKind::Modified],
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    let mut changes = Vec::new();
    for (i, kind) in kinds.into_iter().enumerate() {
        // For rename-both the kinds line up with the paths pairwise;
        // otherwise every reported path gets the same kind.
        let paths: Vec<&PathBuf> = if event.paths.len() == 2 && event.paths.len() > i {
            vec![&event.paths[i]]
        } else {
            event.paths.iter().collect()
        };

        for path in paths {
            match ItemPath::from_local(path, root) {
                Ok(item) => changes.push(ChangeEvent { path: item, kind }),
                Err(e) => {
                    trace!(path = %path.display(), error = %e, "ignoring event outside sync namespace");
                }
            }
        }
    }
    changes
}

// ============================================================================
// DebouncedChangeQueue
// ============================================================================

/// Coalesces rapid repeated events per path.
///
/// Each push replaces the pending event for that path and restarts its
/// quiet timer. [`drain_ready`](Self::drain_ready) releases only events
/// whose path has been quiet for the full window, so an editor that
/// writes ten times in two seconds yields a single event.
#[derive(Debug)]
pub struct DebouncedChangeQueue {
    pending: HashMap<ItemPath, (ChangeEvent, Instant)>,
    window: Duration,
}

impl DebouncedChangeQueue {
    /// Create a queue with the given quiet window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    /// Record an event, replacing any pending event for the same path
    /// and restarting its quiet timer.
    pub fn push(&mut self, event: ChangeEvent) {
        self.pending
            .insert(event.path.clone(), (event, Instant::now()));
    }

    /// Take all events whose paths have been quiet for the full window.
    pub fn drain_ready(&mut self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let ready: Vec<ItemPath> = self
            .pending
            .iter()
            .filter(|(_, (_, since))| now.duration_since(*since) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|(event, _)| event))
            .collect()
    }

    /// Number of paths currently waiting out their quiet window.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            path: ItemPath::new(path).unwrap(),
            kind,
        }
    }

    // ------------------------------------------------------------------
    // Event mapping
    // ------------------------------------------------------------------

    fn notify_event(kind: EventKind, paths: Vec<PathBuf>) -> notify::Event {
        let mut e = notify::Event::new(kind);
        e.paths = paths;
        e
    }

    #[test]
    fn test_map_create() {
        let root = Path::new("/sync");
        let e = notify_event(
            EventKind::Create(notify::event::CreateKind::File),
            vec![PathBuf::from("/sync/a.txt")],
        );
        let mapped = map_notify_event(&e, root);
        assert_eq!(mapped, vec![event("a.txt", ChangeKind::Created)]);
    }

    #[test]
    fn test_map_modify_data() {
        let root = Path::new("/sync");
        let e = notify_event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            vec![PathBuf::from("/sync/docs/b.txt")],
        );
        let mapped = map_notify_event(&e, root);
        assert_eq!(mapped, vec![event("docs/b.txt", ChangeKind::Modified)]);
    }

    #[test]
    fn test_map_remove() {
        let root = Path::new("/sync");
        let e = notify_event(
            EventKind::Remove(notify::event::RemoveKind::File),
            vec![PathBuf::from("/sync/gone.txt")],
        );
        let mapped = map_notify_event(&e, root);
        assert_eq!(mapped, vec![event("gone.txt", ChangeKind::Removed)]);
    }

    #[test]
    fn test_map_rename_decomposes() {
        let root = Path::new("/sync");
        let e = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![PathBuf::from("/sync/old.txt"), PathBuf::from("/sync/new.txt")],
        );
        let mapped = map_notify_event(&e, root);
        assert_eq!(
            mapped,
            vec![
                event("old.txt", ChangeKind::Removed),
                event("new.txt", ChangeKind::Created),
            ]
        );
    }

    #[test]
    fn test_map_filters_hidden_and_foreign_paths() {
        let root = Path::new("/sync");

        let hidden = notify_event(
            EventKind::Create(notify::event::CreateKind::File),
            vec![PathBuf::from("/sync/.swap/x")],
        );
        assert!(map_notify_event(&hidden, root).is_empty());

        let outside = notify_event(
            EventKind::Create(notify::event::CreateKind::File),
            vec![PathBuf::from("/elsewhere/x")],
        );
        assert!(map_notify_event(&outside, root).is_empty());
    }

    #[test]
    fn test_map_ignores_access_events() {
        let root = Path::new("/sync");
        let e = notify_event(
            EventKind::Access(notify::event::AccessKind::Read),
            vec![PathBuf::from("/sync/a.txt")],
        );
        assert!(map_notify_event(&e, root).is_empty());
    }

    // ------------------------------------------------------------------
    // Debounce queue
    // ------------------------------------------------------------------

    #[test]
    fn test_queue_holds_event_until_quiet() {
        let mut queue = DebouncedChangeQueue::new(Duration::from_millis(50));
        queue.push(event("a.txt", ChangeKind::Modified));

        // Not quiet yet.
        assert!(queue.drain_ready().is_empty());
        assert_eq!(queue.pending_count(), 1);

        std::thread::sleep(Duration::from_millis(60));
        let ready = queue.drain_ready();
        assert_eq!(ready, vec![event("a.txt", ChangeKind::Modified)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_coalesces_rapid_events() {
        let mut queue = DebouncedChangeQueue::new(Duration::from_millis(50));

        for _ in 0..10 {
            queue.push(event("a.txt", ChangeKind::Modified));
        }
        assert_eq!(queue.pending_count(), 1);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(queue.drain_ready().len(), 1);
    }

    #[test]
    fn test_queue_last_event_wins() {
        let mut queue = DebouncedChangeQueue::new(Duration::from_millis(50));
        queue.push(event("a.txt", ChangeKind::Created));
        queue.push(event("a.txt", ChangeKind::Removed));

        std::thread::sleep(Duration::from_millis(60));
        let ready = queue.drain_ready();
        assert_eq!(ready, vec![event("a.txt", ChangeKind::Removed)]);
    }

    #[test]
    fn test_queue_push_restarts_quiet_timer() {
        let mut queue = DebouncedChangeQueue::new(Duration::from_millis(80));
        queue.push(event("a.txt", ChangeKind::Modified));

        std::thread::sleep(Duration::from_millis(50));
        // A fresh event keeps the path hot.
        queue.push(event("a.txt", ChangeKind::Modified));

        std::thread::sleep(Duration::from_millis(50));
        assert!(queue.drain_ready().is_empty());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(queue.drain_ready().len(), 1);
    }

    #[test]
    fn test_queue_distinct_paths_release_independently() {
        let mut queue = DebouncedChangeQueue::new(Duration::from_millis(50));
        queue.push(event("a.txt", ChangeKind::Modified));
        std::thread::sleep(Duration::from_millis(60));
        queue.push(event("b.txt", ChangeKind::Created));

        let ready = queue.drain_ready();
        assert_eq!(ready, vec![event("a.txt", ChangeKind::Modified)]);
        assert_eq!(queue.pending_count(), 1);
    }

    // ------------------------------------------------------------------
    // Live watcher
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_watcher_reports_created_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_watcher, mut rx) = FileWatcher::new(dir.path()).unwrap();

        tokio::fs::write(dir.path().join("hello.txt"), b"hi")
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(received.path.as_str(), "hello.txt");
    }

    #[tokio::test]
    async fn test_watcher_ignores_hidden_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_watcher, mut rx) = FileWatcher::new(dir.path()).unwrap();

        tokio::fs::write(dir.path().join(".hidden"), b"x")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("visible.txt"), b"y")
            .await
            .unwrap();

        // The first event to arrive must be for the visible file; the
        // hidden one is filtered at the source.
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(received.path.as_str(), "visible.txt");
    }
}
