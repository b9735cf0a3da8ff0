//! Debounced watcher for a single tasks file.
//!
//! `notify` events for the file are forwarded to one worker thread per
//! watch. The worker waits for a quiet period, then reads and parses the
//! file and hands the result to a [`SnapshotSink`]. Reads for a path are
//! therefore serialized, and a burst of writes (delete + rewrite, editor
//! temp-file renames) collapses into one delivery of the latest content.
//!
//! Missing and unreadable files are delivered as [`Snapshot::empty`]; the
//! failure is logged, never returned.
//!
//! The worker owns the OS registration. When the file's directory is
//! removed or renamed it re-registers on the nearest existing ancestor, and
//! moves back to the directory once it exists again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::errors::SyncError;
use crate::snapshot::{Snapshot, load_snapshot};

/// Quiet period used when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// How long the worker blocks when nothing is pending.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Anything that accepts snapshots: a closure, a channel sender, a hub.
pub trait SnapshotSink: Send + Sync + 'static {
    fn accept(&self, snapshot: Snapshot);
}

impl<F> SnapshotSink for F
where
    F: Fn(Snapshot) + Send + Sync + 'static,
{
    fn accept(&self, snapshot: Snapshot) {
        self(snapshot)
    }
}

enum Signal {
    Touched,
    /// The watched directory or one of its ancestors went away.
    Rearm,
    Stop,
}

struct ActiveWatch {
    path: PathBuf,
    signal_tx: mpsc::Sender<Signal>,
    worker: JoinHandle<()>,
}

impl ActiveWatch {
    fn shutdown(self) {
        let _ = self.signal_tx.send(Signal::Stop);
        if self.worker.thread().id() != thread::current().id() {
            let _ = self.worker.join();
        }
    }
}

/// The OS-level watch, owned by the worker so it can be moved when the
/// directory it points at disappears.
struct Registration {
    // Dropping the notify watcher unregisters the OS watch.
    watcher: RecommendedWatcher,
    armed: Option<(PathBuf, RecursiveMode)>,
}

impl Registration {
    /// Point the OS watch at the directory [`watch_root`] picks for
    /// `target`. Returns true when the registration moved.
    ///
    /// An inotify watch does not follow a directory that is deleted and
    /// recreated, so `force` re-registers even when the path is unchanged.
    fn refresh(&mut self, target: &Path, force: bool) -> bool {
        let (root, mode) = watch_root(target);
        let stale = match &self.armed {
            Some((armed_root, armed_mode)) => {
                force || !armed_root.is_dir() || *armed_root != root || *armed_mode != mode
            }
            None => true,
        };
        if !stale {
            return false;
        }

        if let Some((old_root, _)) = self.armed.take() {
            let _ = self.watcher.unwatch(&old_root);
        }
        match self.watcher.watch(&root, mode) {
            Ok(()) => {
                info!(path = %target.display(), root = %root.display(), "re-registered file watch");
                self.armed = Some((root, mode));
                true
            }
            Err(e) => {
                warn!(error = %e, root = %root.display(), "failed to re-register file watch, retrying");
                false
            }
        }
    }
}

/// Owns at most one active watch at a time.
///
/// The sink runs on the watcher's worker thread and must not call
/// [`SnapshotWatcher::start`] or [`SnapshotWatcher::stop`] on the same
/// watcher.
pub struct SnapshotWatcher {
    debounce: Duration,
    active: Mutex<Option<ActiveWatch>>,
}

impl Default for SnapshotWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl SnapshotWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            active: Mutex::new(None),
        }
    }

    /// Start watching `path`, replacing any watch already running.
    ///
    /// If the file exists, its current content is delivered once before
    /// any change notifications.
    pub fn start(&self, path: &Path, sink: impl SnapshotSink) -> Result<(), SyncError> {
        let target = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            debug!(path = %previous.path.display(), "replacing existing watch");
            previous.shutdown();
        }

        let (signal_tx, signal_rx) = mpsc::channel::<Signal>();
        let (root, mode) = watch_root(&target);

        let event_tx = signal_tx.clone();
        let event_target = target.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if parent_gone(&event, &event_target) => {
                    let _ = event_tx.send(Signal::Rearm);
                }
                Ok(event) if is_relevant(&event, &event_target) => {
                    let _ = event_tx.send(Signal::Touched);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "file watcher error"),
            },
            Config::default(),
        )
        .map_err(|source| SyncError::WatchFailed {
            path: target.clone(),
            source,
        })?;
        watcher
            .watch(&root, mode)
            .map_err(|source| SyncError::WatchFailed {
                path: target.clone(),
                source,
            })?;
        let registration = Registration {
            watcher,
            armed: Some((root.clone(), mode)),
        };

        let worker_target = target.clone();
        let debounce = self.debounce;
        let sink: Arc<dyn SnapshotSink> = Arc::new(sink);
        let worker = thread::Builder::new()
            .name("taskboard-watcher".into())
            .spawn(move || {
                run_worker(&worker_target, debounce, registration, signal_rx, sink.as_ref())
            })
            .map_err(|e| SyncError::WatchFailed {
                path: target.clone(),
                source: notify::Error::io(e),
            })?;

        info!(path = %target.display(), root = %root.display(), "started file watcher");
        *active = Some(ActiveWatch {
            path: target,
            signal_tx,
            worker,
        });
        Ok(())
    }

    /// Stop the current watch. A no-op when not watching.
    pub fn stop(&self) {
        if let Some(previous) = self.active.lock().take() {
            info!(path = %previous.path.display(), "stopped file watcher");
            previous.shutdown();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn watched_path(&self) -> Option<PathBuf> {
        self.active.lock().as_ref().map(|a| a.path.clone())
    }
}

impl Drop for SnapshotWatcher {
    fn drop(&mut self) {
        if let Some(previous) = self.active.get_mut().take() {
            previous.shutdown();
        }
    }
}

/// Directory to register with the OS. The parent is watched directly; if it
/// does not exist yet, the nearest existing ancestor is watched recursively
/// so the file is noticed once it appears.
fn watch_root(target: &Path) -> (PathBuf, RecursiveMode) {
    let parent = target.parent().unwrap_or(target);
    if parent.is_dir() {
        return (parent.to_path_buf(), RecursiveMode::NonRecursive);
    }
    let ancestor = parent
        .ancestors()
        .find(|dir| dir.is_dir())
        .unwrap_or(parent);
    (ancestor.to_path_buf(), RecursiveMode::Recursive)
}

fn is_relevant(event: &Event, target: &Path) -> bool {
    let kind_matters = match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Any => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) | EventKind::Other => false,
    };
    kind_matters
        && event
            .paths
            .iter()
            .any(|p| p == target || target.starts_with(p))
}

/// The target's parent directory, or an ancestor of it, was removed or
/// renamed away. Either way the OS watch no longer covers the target.
fn parent_gone(event: &Event, target: &Path) -> bool {
    let Some(parent) = target.parent() else {
        return false;
    };
    let kind_matters = matches!(
        event.kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    kind_matters && event.paths.iter().any(|p| parent.starts_with(p))
}

fn run_worker(
    path: &Path,
    debounce: Duration,
    mut registration: Registration,
    signals: mpsc::Receiver<Signal>,
    sink: &dyn SnapshotSink,
) {
    let mut last: Option<Snapshot> = None;

    if path.exists() {
        deliver(path, sink, &mut last);
    }

    let mut deadline: Option<Instant> = None;
    loop {
        let wait = deadline.map_or(IDLE_WAIT, |d| d.saturating_duration_since(Instant::now()));
        let mut force = false;
        match signals.recv_timeout(wait) {
            Ok(Signal::Touched) => deadline = Some(Instant::now() + debounce),
            Ok(Signal::Rearm) => {
                force = true;
                deadline = Some(Instant::now() + debounce);
            }
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        // Writes that land between a directory coming back and the new
        // registration produce no event, so re-read after every move.
        if registration.refresh(path, force) {
            deadline = Some(Instant::now() + debounce);
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            deadline = None;
            deliver(path, sink, &mut last);
        }
    }
    debug!(path = %path.display(), "watcher worker exited");
}

fn deliver(path: &Path, sink: &dyn SnapshotSink, last: &mut Option<Snapshot>) {
    let snapshot = read_or_empty(path);
    if last.as_ref() == Some(&snapshot) {
        debug!(path = %path.display(), "tasks file unchanged, skipping update");
        return;
    }
    *last = Some(snapshot.clone());
    sink.accept(snapshot);
}

fn read_or_empty(path: &Path) -> Snapshot {
    match load_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(SyncError::SnapshotMissing { path }) => {
            warn!(path = %path.display(), "tasks file was deleted");
            Snapshot::empty()
        }
        Err(e) => {
            warn!(error = %e, "error reading tasks file");
            Snapshot::empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(5);

    fn tasks_json(ids: &[&str]) -> String {
        let tasks: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id": "{}", "status": "pending"}}"#, id))
            .collect();
        format!(r#"{{"master": {{"tasks": [{}]}}}}"#, tasks.join(","))
    }

    fn active_ids(snapshot: &Snapshot) -> Vec<String> {
        snapshot.active_tasks().iter().map(|t| t.id.clone()).collect()
    }

    fn start(dir: &TempDir) -> (SnapshotWatcher, PathBuf, mpsc::Receiver<Snapshot>) {
        let path = dir.path().join("tasks.json");
        let watcher = SnapshotWatcher::new(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        watcher
            .start(&path, move |snapshot: Snapshot| {
                let _ = tx.send(snapshot);
            })
            .unwrap();
        (watcher, path, rx)
    }

    /// Receive until `pred` matches or the wait expires.
    fn recv_until(rx: &mpsc::Receiver<Snapshot>, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let snapshot = rx
                .recv_timeout(remaining)
                .expect("expected a snapshot before the deadline");
            if pred(&snapshot) {
                return snapshot;
            }
        }
    }

    #[test]
    fn test_initial_content_is_delivered_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tasks.json"), tasks_json(&["1", "2"])).unwrap();

        let (watcher, _path, rx) = start(&dir);
        let first = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(active_ids(&first), vec!["1", "2"]);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(watcher.is_watching());
    }

    #[test]
    fn test_missing_file_is_silent_until_created() {
        let dir = TempDir::new().unwrap();
        let (_watcher, path, rx) = start(&dir);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        std::fs::write(&path, tasks_json(&["7"])).unwrap();
        let snapshot = recv_until(&rx, |s| !s.is_empty());
        assert_eq!(active_ids(&snapshot), vec!["7"]);
    }

    #[test]
    fn test_modification_delivers_new_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tasks.json"), tasks_json(&["1"])).unwrap();
        let (_watcher, path, rx) = start(&dir);
        rx.recv_timeout(WAIT).unwrap();

        std::fs::write(&path, tasks_json(&["1", "2", "3"])).unwrap();
        let snapshot = recv_until(&rx, |s| s.active_tasks().len() == 3);
        assert_eq!(active_ids(&snapshot), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_malformed_content_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tasks.json"), tasks_json(&["1"])).unwrap();
        let (watcher, path, rx) = start(&dir);
        rx.recv_timeout(WAIT).unwrap();

        std::fs::write(&path, "{ this is not json").unwrap();
        let snapshot = recv_until(&rx, |s| s.is_empty());
        assert_eq!(snapshot, Snapshot::empty());
        assert!(watcher.is_watching(), "parse errors must not stop the watch");

        std::fs::write(&path, tasks_json(&["4"])).unwrap();
        let recovered = recv_until(&rx, |s| !s.is_empty());
        assert_eq!(active_ids(&recovered), vec!["4"]);
    }

    #[test]
    fn test_deleted_file_delivers_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tasks.json"), tasks_json(&["1"])).unwrap();
        let (_watcher, path, rx) = start(&dir);
        rx.recv_timeout(WAIT).unwrap();

        std::fs::remove_file(&path).unwrap();
        let snapshot = recv_until(&rx, |s| s.is_empty());
        assert!(snapshot.active_tasks().is_empty());
    }

    #[test]
    fn test_burst_of_writes_settles_on_latest_content() {
        let dir = TempDir::new().unwrap();
        let (_watcher, path, rx) = start(&dir);

        for n in 1..=5 {
            let ids: Vec<String> = (1..=n).map(|i| i.to_string()).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let _ = std::fs::remove_file(&path);
            std::fs::write(&path, tasks_json(&refs)).unwrap();
        }

        recv_until(&rx, |s| s.active_tasks().len() == 5);
        // Anything still queued must be the same final content.
        while let Ok(extra) = rx.recv_timeout(Duration::from_millis(300)) {
            assert_eq!(extra.active_tasks().len(), 5);
        }
    }

    #[test]
    fn test_restart_replaces_previous_watch() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let watcher = SnapshotWatcher::new(Duration::from_millis(20));

        let (tx_a, rx_a) = mpsc::channel();
        let path_a = dir_a.path().join("tasks.json");
        watcher
            .start(&path_a, move |s: Snapshot| {
                let _ = tx_a.send(s);
            })
            .unwrap();

        let (tx_b, rx_b) = mpsc::channel();
        let path_b = dir_b.path().join("tasks.json");
        watcher
            .start(&path_b, move |s: Snapshot| {
                let _ = tx_b.send(s);
            })
            .unwrap();
        assert!(watcher.watched_path().unwrap().ends_with("tasks.json"));

        std::fs::write(&path_a, tasks_json(&["1"])).unwrap();
        std::fs::write(&path_b, tasks_json(&["2"])).unwrap();

        let snapshot = recv_until(&rx_b, |s| !s.is_empty());
        assert_eq!(active_ids(&snapshot), vec!["2"]);
        // The first sink was dropped with its watch.
        assert!(matches!(
            rx_a.recv_timeout(Duration::from_millis(300)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let watcher = SnapshotWatcher::default();
        watcher.stop();
        assert!(!watcher.is_watching());

        let dir = TempDir::new().unwrap();
        let (watcher, path, rx) = start(&dir);
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_watching());
        assert!(watcher.watched_path().is_none());

        std::fs::write(&path, tasks_json(&["1"])).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_recreated_directory_is_watched_again() {
        let dir = TempDir::new().unwrap();
        let tasks_dir = dir.path().join("tasks");
        let path = tasks_dir.join("tasks.json");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(&path, tasks_json(&["1"])).unwrap();

        let watcher = SnapshotWatcher::new(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        watcher
            .start(&path, move |s: Snapshot| {
                let _ = tx.send(s);
            })
            .unwrap();
        assert_eq!(active_ids(&rx.recv_timeout(WAIT).unwrap()), vec!["1"]);

        std::fs::remove_dir_all(&tasks_dir).unwrap();
        recv_until(&rx, |s| s.is_empty());

        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(&path, tasks_json(&["1", "2"])).unwrap();
        let snapshot = recv_until(&rx, |s| !s.is_empty());
        assert_eq!(active_ids(&snapshot), vec!["1", "2"]);
        assert!(watcher.is_watching());

        // The new registration keeps following writes.
        std::fs::write(&path, tasks_json(&["3"])).unwrap();
        let snapshot = recv_until(&rx, |s| s.active_tasks().len() == 1);
        assert_eq!(active_ids(&snapshot), vec!["3"]);
    }

    #[test]
    fn test_losing_the_parent_requests_rearm() {
        let target = Path::new("/p/.taskmaster/tasks/tasks.json");
        let removed = |path: &str| {
            Event::new(EventKind::Remove(notify::event::RemoveKind::Folder))
                .add_path(PathBuf::from(path))
        };
        assert!(parent_gone(&removed("/p/.taskmaster/tasks"), target));
        assert!(parent_gone(&removed("/p/.taskmaster"), target));
        assert!(!parent_gone(&removed("/p/.taskmaster/tasks/tasks.json"), target));
        assert!(!parent_gone(&removed("/p/other"), target));

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(
            notify::event::RenameMode::From,
        )))
        .add_path(PathBuf::from("/p/.taskmaster/tasks"));
        assert!(parent_gone(&renamed, target));

        let created = Event::new(EventKind::Create(notify::event::CreateKind::Folder))
            .add_path(PathBuf::from("/p/.taskmaster/tasks"));
        assert!(!parent_gone(&created, target));
    }

    #[test]
    fn test_missing_parent_directory_is_watched_from_ancestor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".taskmaster/tasks/tasks.json");
        let (root, mode) = watch_root(&path);
        assert_eq!(root, dir.path());
        assert_eq!(mode, RecursiveMode::Recursive);

        let watcher = SnapshotWatcher::new(Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        watcher
            .start(&path, move |s: Snapshot| {
                let _ = tx.send(s);
            })
            .unwrap();

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, tasks_json(&["1"])).unwrap();
        let snapshot = recv_until(&rx, |s| !s.is_empty());
        assert_eq!(active_ids(&snapshot), vec!["1"]);
    }
}
