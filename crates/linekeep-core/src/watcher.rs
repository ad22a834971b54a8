//! Single-file change watcher using the `notify` crate.
//!
//! The parent directory of the tracked file is watched non-recursively and
//! events are filtered down to the canonical file path, so editors that
//! replace the file by renaming a temporary over it are still seen. Raw
//! `notify` events are bridged onto a dedicated thread, classified, and turned
//! into at most one callback each.
//!
//! Delivery can be suppressed around the store's own writes and resumed by a
//! single-slot timer: arming the timer again replaces the pending deadline.

use crate::error::{Result, StoreError};
use crate::host::ChangeCallback;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Stopped,
    Watching,
    Suppressed,
}

/// Event kinds that count as a change to the tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    CloseWrite,
    Modify,
    MovedTo,
}

struct WatchState {
    phase: WatchPhase,
    target: Option<PathBuf>,
    subscription: u64,
    /// Bumped by every `suppress`; a resume only applies to the epoch it was armed in.
    epoch: u64,
}

struct Shared {
    state: Mutex<WatchState>,
    on_change: ChangeCallback,
}

impl Shared {
    fn dispatch(&self, subscription: Option<u64>, kind: ChangeKind, path: &Path) -> bool {
        let deliver = {
            let state = self.state.lock();
            if subscription.is_some_and(|id| id != state.subscription) {
                return false;
            }
            match &state.target {
                Some(target) if target == path => {}
                _ => return false,
            }
            debug!(path = %path.display(), ?kind, "watch event");
            match state.phase {
                WatchPhase::Watching => true,
                WatchPhase::Suppressed => {
                    info!(path = %path.display(), ?kind, "ignored event while suppressed");
                    false
                }
                WatchPhase::Stopped => false,
            }
        };
        // Callback runs without the lock so it may call back into the store.
        if deliver {
            info!(path = %path.display(), "file changed externally");
            (self.on_change)();
        }
        deliver
    }

    fn resume(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.phase != WatchPhase::Suppressed {
            debug!(epoch, "stale resume ignored");
            return;
        }
        state.phase = WatchPhase::Watching;
        if let Some(target) = &state.target {
            info!(path = %target.display(), "delayed enabling of change events");
        }
    }
}

#[derive(Default)]
struct TimerSlot {
    armed: Option<(Instant, u64)>,
    shutdown: bool,
}

/// One pending resume at most; `arm` replaces whatever was pending.
struct ResumeTimer {
    slot: Arc<(Mutex<TimerSlot>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl ResumeTimer {
    fn spawn(shared: Arc<Shared>) -> std::io::Result<Self> {
        let slot = Arc::new((Mutex::new(TimerSlot::default()), Condvar::new()));
        let worker_slot = slot.clone();
        let worker = std::thread::Builder::new()
            .name("linekeep-resume".into())
            .spawn(move || {
                let (lock, cvar) = &*worker_slot;
                let mut guard = lock.lock();
                loop {
                    if guard.shutdown {
                        return;
                    }
                    match guard.armed {
                        None => cvar.wait(&mut guard),
                        Some((deadline, epoch)) => {
                            if Instant::now() >= deadline {
                                guard.armed = None;
                                MutexGuard::unlocked(&mut guard, || shared.resume(epoch));
                            } else {
                                let _ = cvar.wait_until(&mut guard, deadline);
                            }
                        }
                    }
                }
            })?;
        Ok(Self {
            slot,
            worker: Some(worker),
        })
    }

    fn arm(&self, delay: Duration, epoch: u64) {
        let (lock, cvar) = &*self.slot;
        let mut guard = lock.lock();
        if guard.armed.is_some() {
            debug!("cancelling pending resume");
        }
        guard.armed = Some((Instant::now() + delay, epoch));
        cvar.notify_one();
    }

    fn cancel(&self) {
        let (lock, cvar) = &*self.slot;
        lock.lock().armed = None;
        cvar.notify_one();
    }

    fn is_pending(&self) -> bool {
        self.slot.0.lock().armed.is_some()
    }
}

impl Drop for ResumeTimer {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.slot;
            lock.lock().shutdown = true;
            cvar.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Subscription {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

/// Watches one file at a time and reports external changes through a callback.
///
/// Not internally serialized: the owner must guard `start`, `replace`,
/// `suppress` and `resume_after` with its own lock.
pub struct ChangeWatcher {
    shared: Arc<Shared>,
    subscription: Option<Subscription>,
    next_id: u64,
    timer: ResumeTimer,
}

impl ChangeWatcher {
    pub fn new(on_change: ChangeCallback) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState {
                phase: WatchPhase::Stopped,
                target: None,
                subscription: 0,
                epoch: 0,
            }),
            on_change,
        });
        let timer = ResumeTimer::spawn(shared.clone()).map_err(|e| StoreError::WatchSetup {
            path: PathBuf::new(),
            reason: format!("spawn resume timer: {e}"),
        })?;
        Ok(Self {
            shared,
            subscription: None,
            next_id: 0,
            timer,
        })
    }

    pub fn phase(&self) -> WatchPhase {
        self.shared.state.lock().phase
    }

    pub fn watched_path(&self) -> Option<PathBuf> {
        self.subscription.as_ref().map(|s| s.path.clone())
    }

    pub fn resume_pending(&self) -> bool {
        self.timer.is_pending()
    }

    /// Begins watching `path`. Any current subscription is stopped first.
    pub fn start(&mut self, path: &Path) -> Result<()> {
        if let Some(current) = &self.subscription {
            warn!(path = %current.path.display(), "watcher already running, stopping first");
            self.stop();
        }
        let target = canonical_target(path)?;
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| setup_error(&target, "no parent directory"))?;

        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| setup_error(&target, e))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| setup_error(&target, e))?;

        let shared = self.shared.clone();
        std::thread::Builder::new()
            .name("linekeep-watch".into())
            .spawn(move || bridge(shared, id, rx))
            .map_err(|e| setup_error(&target, e))?;

        {
            let mut state = self.shared.state.lock();
            state.subscription = id;
            state.target = Some(target.clone());
            state.phase = WatchPhase::Watching;
        }
        info!(path = %target.display(), dir = %dir.display(), "watching file");
        self.subscription = Some(Subscription {
            path: target,
            _watcher: watcher,
        });
        Ok(())
    }

    /// Switches the watch to `path`. Returns `false` without touching the
    /// subscription when `path` is already the watched file.
    pub fn replace(&mut self, path: &Path) -> Result<bool> {
        let target = canonical_target(path)?;
        if let Some(current) = &self.subscription {
            if current.path == target {
                warn!(path = %target.display(), "already watching");
                return Ok(false);
            }
            warn!(
                old = %current.path.display(),
                new = %target.display(),
                "watching a different file, replacing"
            );
        }
        self.stop();
        self.start(&target)?;
        Ok(true)
    }

    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.phase = WatchPhase::Stopped;
            state.target = None;
        }
        self.timer.cancel();
        // Dropping the notify watcher closes the bridge channel.
        if let Some(sub) = self.subscription.take() {
            info!(path = %sub.path.display(), "stopped watching");
        }
    }

    pub fn suppress(&self) {
        let mut state = self.shared.state.lock();
        state.epoch += 1;
        match state.phase {
            WatchPhase::Watching => {
                state.phase = WatchPhase::Suppressed;
                debug!("change events suppressed");
            }
            WatchPhase::Suppressed => {}
            WatchPhase::Stopped => debug!("suppress on stopped watcher"),
        }
        drop(state);
        self.timer.cancel();
    }

    /// Schedules the return to `Watching` after `delay`, replacing any
    /// pending resume.
    pub fn resume_after(&self, delay: Duration) {
        let epoch = self.shared.state.lock().epoch;
        debug!(delay_ms = delay.as_millis() as u64, "scheduling resume");
        self.timer.arm(delay, epoch);
    }

    /// Feeds one event for the current subscription. Returns whether the
    /// change callback was invoked.
    pub fn on_event(&self, kind: ChangeKind, path: &Path) -> bool {
        self.shared.dispatch(None, kind, path)
    }
}

fn bridge(shared: Arc<Shared>, id: u64, rx: mpsc::Receiver<notify::Result<Event>>) {
    for res in rx {
        match res {
            Ok(event) => {
                for (kind, path) in classify_event(&event) {
                    shared.dispatch(Some(id), kind, &path);
                }
            }
            Err(e) => error!("file watcher error: {}", e),
        }
    }
    debug!(subscription = id, "watch bridge closed");
}

/// Maps a notify event onto the change kinds we react to.
fn classify_event(event: &Event) -> Vec<(ChangeKind, PathBuf)> {
    let kind = match &event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => ChangeKind::CloseWrite,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::MovedTo,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            return event
                .paths
                .get(1)
                .map(|to| vec![(ChangeKind::MovedTo, to.clone())])
                .unwrap_or_default();
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => {
            return Vec::new()
        }
        EventKind::Modify(_) => ChangeKind::Modify,
        _ => return Vec::new(),
    };
    event.paths.iter().map(|p| (kind, p.clone())).collect()
}

/// Canonical form of `path`. A file that does not exist yet is resolved
/// through its parent directory.
pub fn canonical_target(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let name = path
        .file_name()
        .ok_or_else(|| setup_error(path, "path has no file name"))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent = parent.canonicalize().map_err(|e| setup_error(path, e))?;
    Ok(parent.join(name))
}

fn setup_error(path: &Path, reason: impl std::fmt::Display) -> StoreError {
    StoreError::WatchSetup {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn counting() -> (ChangeCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            Arc::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    fn watched(dir: &Path) -> (ChangeWatcher, PathBuf, Arc<AtomicUsize>) {
        let path = dir.join("todo.txt");
        std::fs::write(&path, "a\nb").unwrap();
        let (cb, count) = counting();
        let mut watcher = ChangeWatcher::new(cb).unwrap();
        watcher.start(&path).unwrap();
        let canonical = path.canonicalize().unwrap();
        (watcher, canonical, count)
    }

    #[test]
    fn starts_stopped() {
        let (cb, count) = counting();
        let watcher = ChangeWatcher::new(cb).unwrap();
        assert_eq!(watcher.phase(), WatchPhase::Stopped);
        assert!(!watcher.on_event(ChangeKind::Modify, Path::new("/tmp/todo.txt")));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn relevant_event_on_watched_path_fires_once() {
        let dir = tempdir().unwrap();
        let (watcher, path, count) = watched(dir.path());
        assert_eq!(watcher.phase(), WatchPhase::Watching);
        assert!(watcher.on_event(ChangeKind::CloseWrite, &path));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_paths_are_ignored() {
        let dir = tempdir().unwrap();
        let (watcher, path, count) = watched(dir.path());
        let sibling = path.with_file_name("done.txt");
        assert!(!watcher.on_event(ChangeKind::Modify, &sibling));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn suppressed_events_are_dropped() {
        let dir = tempdir().unwrap();
        let (watcher, path, count) = watched(dir.path());
        watcher.suppress();
        assert_eq!(watcher.phase(), WatchPhase::Suppressed);
        assert!(!watcher.on_event(ChangeKind::MovedTo, &path));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn resume_after_reenables_delivery() {
        let dir = tempdir().unwrap();
        let (watcher, path, count) = watched(dir.path());
        watcher.suppress();
        watcher.resume_after(Duration::from_millis(150));
        assert!(watcher.resume_pending());
        assert!(!watcher.on_event(ChangeKind::Modify, &path));

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(watcher.phase(), WatchPhase::Watching);
        assert!(watcher.on_event(ChangeKind::Modify, &path));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rescheduling_replaces_pending_resume() {
        let dir = tempdir().unwrap();
        let (watcher, path, _count) = watched(dir.path());
        watcher.suppress();
        watcher.resume_after(Duration::from_millis(150));
        std::thread::sleep(Duration::from_millis(50));
        watcher.resume_after(Duration::from_millis(400));

        // First deadline has passed but it was replaced.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(watcher.phase(), WatchPhase::Suppressed);
        assert!(!watcher.on_event(ChangeKind::Modify, &path));

        std::thread::sleep(Duration::from_millis(450));
        assert_eq!(watcher.phase(), WatchPhase::Watching);
    }

    #[test]
    fn suppress_cancels_pending_resume() {
        let dir = tempdir().unwrap();
        let (watcher, _path, _count) = watched(dir.path());
        watcher.suppress();
        watcher.resume_after(Duration::from_millis(100));
        watcher.suppress();
        assert!(!watcher.resume_pending());
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(watcher.phase(), WatchPhase::Suppressed);
    }

    #[test]
    fn replace_with_same_path_is_noop() {
        let dir = tempdir().unwrap();
        let (mut watcher, path, _count) = watched(dir.path());
        watcher.suppress();
        // Going through a non-canonical spelling of the same file.
        let alias = dir.path().join(".").join("todo.txt");
        assert!(!watcher.replace(&alias).unwrap());
        // A restart would have reset the phase to Watching.
        assert_eq!(watcher.phase(), WatchPhase::Suppressed);
        assert_eq!(watcher.watched_path(), Some(path));
    }

    #[test]
    fn replace_with_other_path_drops_old_subscription() {
        let dir = tempdir().unwrap();
        let (mut watcher, old, count) = watched(dir.path());
        let other = dir.path().join("done.txt");
        std::fs::write(&other, "").unwrap();
        assert!(watcher.replace(&other).unwrap());

        assert!(!watcher.on_event(ChangeKind::Modify, &old));
        assert!(watcher.on_event(ChangeKind::Modify, &other.canonicalize().unwrap()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_silences_everything() {
        let dir = tempdir().unwrap();
        let (mut watcher, path, count) = watched(dir.path());
        watcher.stop();
        assert_eq!(watcher.phase(), WatchPhase::Stopped);
        assert!(watcher.watched_path().is_none());
        assert!(!watcher.on_event(ChangeKind::CloseWrite, &path));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_directory_is_a_setup_error() {
        let (cb, _count) = counting();
        let mut watcher = ChangeWatcher::new(cb).unwrap();
        let err = watcher
            .start(Path::new("/definitely/not/here/todo.txt"))
            .unwrap_err();
        assert!(matches!(err, StoreError::WatchSetup { .. }));
        assert_eq!(watcher.phase(), WatchPhase::Stopped);
    }

    #[test]
    fn canonical_target_resolves_missing_file_via_parent() {
        let dir = tempdir().unwrap();
        let target = canonical_target(&dir.path().join("new.txt")).unwrap();
        assert_eq!(target, dir.path().canonicalize().unwrap().join("new.txt"));
    }

    #[test]
    fn classify_keeps_only_relevant_kinds() {
        let p = PathBuf::from("/x/todo.txt");
        let ev = |kind| Event::new(kind).add_path(p.clone());

        let close = classify_event(&ev(EventKind::Access(AccessKind::Close(AccessMode::Write))));
        assert_eq!(close, vec![(ChangeKind::CloseWrite, p.clone())]);

        let data = classify_event(&ev(EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert_eq!(data, vec![(ChangeKind::Modify, p.clone())]);

        let moved = classify_event(&ev(EventKind::Modify(ModifyKind::Name(RenameMode::To))));
        assert_eq!(moved, vec![(ChangeKind::MovedTo, p.clone())]);

        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/x/.tmp123"))
            .add_path(p.clone());
        assert_eq!(classify_event(&both), vec![(ChangeKind::MovedTo, p.clone())]);

        assert!(classify_event(&ev(EventKind::Modify(ModifyKind::Name(RenameMode::From)))).is_empty());
        assert!(classify_event(&ev(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)))).is_empty());
        assert!(classify_event(&ev(EventKind::Create(CreateKind::File))).is_empty());
    }
}
