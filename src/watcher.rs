//! Document watcher.
//!
//! Subscribes to filesystem notifications for one document and turns bursts of
//! raw events into a single `Event::Changed` on the command bus.
//!
//! ```text
//! notify callback → raw channel → debounce thread (trailing edge) → CommandBus
//! ```
//!
//! A [`Subscription`] is cancelled when dropped; a cancelled subscription never
//! emits again, so replacing one is always "drop the old, arm the new".

use crate::bus::{CommandBus, Event};
use crate::error::WatchError;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Reference debounce window (D)
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

// =============================================================================
// Debouncer - pure timing
// =============================================================================

/// Trailing-edge debouncer: every recorded event pushes the deadline out to
/// `now + window`; it fires once when the deadline is reached.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Start or restart the timer
    pub fn record(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once per burst, when the quiet period has elapsed
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// How long to wait before the next `fire` can succeed. None when idle.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

/// Write-or-create on the watched file. Metadata-only touches are noise.
pub fn is_relevant(event: &notify::Event, file_name: &OsStr) -> bool {
    let kind_matches = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    kind_matches && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle to one armed watch. Dropping it tears the watch down.
pub struct Subscription {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    _watcher: Option<RecommendedWatcher>,
}

impl Subscription {
    /// A subscription with no OS watch behind it (used by alternative sources)
    pub fn detached(generation: u64) -> Self {
        Self {
            generation,
            cancelled: Arc::new(AtomicBool::new(false)),
            _watcher: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Shared flag a producer checks before emitting
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .field("os_watch", &self._watcher.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Something that can arm a change subscription for a document
pub trait WatchSource: Send {
    fn subscribe(
        &self,
        path: &Path,
        generation: u64,
        bus: CommandBus,
    ) -> Result<Subscription, WatchError>;
}

// =============================================================================
// notify-backed source
// =============================================================================

#[derive(Debug, Clone)]
pub struct NotifyWatchSource {
    window: Duration,
}

impl NotifyWatchSource {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl Default for NotifyWatchSource {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl WatchSource for NotifyWatchSource {
    fn subscribe(
        &self,
        path: &Path,
        generation: u64,
        bus: CommandBus,
    ) -> Result<Subscription, WatchError> {
        let file_name: OsString = path
            .file_name()
            .ok_or_else(|| notify::Error::generic("document path has no file name"))?
            .to_os_string();

        // sync channel for notify callbacks
        let (raw_tx, raw_rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })?;

        // Watch the directory: editors often replace the file instead of writing it
        let dir = watch_dir(path);
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let window = self.window;
        thread::Builder::new()
            .name(format!("tabsync-watch-{}", generation))
            .spawn(move || debounce_loop(raw_rx, file_name, window, generation, flag, bus))
            .map_err(notify::Error::io)?;

        debug!("watch #{} armed on {}", generation, dir.display());
        Ok(Subscription {
            generation,
            cancelled,
            _watcher: Some(watcher),
        })
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn debounce_loop(
    raw_rx: Receiver<notify::Result<notify::Event>>,
    file_name: OsString,
    window: Duration,
    generation: u64,
    cancelled: Arc<AtomicBool>,
    bus: CommandBus,
) {
    let mut debouncer = Debouncer::new(window);

    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let received = match debouncer.remaining(Instant::now()) {
            Some(wait) => raw_rx.recv_timeout(wait),
            None => raw_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Ok(event)) => {
                if is_relevant(&event, &file_name) {
                    trace!("watch #{} raw {:?}", generation, event.kind);
                    debouncer.record(Instant::now());
                }
            }
            Ok(Err(e)) => {
                warn!("watch #{} failed: {}", generation, e);
                if !cancelled.load(Ordering::SeqCst) {
                    bus.send(Event::WatchFailed {
                        generation,
                        error: e.into(),
                    });
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if debouncer.fire(Instant::now()) && !cancelled.load(Ordering::SeqCst) {
                    debug!("watch #{} settled, signalling change", generation);
                    if !bus.send(Event::Changed { generation }) {
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // normal when the subscription was dropped; otherwise notify went away
                if !cancelled.load(Ordering::SeqCst) {
                    warn!("watch #{} lost its event source", generation);
                    bus.send(Event::WatchFailed {
                        generation,
                        error: WatchError::Disconnected,
                    });
                }
                break;
            }
        }
    }

    trace!("watch #{} thread exiting", generation);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::command_bus;
    use notify::event::{CreateKind, DataChange, MetadataKind};

    const D: Duration = Duration::from_millis(500);

    fn make_event(path: &str, kind: EventKind) -> notify::Event {
        notify::Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    fn modify_kind() -> EventKind {
        EventKind::Modify(ModifyKind::Data(DataChange::Any))
    }

    #[test]
    fn test_debouncer_idle() {
        let mut d = Debouncer::new(D);
        let now = Instant::now();
        assert!(!d.is_pending());
        assert!(d.remaining(now).is_none());
        assert!(!d.fire(now));
    }

    #[test]
    fn test_burst_fires_once() {
        let mut d = Debouncer::new(D);
        let t0 = Instant::now();
        let mut fired = 0;

        // 10 raw events 40ms apart, well inside the window
        for i in 0..10 {
            let t = t0 + Duration::from_millis(40 * i);
            if d.fire(t) {
                fired += 1;
            }
            d.record(t);
        }
        // poll well past the end
        for step in 0..50 {
            if d.fire(t0 + Duration::from_millis(400 + 20 * step)) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_three_saves_100ms_apart_fire_after_last() {
        let mut d = Debouncer::new(D);
        let t0 = Instant::now();
        let last = t0 + Duration::from_millis(200);
        d.record(t0);
        d.record(t0 + Duration::from_millis(100));
        d.record(last);

        assert!(!d.fire(t0 + D), "restarted timer must not fire D after the first save");
        assert!(!d.fire(last + D - Duration::from_millis(1)));
        assert_eq!(d.remaining(last), Some(D));
        assert!(d.fire(last + D));
        assert!(!d.fire(last + D + D));
    }

    #[test]
    fn test_separate_bursts_fire_separately() {
        let mut d = Debouncer::new(D);
        let t0 = Instant::now();
        d.record(t0);
        assert!(d.fire(t0 + D));
        d.record(t0 + D * 3);
        assert!(d.fire(t0 + D * 4));
    }

    #[test]
    fn test_relevance_filter() {
        let name = OsStr::new("data.csv");
        assert!(is_relevant(&make_event("/tmp/x/data.csv", modify_kind()), name));
        assert!(is_relevant(
            &make_event("/tmp/x/data.csv", EventKind::Create(CreateKind::File)),
            name
        ));
        assert!(!is_relevant(&make_event("/tmp/x/other.csv", modify_kind()), name));
        assert!(!is_relevant(
            &make_event(
                "/tmp/x/data.csv",
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))
            ),
            name
        ));
        assert!(!is_relevant(
            &make_event(
                "/tmp/x/data.csv",
                EventKind::Remove(notify::event::RemoveKind::File)
            ),
            name
        ));
    }

    #[test]
    fn test_watch_dir_of_bare_file_name() {
        assert_eq!(watch_dir(Path::new("data.csv")), PathBuf::from("."));
        assert_eq!(watch_dir(Path::new("/a/b/data.csv")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_dropping_subscription_cancels() {
        let sub = Subscription::detached(4);
        let flag = sub.cancel_flag();
        assert_eq!(sub.generation(), 4);
        assert!(!sub.is_cancelled());
        drop(sub);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_notify_source_signals_once_per_burst() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a").unwrap();

        let (bus, inbox) = command_bus();
        let source = NotifyWatchSource::new(Duration::from_millis(150));
        let _sub = source.subscribe(&path, 1, bus).unwrap();

        for i in 0..3 {
            std::fs::write(&path, format!("burst {}", i)).unwrap();
            thread::sleep(Duration::from_millis(20));
        }

        let first = inbox.recv_timeout(Duration::from_secs(5));
        assert!(matches!(first, Some(Event::Changed { generation: 1 })));
        assert!(inbox.recv_timeout(Duration::from_millis(600)).is_none());
    }

    #[test]
    fn test_lost_event_source_reports_disconnect() {
        let (bus, inbox) = command_bus();
        let (raw_tx, raw_rx) = mpsc::channel();
        drop(raw_tx);

        let cancelled = Arc::new(AtomicBool::new(false));
        debounce_loop(raw_rx, OsString::from("data.csv"), D, 7, cancelled, bus);

        match inbox.try_recv() {
            Some(Event::WatchFailed { generation, error }) => {
                assert_eq!(generation, 7);
                assert!(matches!(error, WatchError::Disconnected));
            }
            other => panic!("expected a watch failure, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_loop_exits_quietly() {
        let (bus, inbox) = command_bus();
        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<notify::Event>>();
        drop(raw_tx);

        let cancelled = Arc::new(AtomicBool::new(true));
        debounce_loop(raw_rx, OsString::from("data.csv"), D, 8, cancelled, bus);
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_cancelled_notify_source_stays_silent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a").unwrap();

        let (bus, inbox) = command_bus();
        let source = NotifyWatchSource::new(Duration::from_millis(100));
        let sub = source.subscribe(&path, 2, bus).unwrap();
        drop(sub);

        std::fs::write(&path, "b").unwrap();
        assert!(inbox.recv_timeout(Duration::from_millis(500)).is_none());
    }
}
