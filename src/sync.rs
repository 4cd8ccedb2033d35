// Sync Orchestrator
//
// Owns the current Snapshot and is the only code that replaces it. Drives the
// watcher and the gateway, and keeps our own writes from being mistaken for
// external edits.
//
//   Watching ──ChangeSignal──▶ reload ──▶ (read) ──▶ Watching (re-armed)
//   commit ──▶ (write) ──▶ Suppressed(until) ──window──▶ forced reload
//
// All I/O runs on worker threads; results come back through the CommandBus
// and are applied here, on the interaction thread.

use crate::bus::{CommandBus, Event};
use crate::gateway::DocumentGateway;
use crate::model::Snapshot;
use crate::watcher::{Subscription, WatchSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub path: PathBuf,
    /// Debounce window, reused as the suppression window after a write
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Watching,
    Suppressed { until: Instant },
}

/// What the interaction layer needs to hear about
#[derive(Debug, Clone)]
pub enum SyncNotice {
    Reloaded(Arc<Snapshot>),
    ReadFailed(String),
    Saved,
    WriteFailed(String),
    WatchFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Io {
    Read,
    Write,
}

/// Counters, mostly for the status bar and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub reads: u64,
    pub writes: u64,
    pub suppressed_signals: u64,
    pub subscriptions: u64,
}

pub struct SyncOrchestrator {
    path: PathBuf,
    window: Duration,
    gateway: Arc<dyn DocumentGateway>,
    source: Box<dyn WatchSource>,
    bus: CommandBus,

    snapshot: Arc<Snapshot>,
    mode: SyncMode,
    subscription: Option<Subscription>,

    next_generation: u64,
    next_ticket: u64,
    /// At most one read or write against the document at a time
    in_flight: Option<(u64, Io)>,
    pending_write: Option<Snapshot>,
    reload_pending: bool,
    suppression_ticket: Option<u64>,
    retry_ticket: Option<u64>,

    stats: SyncStats,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        gateway: Arc<dyn DocumentGateway>,
        source: Box<dyn WatchSource>,
        bus: CommandBus,
        initial: Snapshot,
    ) -> Self {
        Self {
            path: config.path,
            window: config.window,
            gateway,
            source,
            bus,
            snapshot: Arc::new(initial),
            mode: SyncMode::Watching,
            subscription: None,
            next_generation: 0,
            next_ticket: 0,
            in_flight: None,
            pending_write: None,
            reload_pending: false,
            suppression_ticket: None,
            retry_ticket: None,
            stats: SyncStats::default(),
        }
    }

    /// Kick off the initial load. The watcher is armed once it completes.
    pub fn start(&mut self) {
        info!("syncing {}", self.path.display());
        self.reload();
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// A write is queued, running, or waiting out its echo
    pub fn is_saving(&self) -> bool {
        matches!(self.in_flight, Some((_, Io::Write)))
            || self.pending_write.is_some()
            || self.suppression_ticket.is_some()
    }

    pub fn is_watching(&self) -> bool {
        self.subscription.is_some()
    }

    /// Tear down the watch and read the document again.
    pub fn reload(&mut self) {
        self.teardown();
        // a reload now makes any scheduled forced reload redundant
        self.suppression_ticket = None;
        self.mode = SyncMode::Watching;

        if self.in_flight.is_some() {
            trace!("reload requested while busy, queued");
            self.reload_pending = true;
        } else {
            self.spawn_read();
        }
    }

    /// Persist `next`. The in-memory snapshot is only replaced by the reload
    /// that follows, never from `next` directly.
    pub fn commit_write(&mut self, next: Snapshot) {
        self.teardown();
        // the write supersedes any reload still waiting to happen
        self.reload_pending = false;
        self.suppression_ticket = None;

        if self.in_flight.is_some() {
            debug!("write queued behind in-flight I/O");
            self.pending_write = Some(next);
        } else {
            self.spawn_write(next);
        }
    }

    /// Apply one bus message. Keys and resizes are not ours and yield nothing.
    pub fn handle(&mut self, event: Event) -> Vec<SyncNotice> {
        let mut notices = Vec::new();

        match event {
            Event::Changed { generation } => self.on_changed(generation),

            Event::WatchFailed { generation, error } => {
                if self.current_generation() == Some(generation) {
                    warn!("watch #{} died: {}", generation, error);
                    self.subscription = None;
                    notices.push(SyncNotice::WatchFailed(error.to_string()));
                    notices.extend(self.settle());
                }
            }

            Event::WatchRetry { ticket } => {
                if self.retry_ticket == Some(ticket) {
                    self.retry_ticket = None;
                    notices.extend(self.settle());
                }
            }

            Event::ReadComplete { ticket, result } => {
                if self.in_flight != Some((ticket, Io::Read)) {
                    trace!("stale read #{} ignored", ticket);
                    return notices;
                }
                self.in_flight = None;

                match result {
                    Ok(snapshot) => {
                        self.snapshot = Arc::new(snapshot);
                        debug!("snapshot replaced by read #{}", ticket);
                        notices.push(SyncNotice::Reloaded(self.snapshot()));
                    }
                    Err(e) => {
                        // keep the previous snapshot, keep watching
                        warn!("read #{} failed: {}", ticket, e);
                        notices.push(SyncNotice::ReadFailed(e.to_string()));
                    }
                }
                notices.extend(self.settle());
            }

            Event::WriteComplete { ticket, result } => {
                if self.in_flight != Some((ticket, Io::Write)) {
                    trace!("stale write #{} ignored", ticket);
                    return notices;
                }
                self.in_flight = None;

                match result {
                    Ok(()) => {
                        notices.push(SyncNotice::Saved);
                        if self.pending_write.is_none() {
                            self.suppress();
                        }
                    }
                    Err(e) => {
                        error!("write #{} failed: {}", ticket, e);
                        self.mode = SyncMode::Watching;
                        notices.push(SyncNotice::WriteFailed(e.to_string()));
                    }
                }
                notices.extend(self.settle());
            }

            Event::SuppressionElapsed { ticket } => {
                if self.suppression_ticket == Some(ticket) {
                    debug!("suppression over, forcing reload");
                    self.reload();
                }
            }

            Event::Key(_) | Event::Resize => {}
        }

        notices
    }

    fn on_changed(&mut self, generation: u64) {
        if let SyncMode::Suppressed { until } = self.mode {
            if Instant::now() < until {
                self.stats.suppressed_signals += 1;
                debug!("change #{} inside suppression window, treated as our own echo", generation);
                return;
            }
            self.mode = SyncMode::Watching;
        }

        if self.current_generation() != Some(generation) {
            trace!("change from torn-down watch #{} ignored", generation);
            return;
        }

        debug!("external change detected by watch #{}", generation);
        self.reload();
    }

    /// Enter Suppressed and schedule the forced reload for when it ends
    fn suppress(&mut self) {
        let ticket = self.ticket();
        self.mode = SyncMode::Suppressed {
            until: Instant::now() + self.window,
        };
        self.suppression_ticket = Some(ticket);
        self.reload_pending = false;
        self.bus
            .send_after(self.window, Event::SuppressionElapsed { ticket });
    }

    /// Decide what runs next once nothing is in flight
    fn settle(&mut self) -> Vec<SyncNotice> {
        if self.in_flight.is_some() {
            return Vec::new();
        }
        if let Some(next) = self.pending_write.take() {
            self.reload_pending = false;
            self.spawn_write(next);
            return Vec::new();
        }
        if self.reload_pending {
            self.reload_pending = false;
            self.spawn_read();
            return Vec::new();
        }
        if self.suppression_ticket.is_some() || self.subscription.is_some() {
            return Vec::new();
        }
        self.arm()
    }

    fn arm(&mut self) -> Vec<SyncNotice> {
        self.teardown();
        self.next_generation += 1;
        let generation = self.next_generation;

        match self
            .source
            .subscribe(&self.path, generation, self.bus.clone())
        {
            Ok(sub) => {
                self.stats.subscriptions += 1;
                self.subscription = Some(sub);
                Vec::new()
            }
            Err(e) => {
                warn!("cannot arm watch #{}: {}, retrying in {:?}", generation, e, self.window);
                self.schedule_retry();
                vec![SyncNotice::WatchFailed(e.to_string())]
            }
        }
    }

    /// Come back through `settle` after one window
    fn schedule_retry(&mut self) {
        let ticket = self.ticket();
        self.retry_ticket = Some(ticket);
        self.bus.send_after(self.window, Event::WatchRetry { ticket });
    }

    /// A worker thread could not be started. Requeue the work; the retry
    /// runs it or, failing that, at least re-arms the watch.
    fn spawn_failed(&mut self, io: Io, unsent: Option<Snapshot>, e: std::io::Error) {
        error!("cannot spawn {:?} worker: {}, retrying in {:?}", io, e, self.window);
        match unsent {
            Some(next) => self.pending_write = Some(next),
            None => self.reload_pending = true,
        }
        self.schedule_retry();
    }

    fn teardown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            trace!("tearing down watch #{}", sub.generation());
        }
    }

    fn current_generation(&self) -> Option<u64> {
        self.subscription.as_ref().map(Subscription::generation)
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn spawn_read(&mut self) {
        let ticket = self.ticket();
        let gateway = Arc::clone(&self.gateway);
        let path = self.path.clone();
        let bus = self.bus.clone();

        let spawned = thread::Builder::new()
            .name(format!("tabsync-read-{}", ticket))
            .spawn(move || {
                let result = gateway.read(&path);
                bus.send(Event::ReadComplete { ticket, result });
            });

        match spawned {
            Ok(_) => {
                self.stats.reads += 1;
                self.in_flight = Some((ticket, Io::Read));
            }
            Err(e) => self.spawn_failed(Io::Read, None, e),
        }
    }

    fn spawn_write(&mut self, next: Snapshot) {
        let ticket = self.ticket();
        let gateway = Arc::clone(&self.gateway);
        let path = self.path.clone();
        let bus = self.bus.clone();
        let next = Arc::new(next);
        let payload = Arc::clone(&next);

        let spawned = thread::Builder::new()
            .name(format!("tabsync-write-{}", ticket))
            .spawn(move || {
                let result = gateway.write(&path, &payload);
                bus.send(Event::WriteComplete { ticket, result });
            });

        match spawned {
            Ok(_) => {
                self.stats.writes += 1;
                self.in_flight = Some((ticket, Io::Write));
            }
            Err(e) => self.spawn_failed(Io::Write, Some(Arc::unwrap_or_clone(next)), e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
