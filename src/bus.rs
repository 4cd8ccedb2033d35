// Command Bus
// Single-consumer queue: every background task and the input thread talk to
// the interaction loop only through these messages.

use crate::error::{ReadError, WatchError, WriteError};
use crate::model::Snapshot;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::{error, trace};

/// Terminal-independent key, translated from the UI backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Esc,
    Up,
    Down,
    Tab,
    BackTab,
    Backspace,
    /// Ctrl-C
    Interrupt,
}

#[derive(Debug)]
pub enum Event {
    /// Debounced document change from watcher subscription `generation`
    Changed { generation: u64 },
    /// The subscription died and must be replaced
    WatchFailed { generation: u64, error: WatchError },
    /// Time to try arming a watcher again after a failed subscribe
    WatchRetry { ticket: u64 },
    ReadComplete {
        ticket: u64,
        result: Result<Snapshot, ReadError>,
    },
    WriteComplete {
        ticket: u64,
        result: Result<(), WriteError>,
    },
    /// Suppression window after a write has passed
    SuppressionElapsed { ticket: u64 },
    Key(Key),
    Resize,
}

/// Sending half, cloned into every producer
#[derive(Debug, Clone)]
pub struct CommandBus {
    tx: Sender<Event>,
}

/// Receiving half, owned by the interaction loop
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<Event>,
}

pub fn command_bus() -> (CommandBus, Inbox) {
    let (tx, rx) = mpsc::channel();
    (CommandBus { tx }, Inbox { rx })
}

impl CommandBus {
    /// Returns false once the loop has gone away, so producers can stop.
    pub fn send(&self, event: Event) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::SendError(event)) => {
                trace!("event loop gone, dropping {:?}", event);
                false
            }
        }
    }

    /// Deliver `event` after `delay` from a short-lived timer thread
    pub fn send_after(&self, delay: Duration, event: Event) {
        let bus = self.clone();
        let spawned = thread::Builder::new()
            .name("tabsync-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                bus.send(event);
            });
        if let Err(e) = spawned {
            error!("cannot spawn timer thread: {}", e);
        }
    }
}

impl Inbox {
    /// Block until the next message. None once every sender is gone.
    pub fn recv(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_messages_arrive_in_order() {
        let (bus, inbox) = command_bus();
        bus.send(Event::Key(Key::Char('a')));
        bus.send(Event::Changed { generation: 1 });
        bus.send(Event::Key(Key::Enter));

        assert!(matches!(inbox.try_recv(), Some(Event::Key(Key::Char('a')))));
        assert!(matches!(inbox.try_recv(), Some(Event::Changed { generation: 1 })));
        assert!(matches!(inbox.try_recv(), Some(Event::Key(Key::Enter))));
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_send_after_waits() {
        let (bus, inbox) = command_bus();
        let start = Instant::now();
        bus.send_after(Duration::from_millis(40), Event::SuppressionElapsed { ticket: 3 });

        let event = inbox.recv_timeout(Duration::from_secs(2));
        assert!(matches!(event, Some(Event::SuppressionElapsed { ticket: 3 })));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_send_fails_after_inbox_dropped() {
        let (bus, inbox) = command_bus();
        drop(inbox);
        assert!(!bus.send(Event::Resize));
    }
}
