// Tabsync - Core Library
// Document sync engine and interaction state machine, shared by the terminal
// binary and the tests

pub mod model;
pub mod error;
pub mod workbook;   // csv-backed multi-sheet document + SUM evaluation
pub mod gateway;    // Snapshot <-> document mapping
pub mod bus;        // Single-consumer command bus
pub mod watcher;    // notify subscription + debouncing
pub mod sync;       // Sync orchestrator (reload, write, echo suppression)
pub mod editor;     // Drafts and the field editor seam
pub mod state;      // Interaction state machine
pub mod app;        // Interaction loop
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use model::{Collection, Expense, Row, Snapshot, Stonk, Target, WatchItem};
pub use error::{
    DraftError, FormulaError, ReadError, RowParseError, TransitionError, WatchError, WriteError,
};
pub use workbook::{CellRef, Sheet, Workbook};
pub use gateway::{DocumentGateway, WorkbookGateway};
pub use bus::{command_bus, CommandBus, Event, Inbox, Key};
pub use watcher::{Debouncer, NotifyWatchSource, Subscription, WatchSource, DEFAULT_DEBOUNCE};
pub use sync::{SyncConfig, SyncMode, SyncNotice, SyncOrchestrator, SyncStats};
pub use editor::{Draft, EditorOutcome, Field, FieldEditor, InlineForm};
pub use state::{Banner, BannerKind, Command, EditSession, Interaction, Mode};
pub use app::{App, Flow};
pub use config::{Args, Settings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
