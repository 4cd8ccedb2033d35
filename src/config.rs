//! Command-line configuration.

use crate::sync::SyncConfig;
use crate::watcher::DEFAULT_DEBOUNCE;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Terminal budget tracker that follows a spreadsheet-like document on disk
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Document to view and edit
    #[arg(default_value = "data.csv", value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    /// Quiet period before a burst of file changes counts as one edit (ms).
    /// Also how long our own writes are ignored by the watcher.
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE.as_millis() as u64,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub debounce_ms: u64,

    /// Where to write logs (default: tabsync.log in the temp directory)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,
}

/// Resolved settings the binary runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub document: PathBuf,
    pub window: Duration,
    pub log_file: PathBuf,
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        Self {
            document: args.file,
            window: Duration::from_millis(args.debounce_ms),
            log_file: args
                .log_file
                .unwrap_or_else(|| std::env::temp_dir().join("tabsync.log")),
        }
    }
}

impl Settings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            path: self.document.clone(),
            window: self.window,
        }
    }
}
