// Error taxonomy
// Every variant here is recoverable; the process never exits on one of them.

use std::path::PathBuf;
use thiserror::Error;

/// Document temporarily unreadable. Recovered by keeping the previous snapshot.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document: {0}")]
    Csv(#[from] csv::Error),

    #[error("sheet '{0}' not found in document")]
    MissingSheet(String),
}

/// A single data row that could not become a model value. The row is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{sheet} row {row}: {reason}")]
pub struct RowParseError {
    pub sheet: &'static str,
    /// 1-based, as a spreadsheet would show it
    pub row: usize,
    pub reason: String,
}

/// Formula in a reserved cell did not evaluate. Recovered by a zero total.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    #[error("unsupported formula '{0}'")]
    Unsupported(String),

    #[error("bad cell reference '{0}'")]
    BadReference(String),

    #[error("'{0}' is not a number")]
    NotANumber(String),
}

/// Saving the document failed. The snapshot stays as it was.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("cannot load document before writing: {0}")]
    Load(#[from] ReadError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode document: {0}")]
    Csv(#[from] csv::Error),
}

/// The change subscription died. A fresh one has to be armed.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("filesystem watch failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("watch channel closed")]
    Disconnected,
}

/// A draft field that does not convert to the row's typed value
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DraftError {
    #[error("{field}: '{value}' is not a number")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field}: expected yes or no, got '{value}'")]
    InvalidFlag { field: &'static str, value: String },
}

/// User command that is not allowed in the current interaction state
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("an edit is already open")]
    SessionOpen,

    #[error("no edit is open")]
    NotEditing,

    #[error("not viewing a collection")]
    NotViewing,

    #[error("only available from the menu")]
    NotInMenu,

    #[error("row {index} does not exist ({len} rows)")]
    NoSuchRow { index: usize, len: usize },

    #[error("the row being edited changed on disk; press Esc to discard")]
    StaleSession,

    #[error(transparent)]
    Draft(#[from] DraftError),
}
