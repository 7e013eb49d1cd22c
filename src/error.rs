//! Typed errors for the record stores.
//!
//! Command-level code uses `anyhow`; these variants exist where callers
//! need to branch (a held lock, an out-of-order knowledge store that can be
//! normalised, a malformed line that must be rejected).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid record '{id}': {message}")]
    Invalid { id: String, message: String },

    #[error("records out of order at line {line}: '{prev}' is not before '{next}'")]
    OutOfOrder {
        line: usize,
        prev: String,
        next: String,
    },

    #[error("offset index disagrees with record file for '{id}'")]
    IndexMismatch { id: String },

    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("another run holds the lock {0} (remove it if no run is active)")]
    Locked(PathBuf),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that `normalize` can repair.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            StoreError::OutOfOrder { .. } | StoreError::IndexMismatch { .. }
        )
    }
}
