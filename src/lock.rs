//! Advisory single-writer lock for the data directory.
//!
//! Writers (ingest, reason, normalize, baseline) hold a [`RunLock`] for
//! their whole write section. The lock file is created with `create_new`,
//! so a second writer fails fast instead of interleaving appends.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::StoreError;

/// Held for the lifetime of the value; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked(path.to_path_buf()))
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let stamp = format!(
            "pid={} at={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        file.write_all(stamp.as_bytes())
            .map_err(|e| StoreError::io(path, e))?;
        debug!(lock = %path.display(), "acquired run lock");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
