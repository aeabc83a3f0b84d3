//! Run lock held in the upload root for the duration of a migration.

use crate::error::MigrateError;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// File name of the lock inside the upload root.
pub const LOCK_FILE: &str = ".webp-migrate.lock";

/// Holds `<root>/.webp-migrate.lock`; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file, failing with [`MigrateError::LockHeld`] if it
    /// already exists.
    pub fn acquire(root: &Path) -> Result<Self, MigrateError> {
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrateError::LockHeld { path });
            }
            Err(source) => return Err(MigrateError::Io { path, source }),
        };

        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        // Guard first so a failed write still removes the file.
        let lock = Self { path };
        writeln!(file, "pid={}\nstarted={}", std::process::id(), since).map_err(|source| {
            MigrateError::Io {
                path: lock.path.clone(),
                source,
            }
        })?;

        debug!("Acquired {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released {}", self.path.display()),
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}
