//! File-based locking to prevent concurrent operations on one database

use anyhow::{Context, Result};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock held for the duration of a backup or restore
pub struct BackupLock {
    // Store the lock and its guard together
    lock: Box<(RwLock<File>, Option<fd_lock::RwLockWriteGuard<'static, File>>)>,
    lock_path: PathBuf,
}

impl BackupLock {
    /// Acquire an exclusive lock for a database.
    /// Returns an error if another operation already holds it.
    pub fn acquire(lock_dir: &Path, database: &str) -> Result<Self> {
        let lock_path = Self::lock_path(lock_dir, database);

        debug!("Attempting to acquire lock: {:?}", lock_path);

        std::fs::create_dir_all(lock_dir).context("Failed to create lock directory")?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        let mut boxed_lock = Box::new((RwLock::new(file), None));

        // SAFETY: the guard borrows the RwLock stored in the same Box. The Box
        // never moves its contents and `Drop` releases the guard before the
        // RwLock is dropped, so the borrow never outlives its referent.
        let lock_ptr = &mut boxed_lock.0 as *mut RwLock<File>;
        let guard = unsafe { (*lock_ptr).try_write() }.with_context(|| {
            format!(
                "Database '{}' is busy: another backup or restore holds the lock",
                database
            )
        })?;

        let static_guard: fd_lock::RwLockWriteGuard<'static, File> = unsafe { std::mem::transmute(guard) };
        boxed_lock.1 = Some(static_guard);

        info!("Acquired lock for database: {}", database);

        Ok(Self {
            lock: boxed_lock,
            lock_path,
        })
    }

    fn lock_path(lock_dir: &Path, database: &str) -> PathBuf {
        let safe: String = database
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        lock_dir.join(format!("backyard-backup-{}.lock", safe))
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        // Tuple fields drop in order, so the guard has to go first
        self.lock.1.take();
        debug!("Released lock: {:?}", self.lock_path);

        // Best effort
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}
