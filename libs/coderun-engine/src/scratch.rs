/// Scratch Directory - Shared Location for Ephemeral Files
///
/// **Ownership Rules:**
/// - Each execution holds a `ScratchLease` for as long as its files exist
/// - Executions delete only their own files, never the directory
/// - Releasing the last lease runs the idle sweep: the directory goes away
///   once nothing uses it and it is empty
/// - `sweep()` runs the same check on demand (e.g. for a directory left by a
///   crashed process)
///
/// Lease bookkeeping and directory creation happen under one lock, so a
/// sweep can never remove the directory out from under a starting execution.
/// The count is per handle: clone the handle to share it, do not build a
/// second one for the same path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    leases: Mutex<usize>,
}

#[derive(Debug, Clone)]
pub struct ScratchDir {
    inner: Arc<Inner>,
}

impl ScratchDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                leases: Mutex::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn active_leases(&self) -> usize {
        *self.lock()
    }

    /// Create the directory if needed and register an active execution
    pub fn lease(&self) -> io::Result<ScratchLease> {
        let mut leases = self.lock();
        fs::create_dir_all(&self.inner.path)?;
        *leases += 1;
        Ok(ScratchLease {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Idle sweep: remove the directory if nothing uses it.
    ///
    /// Returns true when the directory was removed. Failures are logged and
    /// reported as false.
    pub fn sweep(&self) -> bool {
        let leases = self.lock();
        if *leases > 0 {
            debug!(path = %self.inner.path.display(), leases = *leases, "Scratch directory in use, not sweeping");
            return false;
        }

        match fs::remove_dir(&self.inner.path) {
            Ok(()) => {
                debug!(path = %self.inner.path.display(), "Scratch directory removed");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                // Non-empty (stray files from a crashed run or another
                // process) or not removable; leave it for the next sweep.
                warn!(path = %self.inner.path.display(), error = %e, "Scratch directory not swept");
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        lock_leases(&self.inner)
    }
}

fn lock_leases(inner: &Inner) -> MutexGuard<'_, usize> {
    inner.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Claim on the scratch directory for the duration of one execution
#[derive(Debug)]
pub struct ScratchLease {
    inner: Arc<Inner>,
}

impl ScratchLease {
    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        let mut leases = lock_leases(&self.inner);
        *leases = leases.saturating_sub(1);
        if *leases > 0 {
            return;
        }

        // Still under the lock, so no new lease can recreate the directory
        // while it is being removed.
        match fs::remove_dir(&self.inner.path) {
            Ok(()) => debug!(path = %self.inner.path.display(), "Idle scratch directory removed"),
            Err(e) => debug!(path = %self.inner.path.display(), error = %e, "Idle scratch directory kept"),
        }
    }
}
