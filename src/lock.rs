//! Single-instance lock for the watch loop.
//!
//! A well-known file in the temp directory is `flock`ed exclusively and holds the PID of
//! the owner. The kernel drops the lock if the process dies, so a stale file left
//! behind by a crash never blocks the next start.
//!
//! The owner unlinks the file on exit while still holding the lock. A process that
//! opened the old file just before that can then win the lock on an unlinked inode, so
//! after locking, the path is checked to still name the locked file; if not, the
//! attempt starts over on the new file.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};

pub fn default_lock_path() -> PathBuf {
    std::env::temp_dir().join("music-lastfm.lock")
}

/// Held for the lifetime of the watch loop; removes the lock file on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = None;
        for _ in 0..MAX_ATTEMPTS {
            let candidate = open_and_lock(path)?;
            if is_linked_at(&candidate, path) {
                file = Some(candidate);
                break;
            }
            debug!("lock file {} was replaced while locking, retrying", path.display());
        }
        let mut file =
            file.ok_or_else(|| anyhow!("Lock file {} keeps being replaced", path.display()))?;

        file.set_len(0)?;
        write!(file, "{}", std::process::id())
            .with_context(|| format!("Failed to write pid to {}", path.display()))?;
        file.flush()?;
        debug!("acquired instance lock {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

const MAX_ATTEMPTS: usize = 5;

fn open_and_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::WouldBlock {
            let owner = std::fs::read_to_string(path).unwrap_or_default();
            bail!(
                "watch is already running (pid {}) - if it is not, delete {} and try again",
                owner.trim(),
                path.display()
            );
        }
        return Err(err).with_context(|| format!("Failed to lock {}", path.display()));
    }
    Ok(file)
}

/// Whether `path` still names the inode `file` has open.
fn is_linked_at(file: &File, path: &Path) -> bool {
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Remove while still holding the lock; closing `file` releases it.
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!("could not remove lock file {}: {err}", self.path.display());
        }
        debug!("released instance lock {}", self.path.display());
    }
}
