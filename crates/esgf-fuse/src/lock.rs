//! Download claims.
//!
//! A download is claimed twice: in-process through [`ClaimRegistry`], so two
//! FUSE worker threads never race on the same path, and on disk through a
//! [`LockFile`], so other processes sharing the cache root see the download
//! in progress. The lock file carries an owner token and its mtime is
//! refreshed while the download runs.

use std::collections::HashSet;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use crate::constants::LOCK_SUFFIX;

/// State of a lock file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Absent,
    /// Present and younger than the stale threshold.
    Active,
    /// Present and older than the stale threshold.
    Stale,
}

/// Inspect the lock at `path`.
///
/// `stale_after` of `None` means locks never go stale.
pub fn lock_state(path: &Path, stale_after: Option<Duration>) -> io::Result<LockState> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockState::Absent),
        Err(e) => return Err(e),
    };

    let Some(threshold) = stale_after else {
        return Ok(LockState::Active);
    };

    let age = metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO);

    Ok(if age > threshold { LockState::Stale } else { LockState::Active })
}

/// Result of trying to take a lock file.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(LockFile),
    /// Another download holds the lock.
    Held,
}

/// A held lock file. Removed when dropped.
///
/// The file holds an owner token unique to this lock. Once another process
/// has reclaimed the path, refresh and drop leave the new lock alone.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    reclaimed: bool,
    token: String,
}

static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn owner_token() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_nanos());
    format!("{} {} {}", std::process::id(), nanos, LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

impl LockFile {
    /// Take the lock at `path`, reclaiming it first if it is stale.
    ///
    /// Creation is exclusive; losing the creation race reports `Held`.
    pub fn acquire(path: &Path, stale_after: Option<Duration>) -> io::Result<LockAttempt> {
        let reclaimed = match lock_state(path, stale_after)? {
            LockState::Active => return Ok(LockAttempt::Held),
            LockState::Stale => {
                warn!(lock = %path.display(), "reclaiming stale lock");
                remove_if_present(path)?;
                true
            }
            LockState::Absent => false,
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(LockAttempt::Held),
            Err(e) => return Err(e),
        };
        let token = owner_token();
        if let Err(e) = file.write_all(token.as_bytes()) {
            remove_if_present(path)?;
            return Err(e);
        }

        debug!(lock = %path.display(), "lock acquired");
        Ok(LockAttempt::Acquired(LockFile { path: path.to_path_buf(), reclaimed, token }))
    }

    /// Whether the file at the lock path is still the one this lock created.
    pub fn is_owned(&self) -> bool {
        fs::read_to_string(&self.path).is_ok_and(|content| content == self.token)
    }

    /// Bump the lock's mtime so it does not turn stale while held.
    ///
    /// Returns `false` without touching anything when the lock was replaced.
    pub fn refresh(&self) -> io::Result<bool> {
        if !self.is_owned() {
            return Ok(false);
        }
        OpenOptions::new().write(true).open(&self.path)?.set_modified(SystemTime::now())?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a stale lock was removed to take this one.
    pub fn reclaimed(&self) -> bool {
        self.reclaimed
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.is_owned() {
            warn!(lock = %self.path.display(), "lock was replaced by another owner, leaving it");
            return;
        }
        if let Err(e) = remove_if_present(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove lock files under `root`.
///
/// With `stale_after` set only stale locks are removed; `None` removes all.
/// Returns the removed paths.
pub fn sweep_locks(root: &Path, stale_after: Option<Duration>) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            if !path.to_string_lossy().ends_with(LOCK_SUFFIX) {
                continue;
            }
            let remove = match stale_after {
                Some(_) => lock_state(&path, stale_after)? == LockState::Stale,
                None => true,
            };
            if remove {
                remove_if_present(&path)?;
                removed.push(path);
            }
        }
    }

    removed.sort();
    Ok(removed)
}

/// In-process set of claimed download keys.
#[derive(Debug, Default)]
pub struct ClaimRegistry {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` if another thread holds it.
    pub fn try_claim(&self, key: &Path) -> Option<Claim<'_>> {
        let mut claimed = self.claimed.lock();
        if !claimed.insert(key.to_path_buf()) {
            return None;
        }
        Some(Claim { registry: self, key: key.to_path_buf() })
    }

    pub fn is_claimed(&self, key: &Path) -> bool {
        self.claimed.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.claimed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A held claim. Released when dropped.
#[derive(Debug)]
pub struct Claim<'a> {
    registry: &'a ClaimRegistry,
    key: PathBuf,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.registry.claimed.lock().remove(&self.key);
    }
}
