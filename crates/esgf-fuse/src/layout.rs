//! On-disk layout of the cache root.
//!
//! ```text
//! <root>/ESGF_CACHE/<virtual path>        downloaded data
//! <root>/ESGF_CACHE/<virtual path>.lock   download in progress
//! <root>/ESGF_LOG/wget_raw.log            raw download tool output
//! <root>/ESGF_LOG/download_error.log      failure notes
//! ```

use std::ffi::OsString;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

use crate::constants::CACHE_DIR_MODE;
use crate::constants::CACHE_DIR_NAME;
use crate::constants::ERROR_LOG_NAME;
use crate::constants::LOCK_SUFFIX;
use crate::constants::LOG_DIR_NAME;
use crate::constants::LOG_FILE_MODE;
use crate::constants::RAW_LOG_NAME;
use crate::path::VirtualPath;

/// Paths derived from the cache root.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    /// Group owning the diagnostic logs and cache directories.
    group: Option<u32>,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>, group: Option<u32>) -> Self {
        Self { root: root.into(), group }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR_NAME)
    }

    pub fn raw_log(&self) -> PathBuf {
        self.log_dir().join(RAW_LOG_NAME)
    }

    pub fn error_log(&self) -> PathBuf {
        self.log_dir().join(ERROR_LOG_NAME)
    }

    /// Location of the cached data for `path`.
    pub fn data_path(&self, path: &VirtualPath) -> PathBuf {
        self.cache_dir().join(path.relative())
    }

    /// Location of the in-progress marker for `path`.
    pub fn lock_path(&self, path: &VirtualPath) -> PathBuf {
        lock_path_for(&self.data_path(path))
    }

    /// Create the cache and log directories and the two log files.
    ///
    /// Log files are made group read/write and, when a group is configured,
    /// handed to that group.
    pub fn prepare(&self) -> io::Result<()> {
        self.create_dirs(&self.cache_dir())?;
        self.create_dirs(&self.log_dir())?;

        for log in [self.raw_log(), self.error_log()] {
            OpenOptions::new().create(true).append(true).mode(LOG_FILE_MODE).open(&log)?;
            fs::set_permissions(&log, fs::Permissions::from_mode(LOG_FILE_MODE))?;
            self.assign_group(&log);
        }

        debug!(root = %self.root.display(), "cache layout prepared");
        Ok(())
    }

    /// Ensure the cache directory for `path` exists.
    ///
    /// Safe to call concurrently for the same path.
    pub fn ensure_parent(&self, path: &VirtualPath) -> io::Result<PathBuf> {
        let dir = self.cache_dir().join(path.directory());
        self.create_dirs(&dir)?;
        Ok(dir)
    }

    fn create_dirs(&self, dir: &Path) -> io::Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        match fs::DirBuilder::new().recursive(true).mode(CACHE_DIR_MODE).create(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        self.assign_group(dir);
        Ok(())
    }

    fn assign_group(&self, path: &Path) {
        let Some(gid) = self.group else {
            return;
        };
        if let Err(e) = std::os::unix::fs::chown(path, None, Some(gid)) {
            warn!(path = %path.display(), gid, error = %e, "failed to assign group");
        }
    }
}

/// Lock path for a data file: the data path with `.lock` appended.
pub fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut name: OsString = data_path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}
