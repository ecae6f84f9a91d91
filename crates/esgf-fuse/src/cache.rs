//! Path-level semantics of the lazy-download cache.
//!
//! Per data file the cache is in one of three states: absent, locked
//! (download in progress) or present. `open` moves an absent file through
//! locked to present; a failed download moves it back to absent. A crashed
//! process leaves a lock behind, which is reclaimed once stale.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::time::Duration;

use snafu::ResultExt;
use snafu::Snafu;
use tracing::debug;
use tracing::warn;

use crate::dispatcher::DispatchOutcome;
use crate::dispatcher::Dispatcher;
use crate::layout::CacheLayout;
use crate::lock::LockState;
use crate::lock::lock_state;
use crate::path::VirtualPath;
use crate::path::is_data_file;
use crate::resolver::ResolveError;
use crate::resolver::Resolver;
use crate::resolver::UnsupportedPathSnafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CacheError {
    #[snafu(display("{source}"))]
    Resolve { source: ResolveError },

    #[snafu(display("cache I/O on '{}' failed: {source}", path.display()))]
    Io { path: PathBuf, source: io::Error },
}

impl CacheError {
    /// errno the filesystem reports for this error.
    pub fn errno(&self) -> i32 {
        match self {
            CacheError::Resolve { source } => source.errno(),
            CacheError::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<CacheError> for io::Error {
    fn from(err: CacheError) -> Self {
        io::Error::from_raw_os_error(err.errno())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// What the filesystem reports for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub size: u64,
}

impl EntryMetadata {
    fn directory() -> Self {
        Self { kind: EntryKind::Directory, size: 0 }
    }

    fn file(size: u64) -> Self {
        Self { kind: EntryKind::File, size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The data file is present.
    Ready,
    /// A download is in progress or failed; retry later.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes read; shorter than requested at end of file.
    Data(Vec<u8>),
    Pending,
}

/// Resolver and dispatcher behind the filesystem calls.
pub struct LazyCache {
    resolver: Resolver,
    dispatcher: Dispatcher,
    open_throttle: Duration,
}

impl LazyCache {
    pub fn new(resolver: Resolver, dispatcher: Dispatcher, open_throttle: Duration) -> Self {
        Self { resolver, dispatcher, open_throttle }
    }

    pub fn layout(&self) -> &CacheLayout {
        self.dispatcher.layout()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Metadata for a path.
    ///
    /// Anything without the data file extension is a directory. Data files
    /// are resolved for their size; a file that cannot be resolved is
    /// reported as a directory.
    pub fn metadata(&self, path: &str) -> EntryMetadata {
        if !is_data_file(path) {
            return EntryMetadata::directory();
        }

        match self.resolver.resolve_str(path) {
            Ok(location) => EntryMetadata::file(location.size),
            Err(e) => {
                warn!(path, error = %e, "no size for data file, reporting a directory");
                EntryMetadata::directory()
            }
        }
    }

    /// Make the data for `path` available, downloading it if needed.
    pub fn open(&self, path: &str) -> Result<OpenOutcome, CacheError> {
        std::thread::sleep(self.open_throttle);

        let vpath = parse(path)?;
        let location = self.resolver.resolve(&vpath).context(ResolveSnafu)?;

        let layout = self.layout();
        let dir = layout.ensure_parent(&vpath).context(IoSnafu { path: layout.cache_dir() })?;
        debug!(path, dir = %dir.display(), "cache directory ready");

        let lock_path = layout.lock_path(&vpath);
        let state = lock_state(&lock_path, self.dispatcher.stale_after()).context(IoSnafu { path: lock_path })?;
        if state == LockState::Active {
            debug!(path, "download in progress");
            return Ok(OpenOutcome::Pending);
        }

        let data_path = layout.data_path(&vpath);
        if state == LockState::Absent && data_path.is_file() {
            return Ok(OpenOutcome::Ready);
        }

        match self.dispatcher.dispatch(&vpath, &location.url) {
            DispatchOutcome::Downloaded { bytes } if bytes != location.size => {
                warn!(path, bytes, expected = location.size, "downloaded size differs from catalogue size");
            }
            DispatchOutcome::Failed { reason } => warn!(path, %reason, "download failed"),
            DispatchOutcome::Downloaded { .. } | DispatchOutcome::LockHeld => {}
        }

        Ok(if data_path.is_file() && !layout.lock_path(&vpath).exists() {
            OpenOutcome::Ready
        } else {
            OpenOutcome::Pending
        })
    }

    /// Read up to `length` bytes at `offset`.
    ///
    /// While a download is in progress, or when the data is missing, the
    /// download is (re)started through `open` and `Pending` is returned.
    pub fn read(&self, path: &str, length: usize, offset: u64) -> Result<ReadOutcome, CacheError> {
        let vpath = parse(path)?;
        let layout = self.layout();

        let lock_path = layout.lock_path(&vpath);
        let state = lock_state(&lock_path, self.dispatcher.stale_after()).context(IoSnafu { path: lock_path })?;
        if state != LockState::Absent {
            self.open(path)?;
            return Ok(ReadOutcome::Pending);
        }

        let data_path = layout.data_path(&vpath);
        let file = match File::open(&data_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.open(path)?;
                return Ok(ReadOutcome::Pending);
            }
            Err(e) => return Err(e).context(IoSnafu { path: data_path }),
        };

        read_at(&file, length, offset).map(ReadOutcome::Data).context(IoSnafu { path: data_path })
    }
}

fn parse(path: &str) -> Result<VirtualPath, CacheError> {
    VirtualPath::parse(path).context(UnsupportedPathSnafu).context(ResolveSnafu)
}

/// Read up to `length` bytes at `offset`, stopping early only at end of file.
fn read_at(file: &File, length: usize, offset: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}
