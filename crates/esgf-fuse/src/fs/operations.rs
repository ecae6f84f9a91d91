//! `FileSystem` trait implementation for `EsgfFs`.
//!
//! Only the calls needed to look up, stat and read files are implemented;
//! everything else keeps the trait default (`ENOSYS`).

use std::ffi::CStr;
use std::io;
use std::time::Duration;

use fuse_backend_rs::abi::fuse_abi::stat64;
use fuse_backend_rs::api::filesystem::Context;
use fuse_backend_rs::api::filesystem::Entry;
use fuse_backend_rs::api::filesystem::FileSystem;
use fuse_backend_rs::api::filesystem::FsOptions;
use fuse_backend_rs::api::filesystem::OpenOptions;
use fuse_backend_rs::api::filesystem::ZeroCopyWriter;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::EsgfFs;
use super::child_path;
use super::virtual_path;
use crate::cache::EntryKind;
use crate::cache::EntryMetadata;
use crate::cache::OpenOutcome;
use crate::cache::ReadOutcome;
use crate::constants::ATTR_TTL;
use crate::constants::ROOT_INODE;

impl FileSystem for EsgfFs {
    type Inode = u64;
    type Handle = u64;

    fn init(&self, _capable: FsOptions) -> io::Result<FsOptions> {
        info!(root = %self.cache().layout().root().display(), "filesystem initialized");
        Ok(FsOptions::empty())
    }

    fn lookup(&self, _ctx: &Context, parent: u64, name: &CStr) -> io::Result<Entry> {
        let name = name.to_str().map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        if name == "." || name == ".." {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let parent = self.entry(parent)?;
        if parent.kind != EntryKind::Directory {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
        }

        let path = child_path(&parent.path, name);
        let metadata = self.cache().metadata(&virtual_path(&path));
        let inode = self.inodes.lookup(&path, metadata.kind);
        debug!(path, inode, kind = ?metadata.kind, size = metadata.size, "lookup");

        Ok(self.make_entry(inode, metadata))
    }

    fn forget(&self, _ctx: &Context, inode: u64, count: u64) {
        self.inodes.forget(inode, count);
    }

    fn getattr(&self, _ctx: &Context, inode: u64, _handle: Option<u64>) -> io::Result<(stat64, Duration)> {
        if inode == ROOT_INODE {
            return Ok((self.make_attr(ROOT_INODE, EntryMetadata { kind: EntryKind::Directory, size: 0 }), ATTR_TTL));
        }

        let entry = self.entry(inode)?;
        let metadata = self.cache().metadata(&virtual_path(&entry.path));
        Ok((self.make_attr(inode, metadata), ATTR_TTL))
    }

    fn open(
        &self,
        _ctx: &Context,
        inode: u64,
        flags: u32,
        _fuse_flags: u32,
    ) -> io::Result<(Option<u64>, OpenOptions, Option<u32>)> {
        let entry = self.entry(inode)?;
        if entry.kind == EntryKind::Directory {
            return Err(io::Error::from_raw_os_error(libc::EISDIR));
        }
        if flags & libc::O_ACCMODE as u32 != libc::O_RDONLY as u32 {
            return Err(io::Error::from_raw_os_error(libc::EROFS));
        }

        let path = virtual_path(&entry.path);
        match self.cache().open(&path) {
            Ok(OpenOutcome::Ready) => debug!(path, "open: data ready"),
            Ok(OpenOutcome::Pending) => debug!(path, "open: download pending"),
            Err(e) => {
                warn!(path, error = %e, "open failed");
                return Err(e.into());
            }
        }

        Ok((None, OpenOptions::empty(), None))
    }

    fn read(
        &self,
        _ctx: &Context,
        inode: u64,
        _handle: u64,
        w: &mut dyn ZeroCopyWriter,
        size: u32,
        offset: u64,
        _lock_owner: Option<u64>,
        _flags: u32,
    ) -> io::Result<usize> {
        let entry = self.entry(inode)?;
        let path = virtual_path(&entry.path);

        match self.cache().read(&path, size as usize, offset) {
            Ok(ReadOutcome::Data(data)) => {
                w.write_all(&data)?;
                Ok(data.len())
            }
            Ok(ReadOutcome::Pending) => {
                debug!(path, offset, "read: download pending");
                Err(io::Error::from_raw_os_error(libc::EAGAIN))
            }
            Err(e) => {
                warn!(path, error = %e, "read failed");
                Err(e.into())
            }
        }
    }

    fn release(
        &self,
        _ctx: &Context,
        _inode: u64,
        _flags: u32,
        _handle: u64,
        _flush: bool,
        _flock_release: bool,
        _lock_owner: Option<u64>,
    ) -> io::Result<()> {
        Ok(())
    }
}
