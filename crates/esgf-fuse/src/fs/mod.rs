//! FUSE binding of the lazy cache.
//!
//! Maps FUSE inodes to virtual paths and forwards lookups, attribute
//! queries, opens and reads to [`LazyCache`]. The tree is never listed;
//! entries come into existence by being looked up.

mod operations;

use std::io;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use fuse_backend_rs::abi::fuse_abi::stat64;
use fuse_backend_rs::api::filesystem::Entry;

use crate::cache::EntryKind;
use crate::cache::EntryMetadata;
use crate::cache::LazyCache;
use crate::constants::ATTR_TTL;
use crate::constants::BLOCK_SIZE;
use crate::constants::DIR_MODE;
use crate::constants::ENTRY_TTL;
use crate::constants::FILE_MODE;
use crate::inode::InodeEntry;
use crate::inode::InodeManager;

/// Read-only ESGF filesystem.
pub struct EsgfFs {
    inodes: InodeManager,
    cache: Arc<LazyCache>,
    uid: u32,
    gid: u32,
}

impl EsgfFs {
    pub fn new(cache: Arc<LazyCache>, uid: u32, gid: u32) -> Self {
        Self { inodes: InodeManager::new(), cache, uid, gid }
    }

    pub fn cache(&self) -> &LazyCache {
        &self.cache
    }

    fn entry(&self, inode: u64) -> io::Result<InodeEntry> {
        self.inodes.get(inode).ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    /// Build a stat64 for an entry. Timestamps are always the current time.
    fn make_attr(&self, inode: u64, metadata: EntryMetadata) -> stat64 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let sec = now.as_secs() as i64;
        let nsec = now.subsec_nanos() as i64;

        let (mode, nlink) = match metadata.kind {
            EntryKind::File => (FILE_MODE, 1),
            EntryKind::Directory => (DIR_MODE, 2),
        };

        // SAFETY: stat64 is a C struct of plain integers; all-zero is a valid value.
        let mut attr: stat64 = unsafe { std::mem::zeroed() };
        attr.st_ino = inode;
        attr.st_mode = mode;
        attr.st_nlink = nlink;
        attr.st_uid = self.uid;
        attr.st_gid = self.gid;
        attr.st_size = metadata.size as i64;
        attr.st_blocks = metadata.size.div_ceil(512) as i64;
        attr.st_blksize = i64::from(BLOCK_SIZE);
        attr.st_atime = sec;
        attr.st_atime_nsec = nsec;
        attr.st_mtime = sec;
        attr.st_mtime_nsec = nsec;
        attr.st_ctime = sec;
        attr.st_ctime_nsec = nsec;
        attr
    }

    fn make_entry(&self, inode: u64, metadata: EntryMetadata) -> Entry {
        Entry {
            inode,
            generation: 0,
            attr: self.make_attr(inode, metadata),
            attr_flags: 0,
            attr_timeout: ATTR_TTL,
            entry_timeout: ENTRY_TTL,
        }
    }
}

/// Absolute virtual path of an inode path.
fn virtual_path(path: &str) -> String {
    format!("/{path}")
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() { name.to_string() } else { format!("{parent}/{name}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths() {
        assert_eq!(child_path("", "CMIP5"), "CMIP5");
        assert_eq!(child_path("CMIP5", "output"), "CMIP5/output");
        assert_eq!(virtual_path("CMIP5/output"), "/CMIP5/output");
        assert_eq!(virtual_path(""), "/");
    }
}
