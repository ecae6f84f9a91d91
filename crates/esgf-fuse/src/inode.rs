//! Inode allocation for virtual paths.
//!
//! Inode numbers are stable hashes of the path, so the kernel sees the same
//! number for a path across forget/lookup cycles. The table is bounded and
//! evicts the least recently used entry; the root is never evicted.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::cache::EntryKind;
use crate::constants::MAX_INODE_CACHE;
use crate::constants::ROOT_INODE;

/// A known inode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeEntry {
    /// Virtual path without the leading slash; empty for the root.
    pub path: String,
    pub kind: EntryKind,
    /// Outstanding kernel lookups.
    pub lookups: u64,
    last_access: u64,
}

struct Table {
    by_inode: HashMap<u64, InodeEntry>,
    by_path: HashMap<String, u64>,
    clock: u64,
}

/// Path <-> inode table.
pub struct InodeManager {
    table: RwLock<Table>,
    capacity: usize,
}

impl InodeManager {
    pub fn new() -> Self {
        Self::with_capacity(MAX_INODE_CACHE)
    }

    /// Table holding at most `capacity` entries, root included.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut by_inode = HashMap::new();
        let mut by_path = HashMap::new();
        by_inode.insert(ROOT_INODE, InodeEntry {
            path: String::new(),
            kind: EntryKind::Directory,
            lookups: 1,
            last_access: 0,
        });
        by_path.insert(String::new(), ROOT_INODE);

        Self { table: RwLock::new(Table { by_inode, by_path, clock: 1 }), capacity: capacity.max(2) }
    }

    /// Record a kernel lookup of `path` and return its inode.
    pub fn lookup(&self, path: &str, kind: EntryKind) -> u64 {
        let mut guard = self.table.write();
        let table = &mut *guard;
        table.clock += 1;
        let now = table.clock;

        if let Some(&inode) = table.by_path.get(path)
            && let Some(entry) = table.by_inode.get_mut(&inode)
        {
            entry.kind = kind;
            entry.lookups += 1;
            entry.last_access = now;
            return inode;
        }

        if table.by_inode.len() >= self.capacity {
            evict_lru(table);
        }

        let inode = hash_path(path);
        table.by_inode.insert(inode, InodeEntry { path: path.to_string(), kind, lookups: 1, last_access: now });
        table.by_path.insert(path.to_string(), inode);
        inode
    }

    pub fn get(&self, inode: u64) -> Option<InodeEntry> {
        self.table.read().by_inode.get(&inode).cloned()
    }

    pub fn inode_of(&self, path: &str) -> Option<u64> {
        self.table.read().by_path.get(path).copied()
    }

    /// Drop `count` kernel lookups; the entry goes away at zero.
    pub fn forget(&self, inode: u64, count: u64) {
        if inode == ROOT_INODE {
            return;
        }
        let mut guard = self.table.write();
        let table = &mut *guard;
        let Some(entry) = table.by_inode.get_mut(&inode) else {
            return;
        };
        entry.lookups = entry.lookups.saturating_sub(count);
        if entry.lookups == 0
            && let Some(entry) = table.by_inode.remove(&inode)
        {
            table.by_path.remove(&entry.path);
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeManager {
    fn default() -> Self {
        Self::new()
    }
}

/// First 8 bytes of the blake3 hash of the path, avoiding 0 and the root.
fn hash_path(path: &str) -> u64 {
    let hash = blake3::hash(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    let inode = u64::from_le_bytes(bytes);
    if inode <= ROOT_INODE { inode + 2 } else { inode }
}

fn evict_lru(table: &mut Table) {
    let oldest = table
        .by_inode
        .iter()
        .filter(|&(&inode, _)| inode != ROOT_INODE)
        .min_by_key(|(_, entry)| entry.last_access)
        .map(|(&inode, _)| inode);

    if let Some(inode) = oldest
        && let Some(entry) = table.by_inode.remove(&inode)
    {
        table.by_path.remove(&entry.path);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn root_is_preallocated() {
        let mgr = InodeManager::new();
        let root = mgr.get(ROOT_INODE).unwrap();
        assert_eq!(root.path, "");
        assert_eq!(root.kind, EntryKind::Directory);
        assert_eq!(mgr.inode_of(""), Some(ROOT_INODE));
    }

    #[test]
    fn same_path_same_inode() {
        let mgr = InodeManager::new();
        let a = mgr.lookup("CMIP5/output", EntryKind::Directory);
        let b = mgr.lookup("CMIP5/output", EntryKind::Directory);
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INODE);
        assert_eq!(mgr.get(a).unwrap().lookups, 2);
        assert_ne!(a, mgr.lookup("CMIP5/output1", EntryKind::Directory));
    }

    #[test]
    fn inode_is_stable_across_forget() {
        let mgr = InodeManager::new();
        let first = mgr.lookup("CMIP5/tas.nc", EntryKind::File);
        mgr.forget(first, 1);
        assert!(mgr.get(first).is_none());
        assert_eq!(mgr.lookup("CMIP5/tas.nc", EntryKind::File), first);
    }

    #[test]
    fn forget_waits_for_all_lookups() {
        let mgr = InodeManager::new();
        let inode = mgr.lookup("CMIP5", EntryKind::Directory);
        mgr.lookup("CMIP5", EntryKind::Directory);
        mgr.forget(inode, 1);
        assert!(mgr.get(inode).is_some());
        mgr.forget(inode, 1);
        assert!(mgr.get(inode).is_none());
        assert!(mgr.inode_of("CMIP5").is_none());
    }

    #[test]
    fn root_is_never_forgotten_or_evicted() {
        let mgr = InodeManager::with_capacity(8);
        mgr.forget(ROOT_INODE, 100);
        for i in 0..32 {
            mgr.lookup(&format!("CMIP5/{i}"), EntryKind::Directory);
        }
        assert!(mgr.get(ROOT_INODE).is_some());
        assert_eq!(mgr.len(), 8);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mgr = InodeManager::with_capacity(3);
        let old = mgr.lookup("a", EntryKind::Directory);
        let recent = mgr.lookup("b", EntryKind::Directory);
        mgr.lookup("b", EntryKind::Directory);
        mgr.lookup("c", EntryKind::Directory);

        assert!(mgr.get(old).is_none());
        assert!(mgr.get(recent).is_some());
    }

    #[test]
    fn concurrent_lookups() {
        let mgr = Arc::new(InodeManager::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let mgr = mgr.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        mgr.lookup(&format!("t{t}/p{i}"), EntryKind::File);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mgr.len(), 801);
    }

    #[test]
    fn hash_avoids_reserved_inodes() {
        for i in 0..1000 {
            assert!(hash_path(&format!("p/{i}")) > ROOT_INODE);
        }
    }
}
