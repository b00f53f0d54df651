//! Bidirectional inode ↔ path mapping for the FUSE filesystem
//!
//! FUSE uses 64-bit inode numbers to identify files and directories. Paths
//! are stable across refreshes, so an inode keeps naming the same path even
//! when the object behind it changes.

use std::collections::HashMap;

use common::tree::VirtualPath;

#[derive(Debug)]
struct Slot {
    path: VirtualPath,
    /// Kernel lookup count; the slot is dropped when `forget` brings it to 0
    lookups: u64,
}

/// Bidirectional mapping between inodes and virtual paths
#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<VirtualPath, u64>,
    inodes: HashMap<u64, Slot>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    /// Create a new inode table with root pre-registered
    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inodes: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table
            .path_to_inode
            .insert(VirtualPath::root(), Self::ROOT_INODE);
        table.inodes.insert(
            Self::ROOT_INODE,
            Slot {
                path: VirtualPath::root(),
                lookups: 0,
            },
        );
        table
    }

    /// Inode for `path`, allocating one if needed. Does not count as a
    /// kernel lookup (used for `readdir` entries).
    pub fn get_or_create(&mut self, path: &VirtualPath) -> u64 {
        if let Some(&inode) = self.path_to_inode.get(path) {
            return inode;
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.clone(), inode);
        self.inodes.insert(
            inode,
            Slot {
                path: path.clone(),
                lookups: 0,
            },
        );
        inode
    }

    /// Inode for `path` after a successful kernel `lookup`, which the kernel
    /// will later balance with `forget`.
    pub fn lookup(&mut self, path: &VirtualPath) -> u64 {
        let inode = self.get_or_create(path);
        if let Some(slot) = self.inodes.get_mut(&inode) {
            slot.lookups += 1;
        }
        inode
    }

    /// Drop `count` kernel references. The root is never released.
    pub fn forget(&mut self, inode: u64, count: u64) {
        if inode == Self::ROOT_INODE {
            return;
        }
        let Some(slot) = self.inodes.get_mut(&inode) else {
            return;
        };
        slot.lookups = slot.lookups.saturating_sub(count);
        if slot.lookups == 0 {
            if let Some(slot) = self.inodes.remove(&inode) {
                self.path_to_inode.remove(&slot.path);
            }
        }
    }

    pub fn get_inode(&self, path: &VirtualPath) -> Option<u64> {
        self.path_to_inode.get(path).copied()
    }

    pub fn get_path(&self, inode: u64) -> Option<&VirtualPath> {
        self.inodes.get(&inode).map(|slot| &slot.path)
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}
