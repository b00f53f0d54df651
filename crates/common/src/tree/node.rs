use std::sync::Arc;
use std::time::{Duration, SystemTime};

use object_store::{CommitInfo, EntryKind, ObjectId, TreeEntry};

use crate::repository::Repository;

/// Size reported for every directory.
pub const DIR_SIZE: u64 = 4096;

pub const DIR_PERM: u16 = 0o775;
pub const FILE_PERM: u16 = 0o664;
pub const EXEC_PERM: u16 = 0o775;
pub const SYMLINK_PERM: u16 = 0o777;

/// What a resolved path is, with only the fields valid for that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(Directory),
    File {
        id: ObjectId,
        size: u64,
        executable: bool,
    },
    Symlink {
        id: ObjectId,
        size: u64,
    },
    /// A gitlink; shown as an empty directory since the commit it names
    /// lives in another repository.
    Submodule {
        commit: ObjectId,
    },
}

/// Where a directory comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directory {
    /// The mount root, listing visible repositories.
    Root,
    /// A prefix shared by several repository names.
    RepositoryGroup { prefix: Vec<String> },
    /// A repository root, listing its refs.
    Repository,
    /// A prefix shared by several ref names.
    RefGroup { prefix: Vec<String> },
    /// A tree object inside a ref.
    Tree(ObjectId),
}

/// File kind as reported to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Directory,
    RegularFile,
    Symlink,
}

impl Node {
    pub fn file_type(&self) -> FileType {
        match self {
            Node::Directory(_) | Node::Submodule { .. } => FileType::Directory,
            Node::File { .. } => FileType::RegularFile,
            Node::Symlink { .. } => FileType::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn size(&self) -> u64 {
        match self {
            Node::Directory(_) | Node::Submodule { .. } => DIR_SIZE,
            Node::File { size, .. } | Node::Symlink { size, .. } => *size,
        }
    }

    pub fn perm(&self) -> u16 {
        match self {
            Node::Directory(_) | Node::Submodule { .. } => DIR_PERM,
            Node::File {
                executable: true, ..
            } => EXEC_PERM,
            Node::File { .. } => FILE_PERM,
            Node::Symlink { .. } => SYMLINK_PERM,
        }
    }
}

/// Type of a tree entry without reading the object it names.
pub fn entry_file_type(entry: &TreeEntry) -> FileType {
    match entry.kind {
        EntryKind::Tree | EntryKind::Submodule => FileType::Directory,
        EntryKind::Blob { .. } => FileType::RegularFile,
        EntryKind::Symlink => FileType::Symlink,
    }
}

/// Attributes of a resolved path. Ownership is filled in by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub file_type: FileType,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub mtime: SystemTime,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

/// A path resolved against one Live State generation.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub node: Node,
    /// The repository the path lies in, if below the repository level.
    pub repository: Option<Arc<Repository>>,
    /// The ref commit, if the path lies inside a ref.
    pub commit: Option<CommitInfo>,
    /// Commit time inside a ref, build time of the Live State elsewhere.
    pub(crate) mtime: SystemTime,
    pub generation: u64,
}

impl Resolved {
    pub fn attr(&self) -> Attr {
        Attr {
            file_type: self.node.file_type(),
            size: self.node.size(),
            perm: self.node.perm(),
            nlink: if self.node.is_dir() { 2 } else { 1 },
            mtime: self.mtime,
        }
    }
}

/// Seconds since the epoch as a `SystemTime`, clamping negative times.
pub(crate) fn commit_time(commit: &CommitInfo) -> SystemTime {
    let secs = u64::try_from(commit.commit_time).unwrap_or(0);
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}
