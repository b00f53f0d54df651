//! Mapping of virtual paths onto repositories, refs and git trees.

mod namespace;
mod node;
mod path;
mod resolver;

pub use namespace::{NameMatch, Namespace};
pub use node::{
    entry_file_type, Attr, DirEntry, Directory, FileType, Node, Resolved, DIR_PERM, DIR_SIZE,
    EXEC_PERM, FILE_PERM, SYMLINK_PERM,
};
pub use path::VirtualPath;
pub use resolver::{Resolver, READ_CHUNK};
