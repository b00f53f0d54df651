//! FUSE filesystem integration
//!
//! Mounts the engine as a read-only filesystem.
//!
//! # Architecture
//!
//! - `GitFs`: FUSE filesystem implementation using fuser
//! - `InodeTable`: Bidirectional inode ↔ virtual path mapping
//! - `Identities`: uid → user name lookups for visibility checks
//!
//! Content caching lives in the engine, so a refresh is picked up by the
//! next kernel request once the attribute TTL lapses.

mod git_fs;
mod identity;
mod inode_table;

use std::path::Path;

use fuser::MountOption;

pub use git_fs::{errno, file_attr, GitFs, Owner, DEFAULT_TTL};
pub use identity::{user_name, Identities};
pub use inode_table::InodeTable;

pub const FS_NAME: &str = "gbfs";

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Let other users reach the mount (needs `user_allow_other`)
    pub allow_other: bool,
}

impl MountOptions {
    pub fn to_fuser(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::RO,
            MountOption::FSName(FS_NAME.to_string()),
            MountOption::Subtype(FS_NAME.to_string()),
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

/// Mount `fs` at `mountpoint` on a background session thread. The
/// filesystem is unmounted when the returned session is dropped.
pub fn spawn_mount(
    fs: GitFs,
    mountpoint: &Path,
    options: &MountOptions,
) -> std::io::Result<fuser::BackgroundSession> {
    tracing::info!(mountpoint = %mountpoint.display(), allow_other = options.allow_other, "mounting");
    fuser::spawn_mount2(fs, mountpoint, &options.to_fuser())
}
