//! Read-only virtual filesystem over bare git repositories.
//!
//! The mount root lists the repositories a caller may read. Below each
//! repository are its branches and tags, and below each ref the tree of the
//! commit it points at:
//!
//! ```text
//! /<repository>/<ref>/<path in tree>
//! ```
//!
//! Repository and ref names containing `/` appear as nested directories.
//! [`engine::FsEngine`] serves the filesystem operations; a kernel adapter
//! translates inodes to [`tree::VirtualPath`]s and calls into it.

pub mod acl;
pub mod cache;
pub mod engine;
pub mod error;
pub mod live_state;
pub mod refresh;
pub mod repository;
pub mod tree;

pub use engine::{Caller, EngineConfig, FsEngine};
pub use error::{FsError, SourceError};
pub use refresh::{RefreshError, Sources};

/// Re-export of the object backend crate.
pub use object_store;

pub mod prelude {
    pub use crate::acl::{Access, AclBuilder, AclSource, PermissionTable, ALL_USERS};
    pub use crate::cache::{CacheStats, ObjectCacheConfig};
    pub use crate::engine::{Caller, EngineConfig, Entry, FileHandle, FsEngine, StatFs};
    pub use crate::error::{FsError, SourceError};
    pub use crate::refresh::{RefreshError, Sources};
    pub use crate::repository::{
        BackendFactory, GitBackendFactory, RepoStatus, Repository, RepositorySource,
        RepositorySpec,
    };
    pub use crate::tree::{Attr, DirEntry, FileType, VirtualPath};
}
