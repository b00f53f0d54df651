//! Git object backends for gbfs.
//!
//! This crate resolves references, tree listings and blob content out of bare
//! git repositories. Every backend implements the same [`ObjectBackend`]
//! contract so the filesystem engine never needs to know which one it talks
//! to.
//!
//! # Backends
//!
//! - [`NativeBackend`]: decodes loose and packed objects in-process (libgit2)
//! - [`GitCliBackend`]: shells out to the `git` toolchain with a bounded wait
//! - [`MemoryBackend`]: an in-memory object graph for tests and demos
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use object_store::{open_backend, BackendKind, BackendOptions};
//!
//! # async fn example() -> Result<(), object_store::BackendError> {
//! let backend = open_backend(
//!     BackendKind::Native,
//!     Path::new("/srv/git/demo.git"),
//!     &BackendOptions::default(),
//! )?;
//! let head = backend.resolve_ref("refs/heads/main").await?;
//! for entry in backend.get_tree(&head.tree).await? {
//!     println!("{} {}", entry.mode_string(), entry.name);
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
mod git_cli;
mod memory;
mod native;
pub mod process;
mod types;

pub use backend::{
    open_backend, slice_range, BackendKind, BackendOptions, ObjectBackend,
    DEFAULT_COMMAND_TIMEOUT,
};
pub use error::{BackendError, Result};
pub use git_cli::GitCliBackend;
pub use memory::{MemoryBackend, MemoryFile};
pub use native::NativeBackend;
pub use types::{parse_tree, Blob, CommitInfo, EntryKind, ObjectId, Reference, TreeEntry};
