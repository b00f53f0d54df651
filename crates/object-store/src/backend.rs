use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, Result};
use crate::git_cli::GitCliBackend;
use crate::native::NativeBackend;
use crate::types::{Blob, CommitInfo, ObjectId, Reference, TreeEntry};

/// Default bounded wait for one git subprocess.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Read access to the object graph of one bare repository.
///
/// All implementations must agree on results for the same repository state:
/// tree listings come back in tree-object order and blob content is exactly
/// the declared length.
#[async_trait]
pub trait ObjectBackend: Send + Sync + fmt::Debug {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// List every ref under `refs/heads/` and `refs/tags/`.
    async fn list_refs(&self) -> Result<Vec<Reference>>;

    /// Resolve a full ref name to the commit it (eventually) points at.
    ///
    /// Returns `BackendError::NotFound` if the ref is absent or does not peel
    /// to a commit.
    async fn resolve_ref(&self, name: &str) -> Result<CommitInfo>;

    /// Resolve many refs at once. Per-ref failures are reported in place;
    /// the outer error is reserved for the backend being unusable.
    async fn resolve_refs(&self, names: &[String]) -> Result<Vec<Result<CommitInfo>>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match self.resolve_ref(name).await {
                Err(BackendError::Unavailable(msg)) => return Err(BackendError::Unavailable(msg)),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    /// Read a tree object.
    async fn get_tree(&self, id: &ObjectId) -> Result<Vec<TreeEntry>>;

    /// Read a blob object.
    async fn get_blob(&self, id: &ObjectId) -> Result<Blob>;

    /// Size of a blob without decoding its content.
    async fn blob_size(&self, id: &ObjectId) -> Result<u64>;

    /// Up to `len` bytes of a blob starting at `offset`.
    ///
    /// Returns fewer than `len` bytes only at the end of the blob and an
    /// empty buffer past it. Content that ends before its declared length is
    /// `Truncated`. The default reads the whole blob; backends that can
    /// stream override it.
    async fn read_blob(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        let data = self.get_blob(id).await?.verified()?;
        Ok(slice_range(&data, offset, len))
    }
}

/// The part of `data` covered by `offset..offset + len`, clamped to its end.
pub fn slice_range(data: &Bytes, offset: u64, len: u64) -> Bytes {
    let total = data.len() as u64;
    let start = offset.min(total);
    let end = offset.saturating_add(len).min(total);
    data.slice(start as usize..end as usize)
}

/// Backend choice for a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// In-process object reader
    #[default]
    Native,
    /// External `git` toolchain
    GitCli,
    /// In-memory object graph
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::GitCli => write!(f, "git-cli"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "native" => Ok(BackendKind::Native),
            "git-cli" | "git" => Ok(BackendKind::GitCli),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// Settings shared by the on-disk backends.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// `git` executable used by the command line backend
    pub git_binary: PathBuf,
    /// Bounded wait for one git subprocess
    pub command_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            git_binary: PathBuf::from("git"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Construct the backend for a bare repository at `path`.
///
/// Opening is lazy: a missing or corrupt repository surfaces as
/// `BackendError::Unavailable` on first use, not here.
pub fn open_backend(
    kind: BackendKind,
    path: &Path,
    options: &BackendOptions,
) -> Result<Arc<dyn ObjectBackend>> {
    match kind {
        BackendKind::Native => Ok(Arc::new(NativeBackend::new(path))),
        BackendKind::GitCli => Ok(Arc::new(GitCliBackend::new(path, options.clone()))),
        BackendKind::Memory => Err(BackendError::unavailable(format!(
            "memory backend cannot be opened from {}",
            path.display()
        ))),
    }
}
