//! The filesystem operations served to the kernel adapter.
//!
//! Every operation takes one snapshot of the Live State up front and works
//! against it until it returns, so a refresh that lands mid-operation is
//! never observed halfway.

mod handles;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, ObjectCache, ObjectCacheConfig};
use crate::error::{FsError, Result};
use crate::live_state::LiveState;
use crate::refresh::{RefreshCoordinator, RefreshError, Sources};
use crate::tree::{Attr, DirEntry, Node, Resolved, Resolver, VirtualPath, READ_CHUNK};

pub use handles::{FileHandle, HandleTable, OpenFile};

pub const DEFAULT_MAX_OPEN_FILES: usize = 1024;

/// Identity an operation is performed as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
    user: String,
}

impl Caller {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: ObjectCacheConfig,
    pub max_open_files: usize,
    /// Show tags next to branches at the ref level
    pub expose_tags: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: ObjectCacheConfig::default(),
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            expose_tags: true,
        }
    }
}

/// A looked-up path and its attributes.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: VirtualPath,
    pub attr: Attr,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub files: u64,
    pub block_size: u32,
    pub name_len: u32,
}

#[derive(Debug, Clone)]
pub struct FsEngine {
    coordinator: RefreshCoordinator,
    cache: ObjectCache,
    handles: Arc<HandleTable>,
}

impl FsEngine {
    pub fn new(sources: Sources, config: EngineConfig) -> Self {
        let cache = ObjectCache::new(config.cache);
        let coordinator = RefreshCoordinator::new(sources, cache.clone(), config.expose_tags);
        Self {
            coordinator,
            cache,
            handles: Arc::new(HandleTable::new(config.max_open_files)),
        }
    }

    pub fn snapshot(&self) -> Arc<LiveState> {
        self.coordinator.snapshot()
    }

    pub fn generation(&self) -> u64 {
        self.coordinator.generation()
    }

    /// Rebuild the Live State from the configured sources.
    pub async fn refresh(&self) -> std::result::Result<u64, RefreshError> {
        self.coordinator.refresh().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn open_files(&self) -> usize {
        self.handles.len()
    }

    pub async fn resolve(&self, caller: &Caller, path: &VirtualPath) -> Result<Resolved> {
        let snapshot = self.snapshot();
        let result = Resolver::new(&snapshot, &self.cache, caller.user())
            .resolve(path)
            .await;
        log_failure("resolve", caller, path, &result);
        result
    }

    /// Resolve `name` inside `parent`.
    pub async fn lookup(&self, caller: &Caller, parent: &VirtualPath, name: &str) -> Result<Entry> {
        let path = parent.join(name)?;
        let resolved = self.resolve(caller, &path).await?;
        Ok(Entry {
            attr: resolved.attr(),
            generation: resolved.generation,
            path,
        })
    }

    pub async fn getattr(&self, caller: &Caller, path: &VirtualPath) -> Result<Attr> {
        Ok(self.resolve(caller, path).await?.attr())
    }

    pub async fn readdir(&self, caller: &Caller, path: &VirtualPath) -> Result<Vec<DirEntry>> {
        let snapshot = self.snapshot();
        let resolver = Resolver::new(&snapshot, &self.cache, caller.user());
        let result = match resolver.resolve(path).await {
            Ok(resolved) => resolver.list(&resolved).await,
            Err(e) => Err(e),
        };
        log_failure("readdir", caller, path, &result);
        result
    }

    /// Open a file for reading. Content is not read until [`FsEngine::read`].
    pub async fn open(&self, caller: &Caller, path: &VirtualPath, write: bool) -> Result<FileHandle> {
        let snapshot = self.snapshot();
        let result = Resolver::new(&snapshot, &self.cache, caller.user())
            .resolve(path)
            .await
            .and_then(|resolved| {
                let (id, size) = match resolved.node {
                    Node::File { id, size, .. } | Node::Symlink { id, size } => (id, size),
                    Node::Directory(_) | Node::Submodule { .. } => {
                        return Err(FsError::IsADirectory)
                    }
                };
                if write {
                    return Err(FsError::PermissionDenied);
                }
                let repository = resolved
                    .repository
                    .ok_or_else(|| FsError::Corrupt("file without repository".to_string()))?;
                self.handles.insert(OpenFile::new(
                    snapshot.clone(),
                    repository,
                    id,
                    size,
                    caller.user(),
                ))
            });
        log_failure("open", caller, path, &result);
        if let Ok(fh) = &result {
            tracing::debug!(fh, path = %path, user = caller.user(), "opened");
        }
        result
    }

    /// Read up to `size` bytes at `offset`. Short at end of file.
    ///
    /// Content is fetched in [`READ_CHUNK`] ranges covering only the
    /// requested bytes, so reading a file sequentially fetches each range
    /// once.
    pub async fn read(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Bytes> {
        let file = self.handles.get(fh)?;
        if offset >= file.size || size == 0 {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(u64::from(size)).min(file.size);

        let resolver = Resolver::new(&file.snapshot, &self.cache, &file.user);
        let first = offset / READ_CHUNK;
        let last = (end - 1) / READ_CHUNK;
        let mut out = BytesMut::new();
        for index in first..=last {
            let chunk = match file.chunk(index) {
                Some(chunk) => chunk,
                None => {
                    let chunk = resolver
                        .blob_chunk(&file.repository, file.id, file.size, index)
                        .await?;
                    file.keep_chunk(index, chunk.clone());
                    chunk
                }
            };

            let base = index * READ_CHUNK;
            let from = (offset.max(base) - base) as usize;
            let to = ((end.min(base + chunk.len() as u64) - base) as usize).max(from);
            if first == last {
                return Ok(chunk.slice(from..to));
            }
            out.extend_from_slice(&chunk[from..to]);
        }
        Ok(out.freeze())
    }

    /// Close a file handle. Unknown handles are ignored.
    pub fn release(&self, fh: FileHandle) {
        if !self.handles.remove(fh) {
            tracing::debug!(fh, "release of unknown handle");
        }
    }

    /// Target of a symbolic link.
    pub async fn readlink(&self, caller: &Caller, path: &VirtualPath) -> Result<Bytes> {
        let snapshot = self.snapshot();
        let resolver = Resolver::new(&snapshot, &self.cache, caller.user());
        let result = match resolver.resolve(path).await {
            Ok(Resolved {
                node: Node::Symlink { id, .. },
                repository: Some(repository),
                ..
            }) => resolver.blob(&repository, id).await,
            Ok(_) => Err(FsError::NotASymlink),
            Err(e) => Err(e),
        };
        log_failure("readlink", caller, path, &result);
        result
    }

    pub fn statfs(&self, caller: &Caller) -> StatFs {
        let snapshot = self.snapshot();
        StatFs {
            blocks: 0,
            files: snapshot.visible_names(caller.user()).count() as u64,
            block_size: 4096,
            name_len: 255,
        }
    }
}

fn log_failure<T>(op: &str, caller: &Caller, path: &VirtualPath, result: &Result<T>) {
    if let Err(e) = result {
        if e.is_expected() {
            tracing::debug!(op, path = %path, user = caller.user(), error = %e);
        } else {
            tracing::warn!(op, path = %path, user = caller.user(), error = %e, "operation failed");
        }
    }
}
