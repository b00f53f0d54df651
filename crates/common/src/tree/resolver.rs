//! Path resolution against one Live State snapshot.
//!
//! A path is split into repository name, ref name and tree path. The first
//! two are matched against the names visible to the caller; the tree path is
//! walked one segment at a time through the object cache.

use std::sync::Arc;

use bytes::Bytes;
use object_store::{slice_range, BackendError, EntryKind, ObjectId, TreeEntry};

use crate::cache::{CacheKey, CachedObject, ObjectCache, ObjectKind};
use crate::error::{FsError, Result};
use crate::live_state::LiveState;
use crate::repository::Repository;
use crate::tree::namespace::{NameMatch, Namespace};
use crate::tree::node::{commit_time, entry_file_type, DirEntry, Directory, FileType, Node, Resolved};
use crate::tree::path::VirtualPath;

/// Granularity of ranged blob reads and of the chunk cache.
pub const READ_CHUNK: u64 = 128 * 1024;

pub struct Resolver<'a> {
    state: &'a LiveState,
    cache: &'a ObjectCache,
    user: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(state: &'a LiveState, cache: &'a ObjectCache, user: &'a str) -> Self {
        Self { state, cache, user }
    }

    fn synthetic(&self, directory: Directory, repository: Option<Arc<Repository>>) -> Resolved {
        Resolved {
            node: Node::Directory(directory),
            repository,
            commit: None,
            mtime: self.state.built_at(),
            generation: self.state.generation(),
        }
    }

    pub async fn resolve(&self, path: &VirtualPath) -> Result<Resolved> {
        let segments = path.segments();
        if segments.is_empty() {
            return Ok(self.synthetic(Directory::Root, None));
        }

        let visible = Namespace::new(self.state.visible_names(self.user));
        let (name, consumed) = match visible.lookup(segments) {
            NameMatch::Leaf { name, consumed } => (name, consumed),
            NameMatch::Group => {
                return Ok(self.synthetic(
                    Directory::RepositoryGroup {
                        prefix: segments.to_vec(),
                    },
                    None,
                ))
            }
            NameMatch::Missing => return Err(FsError::NotFound),
        };
        let repository = self
            .state
            .visible(self.user, &name)
            .cloned()
            .ok_or(FsError::NotFound)?;

        let rest = &segments[consumed..];
        if rest.is_empty() {
            return Ok(self.synthetic(Directory::Repository, Some(repository)));
        }
        repository.backend()?;

        let refs = Namespace::new(repository.refs().keys().map(String::as_str));
        let (ref_name, consumed) = match refs.lookup(rest) {
            NameMatch::Leaf { name, consumed } => (name, consumed),
            NameMatch::Group => {
                return Ok(self.synthetic(
                    Directory::RefGroup {
                        prefix: rest.to_vec(),
                    },
                    Some(repository),
                ))
            }
            NameMatch::Missing => return Err(FsError::NotFound),
        };
        let commit = repository
            .refs()
            .get(&ref_name)
            .copied()
            .ok_or(FsError::NotFound)?;

        let mut node = Node::Directory(Directory::Tree(commit.tree));
        let tree_path = &rest[consumed..];
        for (depth, segment) in tree_path.iter().enumerate() {
            let tree_id = match &node {
                Node::Directory(Directory::Tree(id)) => *id,
                Node::Submodule { .. } => return Err(FsError::NotFound),
                _ => return Err(FsError::NotADirectory),
            };
            let entries = self.tree(&repository, tree_id).await?;
            let Some(entry) = entries.iter().find(|e| &e.name == segment) else {
                tracing::trace!(path = %path, depth, "not found at segment");
                return Err(FsError::NotFound);
            };
            let last = depth + 1 == tree_path.len();
            node = self.entry_node(&repository, entry, last).await?;
        }

        Ok(Resolved {
            node,
            repository: Some(repository),
            commit: Some(commit),
            mtime: commit_time(&commit),
            generation: self.state.generation(),
        })
    }

    /// Node for a tree entry. Sizes are only looked up when `with_size`.
    async fn entry_node(
        &self,
        repository: &Repository,
        entry: &TreeEntry,
        with_size: bool,
    ) -> Result<Node> {
        let size = match entry.kind {
            EntryKind::Blob { .. } | EntryKind::Symlink if with_size => {
                self.blob_size(repository, entry.id).await?
            }
            _ => 0,
        };
        Ok(match entry.kind {
            EntryKind::Tree => Node::Directory(Directory::Tree(entry.id)),
            EntryKind::Submodule => Node::Submodule { commit: entry.id },
            EntryKind::Blob { executable } => Node::File {
                id: entry.id,
                size,
                executable,
            },
            EntryKind::Symlink => Node::Symlink { id: entry.id, size },
        })
    }

    /// Entries of a resolved directory. Synthesized levels are sorted by
    /// name; tree levels keep the order of the tree object.
    pub async fn list(&self, resolved: &Resolved) -> Result<Vec<DirEntry>> {
        let directory = match &resolved.node {
            Node::Directory(directory) => directory,
            Node::Submodule { .. } => return Ok(Vec::new()),
            Node::File { .. } | Node::Symlink { .. } => return Err(FsError::NotADirectory),
        };

        let names = match directory {
            Directory::Root => {
                Namespace::new(self.state.visible_names(self.user)).children(&[])
            }
            Directory::RepositoryGroup { prefix } => {
                Namespace::new(self.state.visible_names(self.user)).children(prefix)
            }
            Directory::Repository | Directory::RefGroup { .. } => {
                let repository = Self::repository_of(resolved)?;
                repository.backend()?;
                let prefix: &[String] = match directory {
                    Directory::RefGroup { prefix } => prefix,
                    _ => &[],
                };
                Namespace::new(repository.refs().keys().map(String::as_str)).children(prefix)
            }
            Directory::Tree(id) => {
                let repository = Self::repository_of(resolved)?;
                let entries = self.tree(repository, *id).await?;
                return Ok(entries
                    .iter()
                    .map(|entry| DirEntry {
                        name: entry.name.clone(),
                        file_type: entry_file_type(entry),
                    })
                    .collect());
            }
        };

        Ok(names
            .into_iter()
            .map(|name| DirEntry {
                name,
                file_type: FileType::Directory,
            })
            .collect())
    }

    fn repository_of(resolved: &Resolved) -> Result<&Arc<Repository>> {
        resolved
            .repository
            .as_ref()
            .ok_or_else(|| FsError::Corrupt("directory without repository".to_string()))
    }

    /// Tree listing, through the cache.
    pub async fn tree(&self, repository: &Repository, id: ObjectId) -> Result<Arc<Vec<TreeEntry>>> {
        let generation = self.state.generation();
        let key = CacheKey::new(repository.shared_name(), id, ObjectKind::Tree);
        if let Some(CachedObject::Tree(entries)) = self.cache.get(&key, generation) {
            return Ok(entries);
        }

        let entries = Arc::new(
            repository
                .backend()?
                .get_tree(&id)
                .await
                .map_err(|e| Self::backend_failure(repository, id, e))?,
        );
        self.cache
            .put(key, CachedObject::Tree(entries.clone()), generation);
        Ok(entries)
    }

    /// Full blob content, through the cache. Content whose length differs
    /// from the declared length is rejected and never cached.
    pub async fn blob(&self, repository: &Repository, id: ObjectId) -> Result<Bytes> {
        let generation = self.state.generation();
        let key = CacheKey::new(repository.shared_name(), id, ObjectKind::Blob);
        if let Some(CachedObject::Blob(data)) = self.cache.get(&key, generation) {
            return Ok(data);
        }

        let data = repository
            .backend()?
            .get_blob(&id)
            .await
            .and_then(|blob| blob.verified())
            .map_err(|e| Self::backend_failure(repository, id, e))?;
        self.cache
            .put(key, CachedObject::Blob(data.clone()), generation);
        Ok(data)
    }

    /// Chunk `index` of a `size` byte blob: [`READ_CHUNK`] bytes, fewer for
    /// the last one. Served from a cached whole blob when there is one,
    /// otherwise fetched as a range and cached on its own.
    pub async fn blob_chunk(
        &self,
        repository: &Repository,
        id: ObjectId,
        size: u64,
        index: u64,
    ) -> Result<Bytes> {
        let generation = self.state.generation();
        let start = index.saturating_mul(READ_CHUNK);
        if start >= size {
            return Ok(Bytes::new());
        }
        let expected = READ_CHUNK.min(size - start);

        let key = CacheKey::new(repository.shared_name(), id, ObjectKind::Chunk(index));
        if let Some(CachedObject::Blob(data)) = self.cache.get(&key, generation) {
            return Ok(data);
        }
        let blob_key = CacheKey::new(repository.shared_name(), id, ObjectKind::Blob);
        if let Some(CachedObject::Blob(data)) = self.cache.peek(&blob_key, generation) {
            return Ok(slice_range(&data, start, expected));
        }

        let data = repository
            .backend()?
            .read_blob(&id, start, expected)
            .await
            .and_then(|data| {
                if data.len() as u64 == expected {
                    Ok(data)
                } else {
                    Err(BackendError::Truncated {
                        expected: size,
                        actual: start + data.len() as u64,
                    })
                }
            })
            .map_err(|e| Self::backend_failure(repository, id, e))?;
        self.cache
            .put(key, CachedObject::Blob(data.clone()), generation);
        Ok(data)
    }

    /// Blob length without reading content when it is not already cached.
    pub async fn blob_size(&self, repository: &Repository, id: ObjectId) -> Result<u64> {
        let generation = self.state.generation();
        let key = CacheKey::new(repository.shared_name(), id, ObjectKind::BlobSize);
        if let Some(CachedObject::BlobSize(size)) = self.cache.get(&key, generation) {
            return Ok(size);
        }
        let blob_key = CacheKey::new(repository.shared_name(), id, ObjectKind::Blob);
        let size = match self.cache.peek(&blob_key, generation) {
            Some(CachedObject::Blob(data)) => data.len() as u64,
            _ => repository
                .backend()?
                .blob_size(&id)
                .await
                .map_err(|e| Self::backend_failure(repository, id, e))?,
        };
        self.cache.put(key, CachedObject::BlobSize(size), generation);
        Ok(size)
    }

    fn backend_failure(repository: &Repository, id: ObjectId, e: BackendError) -> FsError {
        match &e {
            BackendError::NotFound => {
                tracing::debug!(repository = repository.name(), %id, "object not found");
            }
            BackendError::Truncated { .. } | BackendError::Corrupt(_) => {
                tracing::error!(repository = repository.name(), %id, error = %e, "inconsistent object data");
            }
            BackendError::Unavailable(_) => {
                tracing::warn!(repository = repository.name(), %id, error = %e, "backend unavailable");
            }
        }
        FsError::from(e)
    }
}
