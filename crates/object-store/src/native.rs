//! Object backend reading the repository in-process through libgit2.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::backend::{BackendKind, ObjectBackend};
use crate::error::{BackendError, Result};
use crate::types::{Blob, CommitInfo, EntryKind, ObjectId, Reference, TreeEntry};

const REF_PREFIXES: [&str; 2] = ["refs/heads/", "refs/tags/"];

/// Idle repository handles kept per backend.
const MAX_IDLE_HANDLES: usize = 4;

/// Native backend. Repository handles are opened on demand and returned to
/// a small idle pool after each call; libgit2 calls run on the blocking
/// pool, each on its own handle.
#[derive(Clone)]
pub struct NativeBackend {
    path: PathBuf,
    idle: Arc<Mutex<Vec<git2::Repository>>>,
}

impl fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBackend")
            .field("path", &self.path)
            .field("idle_handles", &self.idle.lock().len())
            .finish()
    }
}

impl NativeBackend {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&git2::Repository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let idle = self.idle.clone();

        tokio::task::spawn_blocking(move || {
            let pooled = idle.lock().pop();
            let repo = match pooled {
                Some(repo) => repo,
                None => open_repository(&path)?,
            };
            let result = f(&repo);

            let mut idle = idle.lock();
            if idle.len() < MAX_IDLE_HANDLES {
                idle.push(repo);
            }
            result
        })
        .await
        .map_err(|e| BackendError::unavailable(format!("blocking task failed: {e}")))?
    }
}

fn open_repository(path: &Path) -> Result<git2::Repository> {
    let repo = git2::Repository::open_bare(path).map_err(|e| {
        BackendError::unavailable(format!("cannot open {}: {}", path.display(), e.message()))
    })?;
    tracing::debug!(path = %path.display(), "opened repository");
    Ok(repo)
}

/// Skip `offset` bytes of a `size` byte object, then read up to `len`.
fn read_range(reader: &mut impl Read, size: u64, offset: u64, len: u64) -> Result<Bytes> {
    if offset >= size {
        return Ok(Bytes::new());
    }
    let want = len.min(size - offset);
    let skipped = std::io::copy(&mut reader.by_ref().take(offset), &mut std::io::sink())?;
    let mut buf = Vec::with_capacity(want as usize);
    reader.by_ref().take(want).read_to_end(&mut buf)?;

    if skipped < offset || (buf.len() as u64) < want {
        return Err(BackendError::Truncated {
            expected: size,
            actual: skipped + buf.len() as u64,
        });
    }
    Ok(Bytes::from(buf))
}

fn find_object(
    repo: &git2::Repository,
    id: ObjectId,
    kind: git2::ObjectType,
) -> Result<git2::Object<'_>> {
    let object = repo.find_object(git2::Oid::try_from(id)?, None)?;
    if object.kind() != Some(kind) {
        return Err(BackendError::corrupt(format!(
            "{id} is a {}, expected a {kind}",
            object.kind().map(|k| k.str()).unwrap_or("unknown")
        )));
    }
    Ok(object)
}

#[async_trait]
impl ObjectBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn list_refs(&self) -> Result<Vec<Reference>> {
        self.with_repo(|repo| {
            let mut refs = Vec::new();
            for reference in repo.references()? {
                let reference = reference?;
                let Some(name) = reference.name() else {
                    continue;
                };
                if !REF_PREFIXES.iter().any(|p| name.starts_with(p)) {
                    continue;
                }
                let target = match reference.target() {
                    Some(oid) => oid,
                    None => match reference.resolve().ok().and_then(|r| r.target()) {
                        Some(oid) => oid,
                        None => {
                            tracing::debug!(name, "skipping dangling symbolic ref");
                            continue;
                        }
                    },
                };
                refs.push(Reference {
                    name: name.to_string(),
                    target: target.into(),
                });
            }
            refs.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(refs)
        })
        .await
    }

    async fn resolve_ref(&self, name: &str) -> Result<CommitInfo> {
        let name = name.to_string();
        self.with_repo(move |repo| {
            let commit = repo.find_reference(&name)?.peel_to_commit()?;
            Ok(CommitInfo {
                id: commit.id().into(),
                tree: commit.tree_id().into(),
                commit_time: commit.time().seconds(),
            })
        })
        .await
    }

    async fn get_tree(&self, id: &ObjectId) -> Result<Vec<TreeEntry>> {
        let id = *id;
        self.with_repo(move |repo| {
            let object = find_object(repo, id, git2::ObjectType::Tree)?;
            let tree = object
                .as_tree()
                .ok_or_else(|| BackendError::corrupt(format!("{id} is not a tree")))?;

            let mut entries = Vec::with_capacity(tree.len());
            for entry in tree.iter() {
                let mode = entry.filemode() as u32;
                let name = String::from_utf8_lossy(entry.name_bytes()).into_owned();
                let Some(kind) = EntryKind::from_mode(mode) else {
                    tracing::debug!(mode = format!("{mode:o}"), name = %name, "skipping tree entry with unknown mode");
                    continue;
                };
                entries.push(TreeEntry {
                    name,
                    mode,
                    id: entry.id().into(),
                    kind,
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn get_blob(&self, id: &ObjectId) -> Result<Blob> {
        let id = *id;
        self.with_repo(move |repo| {
            let object = find_object(repo, id, git2::ObjectType::Blob)?;
            let blob = object
                .as_blob()
                .ok_or_else(|| BackendError::corrupt(format!("{id} is not a blob")))?;
            Ok(Blob::new(Bytes::copy_from_slice(blob.content())))
        })
        .await
    }

    async fn blob_size(&self, id: &ObjectId) -> Result<u64> {
        let id = *id;
        self.with_repo(move |repo| {
            let (size, kind) = repo.odb()?.read_header(git2::Oid::try_from(id)?)?;
            if kind != git2::ObjectType::Blob {
                return Err(BackendError::corrupt(format!(
                    "{id} is a {kind}, expected a blob"
                )));
            }
            Ok(size as u64)
        })
        .await
    }

    async fn read_blob(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        let id = *id;
        self.with_repo(move |repo| {
            let oid = git2::Oid::try_from(id)?;
            let odb = repo.odb()?;
            let stream = odb.reader(oid);
            match stream {
                Ok((mut reader, size, kind)) => {
                    if kind != git2::ObjectType::Blob {
                        return Err(BackendError::corrupt(format!(
                            "{id} is a {kind}, expected a blob"
                        )));
                    }
                    read_range(&mut reader, size as u64, offset, len)
                }
                // libgit2 streams loose objects only; packed ones are decoded whole.
                Err(e) => {
                    tracing::trace!(%id, error = e.message(), "no streaming reader");
                    let object = find_object(repo, id, git2::ObjectType::Blob)?;
                    let blob = object
                        .as_blob()
                        .ok_or_else(|| BackendError::corrupt(format!("{id} is not a blob")))?;
                    let content = blob.content();
                    let start = (offset.min(content.len() as u64)) as usize;
                    let end = (offset.saturating_add(len).min(content.len() as u64)) as usize;
                    Ok(Bytes::copy_from_slice(&content[start..end]))
                }
            }
        })
        .await
    }
}
