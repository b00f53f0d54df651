//! In-memory object graph, used to exercise everything above the backend
//! seam without a repository on disk.
//!
//! Object ids are derived from content, so building the same files twice
//! yields the same ids, as it would in git.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::backend::{slice_range, BackendKind, ObjectBackend};
use crate::error::{BackendError, Result};
use crate::types::{Blob, CommitInfo, EntryKind, ObjectId, Reference, TreeEntry};

/// File content placed into a memory commit.
#[derive(Debug, Clone)]
pub enum MemoryFile {
    Blob { data: Bytes, executable: bool },
    Symlink(String),
    Submodule(ObjectId),
}

impl MemoryFile {
    pub fn text(content: &str) -> Self {
        MemoryFile::Blob {
            data: Bytes::copy_from_slice(content.as_bytes()),
            executable: false,
        }
    }

    pub fn bytes(content: impl Into<Bytes>) -> Self {
        MemoryFile::Blob {
            data: content.into(),
            executable: false,
        }
    }

    pub fn executable(content: &str) -> Self {
        MemoryFile::Blob {
            data: Bytes::copy_from_slice(content.as_bytes()),
            executable: true,
        }
    }

    pub fn symlink(target: &str) -> Self {
        MemoryFile::Symlink(target.to_string())
    }
}

#[derive(Debug, Clone)]
enum MemoryObject {
    Blob(Bytes),
    Tree(Vec<TreeEntry>),
    Commit(CommitInfo),
    Tag(ObjectId),
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<ObjectId, MemoryObject>,
    refs: BTreeMap<String, ObjectId>,
    truncated: HashMap<ObjectId, usize>,
    unavailable: Option<String>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    list_refs: AtomicU64,
    tree_reads: AtomicU64,
    blob_reads: AtomicU64,
    range_reads: AtomicU64,
    bytes_served: AtomicU64,
}

enum PathNode {
    File(MemoryFile),
    Dir(BTreeMap<String, PathNode>),
}

/// Backend over an object graph held in memory. Clones share state, so a
/// test can keep a handle and move refs while the filesystem is live.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    counters: Arc<Counters>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a commit whose tree holds `files` (slash separated paths) and
    /// return its id. No ref is moved.
    pub fn commit(&self, files: &[(&str, MemoryFile)], commit_time: i64) -> ObjectId {
        let mut root = BTreeMap::new();
        for (path, file) in files {
            insert_path(&mut root, path, file.clone());
        }

        let mut state = self.state.write();
        let tree = write_tree(&mut state, root);
        let info_bytes = format!("commit tree {tree} time {commit_time}");
        let id = object_id(info_bytes.as_bytes());
        state.objects.insert(
            id,
            MemoryObject::Commit(CommitInfo {
                id,
                tree,
                commit_time,
            }),
        );
        id
    }

    /// Point `name` (a full ref name) at `target`.
    pub fn set_ref(&self, name: &str, target: ObjectId) {
        self.state.write().refs.insert(name.to_string(), target);
    }

    pub fn remove_ref(&self, name: &str) {
        self.state.write().refs.remove(name);
    }

    /// Create an annotated tag object for `commit` and point `refs/tags/<tag>`
    /// at it.
    pub fn annotated_tag(&self, tag: &str, commit: ObjectId) -> ObjectId {
        let id = object_id(format!("tag {tag} object {commit}").as_bytes());
        let mut state = self.state.write();
        state.objects.insert(id, MemoryObject::Tag(commit));
        state.refs.insert(format!("refs/tags/{tag}"), id);
        id
    }

    /// Make every call fail with `Unavailable`, or restore service with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state.write().unavailable = reason.map(str::to_string);
    }

    /// Serve only the first `len` bytes of blob `id` while still declaring
    /// its full length.
    pub fn truncate_blob(&self, id: ObjectId, len: usize) {
        self.state.write().truncated.insert(id, len);
    }

    /// Sleep this long before listing refs.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().delay = delay;
    }

    /// Look up the blob id stored at `path` inside `commit`.
    pub fn blob_id(&self, commit: ObjectId, path: &str) -> Option<ObjectId> {
        let state = self.state.read();
        let mut current = match state.objects.get(&commit)? {
            MemoryObject::Commit(info) => info.tree,
            _ => return None,
        };
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let MemoryObject::Tree(entries) = state.objects.get(&current)? else {
                return None;
            };
            current = entries.iter().find(|e| e.name == component)?.id;
        }
        Some(current)
    }

    pub fn list_refs_calls(&self) -> u64 {
        self.counters.list_refs.load(Ordering::SeqCst)
    }

    pub fn tree_reads(&self) -> u64 {
        self.counters.tree_reads.load(Ordering::SeqCst)
    }

    /// Whole-blob fetches through `get_blob`.
    pub fn blob_reads(&self) -> u64 {
        self.counters.blob_reads.load(Ordering::SeqCst)
    }

    /// Ranged fetches through `read_blob`.
    pub fn range_reads(&self) -> u64 {
        self.counters.range_reads.load(Ordering::SeqCst)
    }

    /// Blob bytes returned by `get_blob` and `read_blob` combined.
    pub fn bytes_served(&self) -> u64 {
        self.counters.bytes_served.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        match &self.state.read().unavailable {
            Some(reason) => Err(BackendError::unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn peel(state: &MemoryState, mut id: ObjectId) -> Result<CommitInfo> {
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(id) {
                return Err(BackendError::corrupt(format!("tag cycle at {id}")));
            }
            match state.objects.get(&id) {
                Some(MemoryObject::Commit(info)) => return Ok(*info),
                Some(MemoryObject::Tag(target)) => id = *target,
                _ => return Err(BackendError::NotFound),
            }
        }
    }
}

fn object_id(content: &[u8]) -> ObjectId {
    let digest = Sha256::digest(content);
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&digest[..20]);
    ObjectId::from(raw)
}

fn insert_path(dir: &mut BTreeMap<String, PathNode>, path: &str, file: MemoryFile) {
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
    let mut current = dir;
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            current.insert(component.to_string(), PathNode::File(file));
            return;
        }
        let node = current
            .entry(component.to_string())
            .or_insert_with(|| PathNode::Dir(BTreeMap::new()));
        if let PathNode::File(_) = node {
            *node = PathNode::Dir(BTreeMap::new());
        }
        let PathNode::Dir(children) = node else {
            return;
        };
        current = children;
    }
}

fn write_tree(state: &mut MemoryState, dir: BTreeMap<String, PathNode>) -> ObjectId {
    let mut entries = Vec::with_capacity(dir.len());
    for (name, node) in dir {
        let (kind, id) = match node {
            PathNode::Dir(children) => (EntryKind::Tree, write_tree(state, children)),
            PathNode::File(MemoryFile::Blob { data, executable }) => {
                let id = write_blob(state, data);
                (EntryKind::Blob { executable }, id)
            }
            PathNode::File(MemoryFile::Symlink(target)) => {
                let id = write_blob(state, Bytes::from(target.into_bytes()));
                (EntryKind::Symlink, id)
            }
            PathNode::File(MemoryFile::Submodule(commit)) => (EntryKind::Submodule, commit),
        };
        entries.push(TreeEntry {
            name,
            mode: kind.mode(),
            id,
            kind,
        });
    }

    // Git orders tree entries as if directory names ended in '/'.
    entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let mut raw = b"tree\0".to_vec();
    for entry in &entries {
        raw.extend_from_slice(format!("{:o} {}\0", entry.mode, entry.name).as_bytes());
        raw.extend_from_slice(entry.id.as_bytes());
    }
    let id = object_id(&raw);
    state.objects.insert(id, MemoryObject::Tree(entries));
    id
}

fn sort_key(entry: &TreeEntry) -> Vec<u8> {
    let mut key = entry.name.as_bytes().to_vec();
    if entry.kind == EntryKind::Tree {
        key.push(b'/');
    }
    key
}

fn write_blob(state: &mut MemoryState, data: Bytes) -> ObjectId {
    let mut raw = b"blob\0".to_vec();
    raw.extend_from_slice(&data);
    let id = object_id(&raw);
    state.objects.insert(id, MemoryObject::Blob(data));
    id
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn list_refs(&self) -> Result<Vec<Reference>> {
        self.counters.list_refs.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.read().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        Ok(self
            .state
            .read()
            .refs
            .iter()
            .map(|(name, target)| Reference {
                name: name.clone(),
                target: *target,
            })
            .collect())
    }

    async fn resolve_ref(&self, name: &str) -> Result<CommitInfo> {
        self.check_available()?;
        let state = self.state.read();
        let target = *state.refs.get(name).ok_or(BackendError::NotFound)?;
        Self::peel(&state, target)
    }

    async fn get_tree(&self, id: &ObjectId) -> Result<Vec<TreeEntry>> {
        self.counters.tree_reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        match self.state.read().objects.get(id) {
            Some(MemoryObject::Tree(entries)) => Ok(entries.clone()),
            Some(_) => Err(BackendError::corrupt(format!("{id} is not a tree"))),
            None => Err(BackendError::NotFound),
        }
    }

    async fn get_blob(&self, id: &ObjectId) -> Result<Blob> {
        self.counters.blob_reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let state = self.state.read();
        let data = match state.objects.get(id) {
            Some(MemoryObject::Blob(data)) => data.clone(),
            Some(_) => return Err(BackendError::corrupt(format!("{id} is not a blob"))),
            None => return Err(BackendError::NotFound),
        };
        let blob = match state.truncated.get(id) {
            Some(len) => Blob {
                declared_len: data.len() as u64,
                data: data.slice(..(*len).min(data.len())),
            },
            None => Blob::new(data),
        };
        self.counters
            .bytes_served
            .fetch_add(blob.data.len() as u64, Ordering::SeqCst);
        Ok(blob)
    }

    async fn read_blob(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        self.counters.range_reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let state = self.state.read();
        let data = match state.objects.get(id) {
            Some(MemoryObject::Blob(data)) => data.clone(),
            Some(_) => return Err(BackendError::corrupt(format!("{id} is not a blob"))),
            None => return Err(BackendError::NotFound),
        };

        let size = data.len() as u64;
        let served = state
            .truncated
            .get(id)
            .map_or(size, |len| (*len as u64).min(size));
        let wanted_end = offset.saturating_add(len).min(size);
        if offset < size && wanted_end > served {
            return Err(BackendError::Truncated {
                expected: size,
                actual: served,
            });
        }

        let range = slice_range(&data, offset, len);
        self.counters
            .bytes_served
            .fetch_add(range.len() as u64, Ordering::SeqCst);
        Ok(range)
    }

    async fn blob_size(&self, id: &ObjectId) -> Result<u64> {
        self.check_available()?;
        match self.state.read().objects.get(id) {
            Some(MemoryObject::Blob(data)) => Ok(data.len() as u64),
            Some(_) => Err(BackendError::corrupt(format!("{id} is not a blob"))),
            None => Err(BackendError::NotFound),
        }
    }
}
