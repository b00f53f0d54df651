use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectId;
use parking_lot::Mutex;

use crate::error::{FsError, Result};
use crate::live_state::LiveState;
use crate::repository::Repository;

pub type FileHandle = u64;

/// Chunks remembered per open file.
const HANDLE_CHUNKS: usize = 8;

/// State kept for an open file. The snapshot pins the generation the file
/// was opened under, so every read of the handle sees the same content.
///
/// The most recently read chunks stay with the handle. They outlive cache
/// eviction and generation changes, which is what keeps a long sequential
/// read from fetching the same range twice.
#[derive(Debug)]
pub struct OpenFile {
    pub snapshot: Arc<LiveState>,
    pub repository: Arc<Repository>,
    pub id: ObjectId,
    pub size: u64,
    pub user: String,
    chunks: Mutex<VecDeque<(u64, Bytes)>>,
}

impl OpenFile {
    pub fn new(
        snapshot: Arc<LiveState>,
        repository: Arc<Repository>,
        id: ObjectId,
        size: u64,
        user: &str,
    ) -> Self {
        Self {
            snapshot,
            repository,
            id,
            size,
            user: user.to_string(),
            chunks: Mutex::new(VecDeque::with_capacity(HANDLE_CHUNKS)),
        }
    }

    pub fn chunk(&self, index: u64) -> Option<Bytes> {
        self.chunks
            .lock()
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, data)| data.clone())
    }

    pub fn keep_chunk(&self, index: u64, data: Bytes) {
        let mut chunks = self.chunks.lock();
        if chunks.iter().any(|(i, _)| *i == index) {
            return;
        }
        if chunks.len() == HANDLE_CHUNKS {
            chunks.pop_front();
        }
        chunks.push_back((index, data));
    }
}

/// Bounded table of open files.
#[derive(Debug)]
pub struct HandleTable {
    next: AtomicU64,
    open: Mutex<HashMap<FileHandle, Arc<OpenFile>>>,
    max_open: usize,
}

impl HandleTable {
    pub fn new(max_open: usize) -> Self {
        Self {
            next: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
            max_open,
        }
    }

    pub fn insert(&self, file: OpenFile) -> Result<FileHandle> {
        let mut open = self.open.lock();
        if open.len() >= self.max_open {
            tracing::warn!(max_open = self.max_open, "open file limit reached");
            return Err(FsError::TooManyOpenFiles);
        }
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        open.insert(fh, Arc::new(file));
        Ok(fh)
    }

    pub fn get(&self, fh: FileHandle) -> Result<Arc<OpenFile>> {
        self.open.lock().get(&fh).cloned().ok_or(FsError::BadHandle)
    }

    /// Drop `fh`. Releasing an unknown handle is a no-op.
    pub fn remove(&self, fh: FileHandle) -> bool {
        self.open.lock().remove(&fh).is_some()
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
