//! `fuser::Filesystem` over [`FsEngine`].
//!
//! Kernel callbacks arrive on the FUSE session thread. Each one resolves its
//! inode to a path, then runs the engine call as a task on the tokio runtime
//! and replies from there, so a slow backend never stalls the session.

use std::ffi::OsStr;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use common::tree::{Attr, FileType, VirtualPath};
use common::{FsEngine, FsError};

use super::identity::Identities;
use super::inode_table::InodeTable;

/// How long the kernel may cache attributes and entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

const BLOCK_SIZE: u32 = 4096;

/// Errno reported to the kernel for an engine error.
pub fn errno(error: &FsError) -> libc::c_int {
    match error {
        FsError::NotFound => libc::ENOENT,
        FsError::PermissionDenied => libc::EACCES,
        FsError::NotADirectory => libc::ENOTDIR,
        FsError::IsADirectory => libc::EISDIR,
        FsError::NotASymlink => libc::EINVAL,
        FsError::BadHandle => libc::EBADF,
        FsError::TooManyOpenFiles => libc::EMFILE,
        FsError::BackendUnavailable(_) | FsError::Corrupt(_) => libc::EIO,
    }
}

/// Owner reported for every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// The user running the daemon.
    pub fn current() -> Self {
        // SAFETY: geteuid and getegid cannot fail.
        unsafe {
            Self {
                uid: libc::geteuid(),
                gid: libc::getegid(),
            }
        }
    }
}

fn kind(file_type: FileType) -> fuser::FileType {
    match file_type {
        FileType::Directory => fuser::FileType::Directory,
        FileType::RegularFile => fuser::FileType::RegularFile,
        FileType::Symlink => fuser::FileType::Symlink,
    }
}

pub fn file_attr(ino: u64, attr: &Attr, owner: Owner) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: kind(attr.file_type),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: owner.uid,
        gid: owner.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Whether open flags ask for anything beyond reading.
fn wants_write(flags: i32) -> bool {
    flags & libc::O_ACCMODE != libc::O_RDONLY || flags & (libc::O_TRUNC | libc::O_APPEND) != 0
}

/// Read-only filesystem of bare git repositories.
pub struct GitFs {
    engine: FsEngine,
    runtime: Handle,
    inodes: Arc<Mutex<InodeTable>>,
    identities: Arc<Identities>,
    owner: Owner,
    ttl: Duration,
}

impl GitFs {
    pub fn new(engine: FsEngine, runtime: Handle) -> Self {
        Self {
            engine,
            runtime,
            inodes: Arc::new(Mutex::new(InodeTable::new())),
            identities: Arc::new(Identities::new()),
            owner: Owner::current(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn identities(&self) -> Arc<Identities> {
        self.identities.clone()
    }

    fn path_of(&self, ino: u64) -> Option<VirtualPath> {
        self.inodes.lock().get_path(ino).cloned()
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }
}

impl Filesystem for GitFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!(
            generation = self.engine.generation(),
            uid = self.owner.uid,
            "filesystem initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!(open_files = self.engine.open_files(), "filesystem unmounted");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.path_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();
        let inodes = self.inodes.clone();
        let (owner, ttl) = (self.owner, self.ttl);

        self.spawn(async move {
            match engine.lookup(&caller, &parent_path, &name).await {
                Ok(entry) => {
                    let ino = inodes.lock().lookup(&entry.path);
                    reply.entry(&ttl, &file_attr(ino, &entry.attr, owner), 0);
                }
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.lock().forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();
        let (owner, ttl) = (self.owner, self.ttl);

        self.spawn(async move {
            match engine.getattr(&caller, &path).await {
                Ok(attr) => reply.attr(&ttl, &file_attr(ino, &attr, owner)),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();

        self.spawn(async move {
            match engine.readlink(&caller, &path).await {
                Ok(target) => reply.data(&target),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();
        let write = wants_write(flags);

        self.spawn(async move {
            match engine.open(&caller, &path, write).await {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        let engine = self.engine.clone();

        self.spawn(async move {
            match engine.read(fh, offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.engine.release(fh);
        reply.ok();
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();

        self.spawn(async move {
            match engine.getattr(&caller, &path).await {
                Ok(attr) if attr.file_type == FileType::Directory => reply.opened(0, 0),
                Ok(_) => reply.error(libc::ENOTDIR),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();
        let inodes = self.inodes.clone();
        let skip = usize::try_from(offset).unwrap_or(0);

        self.spawn(async move {
            let listing = match engine.readdir(&caller, &path).await {
                Ok(listing) => listing,
                Err(e) => {
                    reply.error(errno(&e));
                    return;
                }
            };

            let mut entries = Vec::with_capacity(listing.len() + 2);
            {
                let mut table = inodes.lock();
                let parent = match path.parent() {
                    Some(parent) => table.get_or_create(&parent),
                    None => ino,
                };
                entries.push((ino, fuser::FileType::Directory, ".".to_string()));
                entries.push((parent, fuser::FileType::Directory, "..".to_string()));
                for entry in listing {
                    let Ok(child) = path.join(&entry.name) else {
                        continue;
                    };
                    let child_ino = table.get_or_create(&child);
                    entries.push((child_ino, kind(entry.file_type), entry.name));
                }
            }

            for (i, (child_ino, file_type, name)) in entries.into_iter().enumerate().skip(skip) {
                // A full buffer ends this batch; the kernel asks again with the offset.
                if reply.add(child_ino, (i + 1) as i64, file_type, &name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn statfs(&mut self, req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.engine.statfs(&self.identities.caller(req.uid()));
        reply.statfs(
            stats.blocks,
            0,
            0,
            stats.files,
            0,
            stats.block_size,
            stats.name_len,
            stats.block_size,
        );
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        if mask & libc::W_OK != 0 {
            reply.error(libc::EACCES);
            return;
        }
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let caller = self.identities.caller(req.uid());
        let engine = self.engine.clone();

        self.spawn(async move {
            match engine.getattr(&caller, &path).await {
                Ok(_) => reply.ok(),
                Err(e) => reply.error(errno(&e)),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(errno(&FsError::NotFound), libc::ENOENT);
        assert_eq!(errno(&FsError::PermissionDenied), libc::EACCES);
        assert_eq!(errno(&FsError::NotADirectory), libc::ENOTDIR);
        assert_eq!(errno(&FsError::IsADirectory), libc::EISDIR);
        assert_eq!(errno(&FsError::NotASymlink), libc::EINVAL);
        assert_eq!(errno(&FsError::BadHandle), libc::EBADF);
        assert_eq!(errno(&FsError::TooManyOpenFiles), libc::EMFILE);
        assert_eq!(
            errno(&FsError::BackendUnavailable("gone".into())),
            libc::EIO
        );
        assert_eq!(errno(&FsError::Corrupt("short".into())), libc::EIO);
    }

    #[test]
    fn test_write_flags() {
        assert!(!wants_write(libc::O_RDONLY));
        assert!(wants_write(libc::O_WRONLY));
        assert!(wants_write(libc::O_RDWR));
        assert!(wants_write(libc::O_RDONLY | libc::O_TRUNC));
        assert!(!wants_write(libc::O_RDONLY | libc::O_NOFOLLOW));
    }

    #[test]
    fn test_file_attr_conversion() {
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let attr = Attr {
            file_type: FileType::RegularFile,
            size: 1025,
            perm: 0o664,
            nlink: 1,
            mtime,
        };
        let owner = Owner { uid: 1000, gid: 100 };
        let converted = file_attr(42, &attr, owner);

        assert_eq!(converted.ino, 42);
        assert_eq!(converted.size, 1025);
        assert_eq!(converted.blocks, 3);
        assert_eq!(converted.kind, fuser::FileType::RegularFile);
        assert_eq!(converted.perm, 0o664);
        assert_eq!(converted.mtime, mtime);
        assert_eq!(converted.uid, 1000);
        assert_eq!(converted.gid, 100);
    }
}
