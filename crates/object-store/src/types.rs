use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{BackendError, Result};

/// Length of a SHA-1 object id in bytes.
const OID_LEN: usize = 20;

/// Content hash identifying a git object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OID_LEN]);

impl ObjectId {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; OID_LEN] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut raw = [0u8; OID_LEN];
        hex::decode_to_slice(hex_str.trim(), &mut raw)
            .map_err(|e| BackendError::corrupt(format!("invalid object id {hex_str:?}: {e}")))?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; OID_LEN]> for ObjectId {
    fn from(raw: [u8; OID_LEN]) -> Self {
        Self(raw)
    }
}

impl From<git2::Oid> for ObjectId {
    fn from(oid: git2::Oid) -> Self {
        let mut raw = [0u8; OID_LEN];
        raw.copy_from_slice(&oid.as_bytes()[..OID_LEN]);
        Self(raw)
    }
}

impl TryFrom<ObjectId> for git2::Oid {
    type Error = BackendError;

    fn try_from(id: ObjectId) -> Result<Self> {
        git2::Oid::from_bytes(&id.0).map_err(BackendError::from)
    }
}

impl FromStr for ObjectId {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// What a tree entry points at, derived from its git file mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Tree,
    Blob { executable: bool },
    Symlink,
    /// A gitlink (`160000`): the id names a commit in another repository.
    Submodule,
}

impl EntryKind {
    pub const MODE_TREE: u32 = 0o040000;
    pub const MODE_BLOB: u32 = 0o100644;
    pub const MODE_BLOB_GROUP_WRITABLE: u32 = 0o100664;
    pub const MODE_EXECUTABLE: u32 = 0o100755;
    pub const MODE_SYMLINK: u32 = 0o120000;
    pub const MODE_GITLINK: u32 = 0o160000;

    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode {
            Self::MODE_TREE => Some(EntryKind::Tree),
            Self::MODE_BLOB | Self::MODE_BLOB_GROUP_WRITABLE => {
                Some(EntryKind::Blob { executable: false })
            }
            Self::MODE_EXECUTABLE => Some(EntryKind::Blob { executable: true }),
            Self::MODE_SYMLINK => Some(EntryKind::Symlink),
            Self::MODE_GITLINK => Some(EntryKind::Submodule),
            _ => None,
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            EntryKind::Tree => Self::MODE_TREE,
            EntryKind::Blob { executable: false } => Self::MODE_BLOB,
            EntryKind::Blob { executable: true } => Self::MODE_EXECUTABLE,
            EntryKind::Symlink => Self::MODE_SYMLINK,
            EntryKind::Submodule => Self::MODE_GITLINK,
        }
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub mode: u32,
    pub id: ObjectId,
    pub kind: EntryKind,
}

impl TreeEntry {
    /// Six-digit octal mode as `git ls-tree` prints it.
    pub fn mode_string(&self) -> String {
        format!("{:06o}", self.mode)
    }

    /// Approximate heap footprint, used by cache weighers.
    pub fn weight(&self) -> usize {
        std::mem::size_of::<Self>() + self.name.len()
    }
}

/// A named pointer under `refs/heads/` or `refs/tags/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Full ref name, e.g. `refs/heads/main`.
    pub name: String,
    /// The object the ref points at (not peeled).
    pub target: ObjectId,
}

/// A commit a reference resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub tree: ObjectId,
    /// Committer time, seconds since the epoch.
    pub commit_time: i64,
}

/// Blob content together with the length the backend declared for it.
#[derive(Debug, Clone)]
pub struct Blob {
    pub declared_len: u64,
    pub data: Bytes,
}

impl Blob {
    pub fn new(data: Bytes) -> Self {
        Self {
            declared_len: data.len() as u64,
            data,
        }
    }

    /// Return the content, or `Truncated` if fewer or more bytes arrived
    /// than were declared.
    pub fn verified(self) -> Result<Bytes> {
        let actual = self.data.len() as u64;
        if actual != self.declared_len {
            return Err(BackendError::Truncated {
                expected: self.declared_len,
                actual,
            });
        }
        Ok(self.data)
    }
}

/// Parse the binary body of a tree object:
/// `<octal mode> SP <name> NUL <20 byte id>`, repeated.
pub fn parse_tree(data: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or_else(|| BackendError::corrupt("tree entry without mode separator"))?;
        let mode_str = std::str::from_utf8(&rest[..space])
            .map_err(|_| BackendError::corrupt("tree entry mode is not ascii"))?;
        let mode = u32::from_str_radix(mode_str, 8)
            .map_err(|_| BackendError::corrupt(format!("invalid tree entry mode {mode_str:?}")))?;
        rest = &rest[space + 1..];

        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| BackendError::corrupt("tree entry name is not terminated"))?;
        let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
        rest = &rest[nul + 1..];

        if rest.len() < OID_LEN {
            return Err(BackendError::corrupt("tree entry id is cut short"));
        }
        let id = ObjectId::from_bytes(&rest[..OID_LEN])
            .ok_or_else(|| BackendError::corrupt("tree entry id is cut short"))?;
        rest = &rest[OID_LEN..];

        let Some(kind) = EntryKind::from_mode(mode) else {
            tracing::debug!(mode = format!("{mode:o}"), name = %name, "skipping tree entry with unknown mode");
            continue;
        };
        entries.push(TreeEntry {
            name,
            mode,
            id,
            kind,
        });
    }

    Ok(entries)
}

/// Parse the header of a commit object for its tree and committer time.
pub(crate) fn parse_commit(id: ObjectId, data: &[u8]) -> Result<CommitInfo> {
    let text = String::from_utf8_lossy(data);
    let mut tree = None;
    let mut commit_time = None;

    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(hex) = line.strip_prefix("tree ") {
            tree = Some(ObjectId::from_hex(hex)?);
        } else if let Some(committer) = line.strip_prefix("committer ") {
            // "Name <email> 1700000000 +0100"
            let mut fields = committer.rsplit(' ');
            let _tz = fields.next();
            commit_time = fields.next().and_then(|t| t.parse::<i64>().ok());
        }
    }

    let tree = tree.ok_or_else(|| BackendError::corrupt(format!("commit {id} has no tree")))?;
    Ok(CommitInfo {
        id,
        tree,
        commit_time: commit_time.unwrap_or(0),
    })
}
