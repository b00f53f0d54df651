//! Repositories as seen by one Live State generation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::{
    open_backend, BackendError, BackendKind, BackendOptions, CommitInfo, ObjectBackend,
};
use serde::{Deserialize, Serialize};

use crate::error::{FsError, SourceError};

const HEADS: &str = "refs/heads/";
const TAGS: &str = "refs/tags/";

/// One bare repository to expose, as reported by a [`RepositorySource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    /// Name under the mount root; `/` separates grouping directories.
    pub name: String,
    pub path: PathBuf,
    /// Backend override; the factory default applies when unset.
    #[serde(default)]
    pub backend: Option<BackendKind>,
}

impl RepositorySpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            backend: None,
        }
    }

    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }
}

/// Enumerates the repositories to serve, re-read on every refresh.
#[async_trait]
pub trait RepositorySource: Send + Sync + fmt::Debug {
    async fn enumerate(&self) -> Result<Vec<RepositorySpec>, SourceError>;
}

/// Constructs the object backend for a repository.
pub trait BackendFactory: Send + Sync + fmt::Debug {
    fn open(&self, spec: &RepositorySpec) -> Result<Arc<dyn ObjectBackend>, BackendError>;
}

/// Opens native or git command line backends for on-disk repositories.
#[derive(Debug, Clone, Default)]
pub struct GitBackendFactory {
    pub default_kind: BackendKind,
    pub options: BackendOptions,
}

impl GitBackendFactory {
    pub fn new(default_kind: BackendKind, options: BackendOptions) -> Self {
        Self {
            default_kind,
            options,
        }
    }
}

impl BackendFactory for GitBackendFactory {
    fn open(&self, spec: &RepositorySpec) -> Result<Arc<dyn ObjectBackend>, BackendError> {
        open_backend(
            spec.backend.unwrap_or(self.default_kind),
            &spec.path,
            &self.options,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoStatus {
    Ready,
    Unavailable(String),
}

/// A repository together with the refs it had when the snapshot was taken.
pub struct Repository {
    name: Arc<str>,
    path: PathBuf,
    kind: Option<BackendKind>,
    backend: Option<Arc<dyn ObjectBackend>>,
    /// short ref name -> commit
    refs: BTreeMap<String, CommitInfo>,
    status: RepoStatus,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("refs", &self.refs.len())
            .field("status", &self.status)
            .finish()
    }
}

impl Repository {
    /// Snapshot the refs of `spec` through `backend`.
    ///
    /// A backend that cannot list refs yields a repository marked
    /// unavailable instead of an error, so one broken repository does not
    /// fail the whole refresh.
    pub async fn load(
        spec: &RepositorySpec,
        backend: Arc<dyn ObjectBackend>,
        expose_tags: bool,
    ) -> Self {
        let kind = Some(backend.kind());
        match Self::read_refs(backend.as_ref(), expose_tags).await {
            Ok(refs) => Self {
                name: Arc::from(spec.name.as_str()),
                path: spec.path.clone(),
                kind,
                backend: Some(backend),
                refs,
                status: RepoStatus::Ready,
            },
            Err(e) => {
                tracing::warn!(repository = %spec.name, error = %e, "repository unavailable");
                Self {
                    name: Arc::from(spec.name.as_str()),
                    path: spec.path.clone(),
                    kind,
                    backend: Some(backend),
                    refs: BTreeMap::new(),
                    status: RepoStatus::Unavailable(e.to_string()),
                }
            }
        }
    }

    /// A repository whose backend could not even be constructed.
    pub fn unavailable(spec: &RepositorySpec, reason: impl Into<String>) -> Self {
        Self {
            name: Arc::from(spec.name.as_str()),
            path: spec.path.clone(),
            kind: spec.backend,
            backend: None,
            refs: BTreeMap::new(),
            status: RepoStatus::Unavailable(reason.into()),
        }
    }

    async fn read_refs(
        backend: &dyn ObjectBackend,
        expose_tags: bool,
    ) -> Result<BTreeMap<String, CommitInfo>, BackendError> {
        let mut names: Vec<String> = backend
            .list_refs()
            .await?
            .into_iter()
            .map(|r| r.name)
            .filter(|name| name.starts_with(HEADS) || (expose_tags && name.starts_with(TAGS)))
            .collect();
        // Heads first so that a branch wins over a tag of the same name.
        names.sort_by_key(|name| (!name.starts_with(HEADS), name.clone()));

        let resolved = backend.resolve_refs(&names).await?;
        let mut refs = BTreeMap::new();
        for (name, result) in names.iter().zip(resolved) {
            let short = name
                .strip_prefix(HEADS)
                .or_else(|| name.strip_prefix(TAGS))
                .unwrap_or(name);
            match result {
                Ok(commit) => {
                    if refs.contains_key(short) {
                        tracing::debug!(reference = %name, "shadowed by a branch of the same name");
                        continue;
                    }
                    refs.insert(short.to_string(), commit);
                }
                Err(BackendError::NotFound) => {
                    tracing::debug!(reference = %name, "does not point at a commit, skipping");
                }
                Err(BackendError::Unavailable(msg)) => {
                    return Err(BackendError::Unavailable(msg));
                }
                Err(e) => {
                    tracing::warn!(reference = %name, error = %e, "skipping unreadable ref");
                }
            }
        }
        Ok(refs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> Option<BackendKind> {
        self.kind
    }

    pub fn status(&self) -> &RepoStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == RepoStatus::Ready
    }

    /// Refs by short name (`main`, `v1.0`, `feature/x`).
    pub fn refs(&self) -> &BTreeMap<String, CommitInfo> {
        &self.refs
    }

    /// Latest commit time across all refs, if any.
    pub fn last_commit_time(&self) -> Option<i64> {
        self.refs.values().map(|c| c.commit_time).max()
    }

    /// The backend, or `BackendUnavailable` if the repository is not usable.
    pub fn backend(&self) -> Result<&Arc<dyn ObjectBackend>, FsError> {
        match (&self.status, &self.backend) {
            (RepoStatus::Ready, Some(backend)) => Ok(backend),
            (RepoStatus::Unavailable(reason), _) => {
                Err(FsError::BackendUnavailable(reason.clone()))
            }
            (RepoStatus::Ready, None) => Err(FsError::BackendUnavailable(format!(
                "no backend for {}",
                self.name
            ))),
        }
    }

    /// Whether `other` describes the same repository state.
    pub fn same_content(&self, other: &Repository) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.kind == other.kind
            && self.refs == other.refs
            && self.status == other.status
    }
}
