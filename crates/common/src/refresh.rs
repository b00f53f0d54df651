//! Rebuilds the Live State and swaps it in.
//!
//! The draft is assembled without holding any lock. The write lock is taken
//! only to replace the `Arc`, so readers never wait on backend I/O.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::acl::AclSource;
use crate::cache::ObjectCache;
use crate::live_state::LiveState;
use crate::repository::{BackendFactory, Repository, RepositorySource, RepositorySpec};

/// Repositories whose refs are read concurrently during a rebuild.
const LOAD_CONCURRENCY: usize = 8;

/// Why a rebuild was abandoned. The previous Live State stays authoritative.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("acl source unavailable: {0}")]
    AclSource(String),
    #[error("repository enumeration failed: {0}")]
    Repositories(String),
}

/// External collaborators consulted on every refresh.
#[derive(Debug, Clone)]
pub struct Sources {
    pub acl: Arc<dyn AclSource>,
    pub repositories: Arc<dyn RepositorySource>,
    pub backends: Arc<dyn BackendFactory>,
}

type InFlight = Shared<BoxFuture<'static, Result<u64, RefreshError>>>;

struct Inner {
    live: RwLock<Arc<LiveState>>,
    sources: Sources,
    cache: ObjectCache,
    expose_tags: bool,
    in_flight: Mutex<Option<InFlight>>,
}

/// Owner of the authoritative [`LiveState`]. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("generation", &self.generation())
            .field("sources", &self.inner.sources)
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(sources: Sources, cache: ObjectCache, expose_tags: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                live: RwLock::new(Arc::new(LiveState::empty())),
                sources,
                cache,
                expose_tags,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The current Live State. Holding the returned `Arc` pins that
    /// generation for as long as the caller needs it.
    pub fn snapshot(&self) -> Arc<LiveState> {
        self.inner.live.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.live.read().generation()
    }

    /// Rebuild the Live State and return the generation now being served.
    ///
    /// Callers arriving while a rebuild is running share its outcome.
    pub async fn refresh(&self) -> Result<u64, RefreshError> {
        let in_flight = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(running) => running.clone(),
                None => {
                    let inner = self.inner.clone();
                    let rebuild = async move {
                        let result = inner.rebuild().await;
                        inner.in_flight.lock().take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(rebuild.clone());
                    rebuild
                }
            }
        };
        in_flight.await
    }
}

impl Inner {
    async fn rebuild(&self) -> Result<u64, RefreshError> {
        let started = Instant::now();

        let permissions = self.sources.acl.load().await.map_err(|e| {
            tracing::warn!(error = %e, "acl source failed, keeping previous state");
            RefreshError::AclSource(e.to_string())
        })?;
        let specs = self.sources.repositories.enumerate().await.map_err(|e| {
            tracing::warn!(error = %e, "repository enumeration failed, keeping previous state");
            RefreshError::Repositories(e.to_string())
        })?;

        let loaded: Vec<Repository> = futures::stream::iter(specs)
            .map(|spec| self.load_repository(spec))
            .buffered(LOAD_CONCURRENCY)
            .collect()
            .await;

        let mut repositories = BTreeMap::new();
        for repository in loaded {
            let name = repository.name().to_string();
            if repositories
                .insert(name.clone(), Arc::new(repository))
                .is_some()
            {
                tracing::warn!(repository = %name, "duplicate repository name, keeping the later one");
            }
        }

        let draft = LiveState::new(0, repositories, permissions, SystemTime::now());
        let current = self.live.read().clone();
        if draft.same_content(&current) {
            tracing::debug!(
                generation = current.generation(),
                "refresh found no changes"
            );
            return Ok(current.generation());
        }

        let repository_count = draft.repository_count();
        let generation = {
            let mut live = self.live.write();
            let next = live.generation() + 1;
            *live = Arc::new(draft.with_generation(next));
            next
        };
        self.cache.invalidate_generation(generation);

        tracing::info!(
            generation,
            repositories = repository_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "live state refreshed"
        );
        Ok(generation)
    }

    async fn load_repository(&self, spec: RepositorySpec) -> Repository {
        match self.sources.backends.open(&spec) {
            Ok(backend) => Repository::load(&spec, backend, self.expose_tags).await,
            Err(e) => {
                tracing::warn!(repository = %spec.name, error = %e, "cannot open backend");
                Repository::unavailable(&spec, e.to_string())
            }
        }
    }
}
