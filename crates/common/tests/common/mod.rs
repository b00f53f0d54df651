//! Shared fixtures: in-memory repositories and swappable sources.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ::common::object_store::{
    BackendError, MemoryBackend, MemoryFile, ObjectBackend, ObjectId,
};
use ::common::prelude::*;
use async_trait::async_trait;
use parking_lot::Mutex;

pub const GUIDE: &str = "Hello guide\n";
pub const MAIN_TIME: i64 = 1_700_000_000;

/// ACL source whose table (or failure) tests can swap between refreshes.
#[derive(Debug)]
pub struct TestAcl {
    table: Mutex<PermissionTable>,
    failing: AtomicBool,
}

impl TestAcl {
    pub fn new(table: PermissionTable) -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(table),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set(&self, table: PermissionTable) {
        *self.table.lock() = table;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AclSource for TestAcl {
    async fn load(&self) -> Result<PermissionTable, SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Io {
                path: "/etc/gbfs/acl.toml".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "unreadable"),
            });
        }
        Ok(self.table.lock().clone())
    }
}

/// Repository list tests can change between refreshes.
#[derive(Debug, Default)]
pub struct TestRepositories {
    specs: Mutex<Vec<RepositorySpec>>,
}

impl TestRepositories {
    pub fn set(&self, specs: Vec<RepositorySpec>) {
        *self.specs.lock() = specs;
    }
}

#[async_trait]
impl RepositorySource for TestRepositories {
    async fn enumerate(&self) -> Result<Vec<RepositorySpec>, SourceError> {
        Ok(self.specs.lock().clone())
    }
}

/// Hands out the memory backend registered under each repository name.
#[derive(Debug, Default)]
pub struct MemoryFactory {
    backends: Mutex<HashMap<String, MemoryBackend>>,
}

impl MemoryFactory {
    pub fn register(&self, name: &str, backend: MemoryBackend) {
        self.backends.lock().insert(name.to_string(), backend);
    }
}

impl BackendFactory for MemoryFactory {
    fn open(&self, spec: &RepositorySpec) -> Result<Arc<dyn ObjectBackend>, BackendError> {
        match self.backends.lock().get(&spec.name) {
            Some(backend) => Ok(Arc::new(backend.clone())),
            None => Err(BackendError::unavailable(format!(
                "no backend registered for {}",
                spec.name
            ))),
        }
    }
}

pub struct Fixture {
    pub engine: FsEngine,
    pub acl: Arc<TestAcl>,
    pub repositories: Arc<TestRepositories>,
    pub factory: Arc<MemoryFactory>,
    pub demo: MemoryBackend,
    pub demo_main: ObjectId,
}

impl Fixture {
    pub async fn refresh(&self) -> u64 {
        self.engine.refresh().await.expect("refresh should succeed")
    }
}

pub fn path(p: &str) -> VirtualPath {
    VirtualPath::parse(p).expect("valid path")
}

pub fn alice() -> Caller {
    Caller::new("alice")
}

pub fn bob() -> Caller {
    Caller::new("bob")
}

/// Default permissions:
/// - `demo` readable by everyone
/// - `secret` readable by alice only
/// - `team/api` and `team/web` readable by the `devs` group (alice)
pub fn default_acl() -> PermissionTable {
    AclBuilder::new()
        .group("devs", ["alice"])
        .grant(ALL_USERS, "demo", Access::Read)
        .grant("alice", "secret", Access::Read)
        .grant("@devs", "team/api", Access::Read)
        .grant("@devs", "team/web", Access::Read)
        .build()
}

/// `demo` with branches `main` and `feature/x` and tag `v1`:
///
/// ```text
/// README          "demo\n"
/// bin/run.sh      executable
/// docs/guide.txt  GUIDE (12 bytes)
/// latest          -> docs/guide.txt
/// vendor/lib      submodule
/// ```
pub fn demo_backend() -> (MemoryBackend, ObjectId) {
    let backend = MemoryBackend::new();
    let main = backend.commit(
        &[
            ("README", MemoryFile::text("demo\n")),
            ("bin/run.sh", MemoryFile::executable("#!/bin/sh\necho demo\n")),
            ("docs/guide.txt", MemoryFile::text(GUIDE)),
            ("latest", MemoryFile::symlink("docs/guide.txt")),
            (
                "vendor/lib",
                MemoryFile::Submodule(ObjectId::from([0x42; 20])),
            ),
        ],
        MAIN_TIME,
    );
    let feature = backend.commit(&[("NOTES", MemoryFile::text("wip\n"))], MAIN_TIME + 60);
    backend.set_ref("refs/heads/main", main);
    backend.set_ref("refs/heads/feature/x", feature);
    backend.annotated_tag("v1", main);
    (backend, main)
}

fn small_repo(content: &str) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let commit = backend.commit(&[("README", MemoryFile::text(content))], MAIN_TIME);
    backend.set_ref("refs/heads/main", commit);
    backend
}

pub fn default_specs() -> Vec<RepositorySpec> {
    ["demo", "secret", "team/api", "team/web"]
        .into_iter()
        .map(|name| RepositorySpec::new(name, format!("/srv/git/{name}.git")))
        .collect()
}

pub fn setup_with_config(config: EngineConfig) -> Fixture {
    let (demo, demo_main) = demo_backend();
    let factory = Arc::new(MemoryFactory::default());
    factory.register("demo", demo.clone());
    factory.register("secret", small_repo("classified\n"));
    factory.register("team/api", small_repo("api\n"));
    factory.register("team/web", small_repo("web\n"));

    let acl = TestAcl::new(default_acl());
    let repositories = Arc::new(TestRepositories::default());
    repositories.set(default_specs());

    let engine = FsEngine::new(
        Sources {
            acl: acl.clone(),
            repositories: repositories.clone(),
            backends: factory.clone(),
        },
        config,
    );

    Fixture {
        engine,
        acl,
        repositories,
        factory,
        demo,
        demo_main,
    }
}

/// Fixture with the default configuration, already refreshed once.
pub async fn setup() -> Fixture {
    let fixture = setup_with_config(EngineConfig::default());
    fixture.refresh().await;
    fixture
}

pub fn names(entries: &[DirEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}
