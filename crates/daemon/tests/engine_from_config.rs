//! The daemon's config wiring against real bare repositories on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::prelude::*;
use gbfs_daemon::config::{AclConfig, StaticRepository};
use gbfs_daemon::{build_engine, spawn_refresh_loop, Config};

const COMMIT_TIME: i64 = 1_700_000_000;

fn signature() -> git2::Signature<'static> {
    git2::Signature::new("Test", "test@example.com", &git2::Time::new(COMMIT_TIME, 0)).unwrap()
}

/// Bare repository at `path` whose `main` holds a single `README`.
fn init_repo(path: &Path, readme: &[u8]) -> git2::Repository {
    let repo = git2::Repository::init_bare(path).unwrap();
    commit_readme(&repo, readme);
    repo
}

/// Point `main` at a new commit whose `README` is `contents`.
fn commit_readme(repo: &git2::Repository, contents: &[u8]) {
    let blob = repo.blob(contents).unwrap();
    let mut root = repo.treebuilder(None).unwrap();
    root.insert("README", blob, 0o100644).unwrap();
    let tree = repo.find_tree(root.write().unwrap()).unwrap();

    let parent = repo
        .find_reference("refs/heads/main")
        .ok()
        .and_then(|r| r.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let sig = signature();
    repo.commit(Some("refs/heads/main"), &sig, &sig, "update", &tree, &parents)
        .unwrap();
}

fn scan_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.repositories.scan.push(root.to_path_buf());
    config
}

async fn read_all(engine: &FsEngine, caller: &Caller, path: &str) -> Vec<u8> {
    let path = VirtualPath::parse(path).unwrap();
    let fh = engine.open(caller, &path, false).await.unwrap();
    let data = engine.read(fh, 0, 1 << 20).await.unwrap();
    engine.release(fh);
    data.to_vec()
}

async fn root_names(engine: &FsEngine, caller: &Caller) -> Vec<String> {
    engine
        .readdir(caller, &VirtualPath::root())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

#[tokio::test]
async fn test_scanned_repositories_are_served() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(&dir.path().join("demo.git"), b"hello\n");
    std::fs::create_dir_all(dir.path().join("team")).unwrap();
    init_repo(&dir.path().join("team/api.git"), b"api\n");

    let engine = build_engine(&scan_config(dir.path()));
    assert_eq!(engine.refresh().await.unwrap(), 1);

    let alice = Caller::new("alice");
    assert_eq!(root_names(&engine, &alice).await, vec!["demo", "team"]);
    assert_eq!(read_all(&engine, &alice, "demo/main/README").await, b"hello\n");
    assert_eq!(read_all(&engine, &alice, "team/api/main/README").await, b"api\n");
}

#[tokio::test]
async fn test_static_repository_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("somewhere.git");
    init_repo(&path, b"static\n");

    let mut config = Config::default();
    config.repositories.static_repos.push(StaticRepository {
        name: "pinned".to_string(),
        path,
        backend: None,
    });
    let engine = build_engine(&config);
    engine.refresh().await.unwrap();

    let alice = Caller::new("alice");
    assert_eq!(root_names(&engine, &alice).await, vec!["pinned"]);
    assert_eq!(read_all(&engine, &alice, "pinned/main/README").await, b"static\n");
}

#[tokio::test]
async fn test_file_acl_hides_repositories() {
    let dir = tempfile::tempdir().unwrap();
    let repos = dir.path().join("repos");
    std::fs::create_dir_all(&repos).unwrap();
    init_repo(&repos.join("demo.git"), b"hello\n");
    init_repo(&repos.join("secret.git"), b"classified\n");

    let acl_path = dir.path().join("acl.toml");
    std::fs::write(
        &acl_path,
        r#"
[groups]
ops = ["carol"]

[repos.demo]
read = ["@all"]

[repos.secret]
read = ["@ops"]
"#,
    )
    .unwrap();

    let mut config = scan_config(&repos);
    config.acl = AclConfig::File { path: acl_path };
    let engine = build_engine(&config);
    engine.refresh().await.unwrap();

    let alice = Caller::new("alice");
    let carol = Caller::new("carol");
    assert_eq!(root_names(&engine, &alice).await, vec!["demo"]);
    assert_eq!(root_names(&engine, &carol).await, vec!["demo", "secret"]);

    let secret = VirtualPath::parse("secret/main/README").unwrap();
    assert!(matches!(
        engine.getattr(&alice, &secret).await,
        Err(FsError::NotFound)
    ));
    assert_eq!(read_all(&engine, &carol, "secret/main/README").await, b"classified\n");
}

#[tokio::test]
async fn test_missing_acl_file_fails_refresh() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(&dir.path().join("demo.git"), b"hello\n");

    let mut config = scan_config(dir.path());
    config.acl = AclConfig::File {
        path: dir.path().join("absent.toml"),
    };
    let engine = build_engine(&config);

    assert!(matches!(
        engine.refresh().await,
        Err(RefreshError::AclSource(_))
    ));
    assert_eq!(engine.generation(), 0);
}

#[tokio::test]
async fn test_triggered_refresh_picks_up_new_commit() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("demo.git"), b"hello\n");

    let mut config = scan_config(dir.path());
    config.refresh_interval_secs = 3600;
    let engine = build_engine(&config);
    engine.refresh().await.unwrap();
    let refresher = spawn_refresh_loop(engine.clone(), config.refresh_interval());

    commit_readme(&repo, b"hello again\n");
    refresher.trigger();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while engine.generation() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "refresh was not triggered"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    refresher.shutdown().await;

    let alice = Caller::new("alice");
    assert_eq!(read_all(&engine, &alice, "demo/main/README").await, b"hello again\n");
}

#[tokio::test]
async fn test_shutdown_stops_refresh_loop() {
    let dir = tempfile::tempdir().unwrap();
    let repo = init_repo(&dir.path().join("demo.git"), b"hello\n");

    let config = scan_config(dir.path());
    let engine = build_engine(&config);
    engine.refresh().await.unwrap();

    let refresher = spawn_refresh_loop(engine.clone(), Duration::from_millis(10));
    refresher.shutdown().await;

    commit_readme(&repo, b"changed\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.generation(), 1);
}
