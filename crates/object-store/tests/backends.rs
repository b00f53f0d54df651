//! Both on-disk backends against a bare repository built with libgit2.
//!
//! The git command line tests are skipped with a warning when `git` is not
//! on PATH.

use std::path::Path;
use std::process::Command as StdCommand;

use object_store::{
    open_backend, BackendError, BackendKind, BackendOptions, EntryKind, ObjectBackend, ObjectId,
};

const COMMIT_TIME: i64 = 1_700_000_000;

struct Fixture {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
    main: git2::Oid,
    readme: git2::Oid,
}

fn signature() -> git2::Signature<'static> {
    git2::Signature::new("Test", "test@example.com", &git2::Time::new(COMMIT_TIME, 0)).unwrap()
}

/// Build `demo.git` with:
///
/// ```text
/// README            "hello\n"
/// docs/guide.txt    "0123456789\n\n"
/// run.sh            executable
/// latest            -> README
/// ```
///
/// plus `refs/heads/main`, `refs/heads/feature/x`, a lightweight tag `v1`
/// and an annotated tag `v2`.
fn build_repo() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.git");
    let repo = git2::Repository::init_bare(&path).unwrap();

    let readme = repo.blob(b"hello\n").unwrap();
    let guide = repo.blob(b"0123456789\n\n").unwrap();
    let script = repo.blob(b"#!/bin/sh\necho hi\n").unwrap();
    let link = repo.blob(b"README").unwrap();

    let mut docs = repo.treebuilder(None).unwrap();
    docs.insert("guide.txt", guide, 0o100644).unwrap();
    let docs = docs.write().unwrap();

    let mut root = repo.treebuilder(None).unwrap();
    root.insert("README", readme, 0o100644).unwrap();
    root.insert("docs", docs, 0o040000).unwrap();
    root.insert("run.sh", script, 0o100755).unwrap();
    root.insert("latest", link, 0o120000).unwrap();
    let root = root.write().unwrap();
    let tree = repo.find_tree(root).unwrap();

    let sig = signature();
    let main = repo
        .commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
    repo.reference("refs/heads/feature/x", main, true, "branch")
        .unwrap();
    repo.reference("refs/tags/v1", main, true, "lightweight tag")
        .unwrap();
    let commit = repo.find_object(main, None).unwrap();
    repo.tag("v2", &commit, &sig, "annotated", false).unwrap();

    Fixture {
        _dir: dir,
        path,
        main,
        readme,
    }
}

fn git_available() -> bool {
    let found = StdCommand::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !found {
        eprintln!("\n\x1b[33mwarning\x1b[0m: Skipping git command line backend test: `git` not found on PATH.\n");
    }
    found
}

fn backends(path: &Path) -> Vec<std::sync::Arc<dyn ObjectBackend>> {
    let options = BackendOptions::default();
    let mut out = vec![open_backend(BackendKind::Native, path, &options).unwrap()];
    if git_available() {
        out.push(open_backend(BackendKind::GitCli, path, &options).unwrap());
    }
    out
}

#[tokio::test]
async fn test_list_refs() {
    let fixture = build_repo();
    for backend in backends(&fixture.path) {
        let mut names: Vec<_> = backend
            .list_refs()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "refs/heads/feature/x",
                "refs/heads/main",
                "refs/tags/v1",
                "refs/tags/v2",
            ],
            "backend {}",
            backend.kind()
        );
    }
}

#[tokio::test]
async fn test_resolve_ref_peels_annotated_tag() {
    let fixture = build_repo();
    let main = ObjectId::from(fixture.main);
    for backend in backends(&fixture.path) {
        let head = backend.resolve_ref("refs/heads/main").await.unwrap();
        assert_eq!(head.id, main);
        assert_eq!(head.commit_time, COMMIT_TIME);

        let tag = backend.resolve_ref("refs/tags/v2").await.unwrap();
        assert_eq!(tag.id, main, "backend {}", backend.kind());

        let missing = backend.resolve_ref("refs/heads/nope").await;
        assert_eq!(missing, Err(BackendError::NotFound));
    }
}

#[tokio::test]
async fn test_resolve_refs_reports_each_ref() {
    let fixture = build_repo();
    for backend in backends(&fixture.path) {
        let names = vec![
            "refs/heads/main".to_string(),
            "refs/heads/gone".to_string(),
            "refs/tags/v1".to_string(),
        ];
        let results = backend.resolve_refs(&names).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(BackendError::NotFound));
        assert!(results[2].is_ok());
    }
}

#[tokio::test]
async fn test_tree_listing_and_kinds() {
    let fixture = build_repo();
    for backend in backends(&fixture.path) {
        let head = backend.resolve_ref("refs/heads/main").await.unwrap();
        let entries = backend.get_tree(&head.tree).await.unwrap();
        let summary: Vec<_> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.kind, e.mode_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("README", EntryKind::Blob { executable: false }, "100644".to_string()),
                ("docs", EntryKind::Tree, "040000".to_string()),
                ("latest", EntryKind::Symlink, "120000".to_string()),
                ("run.sh", EntryKind::Blob { executable: true }, "100755".to_string()),
            ],
            "backend {}",
            backend.kind()
        );
    }
}

#[tokio::test]
async fn test_blob_content_and_size() {
    let fixture = build_repo();
    let readme = ObjectId::from(fixture.readme);
    for backend in backends(&fixture.path) {
        let blob = backend.get_blob(&readme).await.unwrap();
        assert_eq!(blob.declared_len, 6);
        assert_eq!(blob.verified().unwrap().as_ref(), b"hello\n");
        assert_eq!(backend.blob_size(&readme).await.unwrap(), 6);

        let bogus = ObjectId::from([0xab; 20]);
        assert_eq!(backend.get_blob(&bogus).await.unwrap_err(), BackendError::NotFound);
    }
}

async fn assert_ranges(backend: &dyn ObjectBackend, readme: &ObjectId) {
    let kind = backend.kind();
    assert_eq!(backend.read_blob(readme, 1, 3).await.unwrap(), &b"ell"[..], "{kind}");
    assert_eq!(backend.read_blob(readme, 4, 100).await.unwrap(), &b"o\n"[..], "{kind}");
    assert!(backend.read_blob(readme, 6, 10).await.unwrap().is_empty(), "{kind}");

    let bogus = ObjectId::from([0xab; 20]);
    assert_eq!(
        backend.read_blob(&bogus, 0, 1).await.unwrap_err(),
        BackendError::NotFound,
        "{kind}"
    );
}

#[tokio::test]
async fn test_blob_ranges() {
    let fixture = build_repo();
    let readme = ObjectId::from(fixture.readme);
    for backend in backends(&fixture.path) {
        assert_ranges(backend.as_ref(), &readme).await;

        let main = ObjectId::from(fixture.main);
        assert!(matches!(
            backend.read_blob(&main, 0, 1).await,
            Err(BackendError::Corrupt(_))
        ));
    }
}

#[tokio::test]
async fn test_blob_ranges_from_packfile() {
    let fixture = build_repo();
    if !git_available() {
        return;
    }
    let status = StdCommand::new("git")
        .arg("--git-dir")
        .arg(&fixture.path)
        .args(["repack", "-a", "-d", "-q"])
        .status()
        .unwrap();
    assert!(status.success());
    for entry in std::fs::read_dir(fixture.path.join("objects")).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name();
        if name.len() == 2 {
            std::fs::remove_dir_all(entry.path()).unwrap();
        }
    }

    let readme = ObjectId::from(fixture.readme);
    for backend in backends(&fixture.path) {
        assert_ranges(backend.as_ref(), &readme).await;
    }
}

#[tokio::test]
async fn test_wrong_object_type_is_corrupt() {
    let fixture = build_repo();
    let readme = ObjectId::from(fixture.readme);
    for backend in backends(&fixture.path) {
        let result = backend.get_tree(&readme).await;
        assert!(
            matches!(result, Err(BackendError::Corrupt(_))),
            "backend {} returned {:?}",
            backend.kind(),
            result
        );
    }
}

#[tokio::test]
async fn test_removed_repository_is_unavailable() {
    let fixture = build_repo();
    let path = fixture.path.clone();
    let options = BackendOptions::default();
    let backend = open_backend(BackendKind::GitCli, &path, &options).unwrap();
    std::fs::remove_dir_all(&path).unwrap();
    let result = backend.list_refs().await;
    assert!(matches!(result, Err(BackendError::Unavailable(_))));
}
