//! Integration tests for path resolution, listing and reading

mod common;

use std::time::{Duration, SystemTime};

use ::common::prelude::*;
use common::{alice, bob, names, path, setup, setup_with_config, GUIDE, MAIN_TIME};

#[tokio::test]
async fn test_guide_lookup_and_partial_reads() {
    let fx = setup().await;
    let caller = alice();

    let entry = fx
        .engine
        .lookup(&caller, &path("demo/main/docs"), "guide.txt")
        .await
        .unwrap();
    assert_eq!(entry.attr.file_type, FileType::RegularFile);
    assert_eq!(entry.attr.size, 12);

    let fh = fx
        .engine
        .open(&caller, &path("demo/main/docs/guide.txt"), false)
        .await
        .unwrap();
    let all = fx.engine.read(fh, 0, 12).await.unwrap();
    assert_eq!(all.as_ref(), GUIDE.as_bytes());

    let tail = fx.engine.read(fh, 10, 12).await.unwrap();
    assert_eq!(tail.as_ref(), &GUIDE.as_bytes()[10..]);
    assert_eq!(tail.len(), 2);

    let past_end = fx.engine.read(fh, 12, 100).await.unwrap();
    assert!(past_end.is_empty());

    fx.engine.release(fh);
}

#[tokio::test]
async fn test_readdir_keeps_tree_order() {
    let fx = setup().await;
    let caller = alice();

    let docs = fx
        .engine
        .readdir(&caller, &path("demo/main/docs"))
        .await
        .unwrap();
    assert_eq!(
        docs,
        vec![DirEntry {
            name: "guide.txt".to_string(),
            file_type: FileType::RegularFile
        }]
    );

    let root = fx.engine.readdir(&caller, &path("demo/main")).await.unwrap();
    let summary: Vec<_> = root.iter().map(|e| (e.name.as_str(), e.file_type)).collect();
    assert_eq!(
        summary,
        vec![
            ("README", FileType::RegularFile),
            ("bin", FileType::Directory),
            ("docs", FileType::Directory),
            ("latest", FileType::Symlink),
            ("vendor", FileType::Directory),
        ]
    );
}

#[tokio::test]
async fn test_root_and_grouping_directories() {
    let fx = setup().await;
    let caller = alice();

    let root = fx.engine.readdir(&caller, &path("/")).await.unwrap();
    assert_eq!(names(&root), vec!["demo", "secret", "team"]);
    assert!(root.iter().all(|e| e.file_type == FileType::Directory));

    let team = fx.engine.readdir(&caller, &path("team")).await.unwrap();
    assert_eq!(names(&team), vec!["api", "web"]);

    let api = fx
        .engine
        .getattr(&caller, &path("team/api/main/README"))
        .await
        .unwrap();
    assert_eq!(api.size, 4);
}

#[tokio::test]
async fn test_refs_and_ref_groups() {
    let fx = setup().await;
    let caller = bob();

    let refs = fx.engine.readdir(&caller, &path("demo")).await.unwrap();
    assert_eq!(names(&refs), vec!["feature", "main", "v1"]);

    let feature = fx.engine.readdir(&caller, &path("demo/feature")).await.unwrap();
    assert_eq!(names(&feature), vec!["x"]);

    let notes = fx
        .engine
        .readdir(&caller, &path("demo/feature/x"))
        .await
        .unwrap();
    assert_eq!(names(&notes), vec!["NOTES"]);

    // Annotated tag peels to the same tree as main.
    let tagged = fx
        .engine
        .getattr(&caller, &path("demo/v1/docs/guide.txt"))
        .await
        .unwrap();
    assert_eq!(tagged.size, 12);
}

#[tokio::test]
async fn test_modes_and_times() {
    let fx = setup().await;
    let caller = alice();

    let readme = fx
        .engine
        .getattr(&caller, &path("demo/main/README"))
        .await
        .unwrap();
    assert_eq!(readme.perm, 0o664);
    assert_eq!(readme.nlink, 1);
    assert_eq!(
        readme.mtime,
        SystemTime::UNIX_EPOCH + Duration::from_secs(MAIN_TIME as u64)
    );

    let script = fx
        .engine
        .getattr(&caller, &path("demo/main/bin/run.sh"))
        .await
        .unwrap();
    assert_eq!(script.perm, 0o775);

    let docs = fx
        .engine
        .getattr(&caller, &path("demo/main/docs"))
        .await
        .unwrap();
    assert_eq!(docs.file_type, FileType::Directory);
    assert_eq!(docs.size, 4096);
    assert_eq!(docs.perm, 0o775);

    let link = fx
        .engine
        .getattr(&caller, &path("demo/main/latest"))
        .await
        .unwrap();
    assert_eq!(link.file_type, FileType::Symlink);
    assert_eq!(link.perm, 0o777);
    assert_eq!(link.size, "docs/guide.txt".len() as u64);
}

#[tokio::test]
async fn test_symlink_and_submodule() {
    let fx = setup().await;
    let caller = alice();

    let target = fx
        .engine
        .readlink(&caller, &path("demo/main/latest"))
        .await
        .unwrap();
    assert_eq!(target.as_ref(), b"docs/guide.txt");

    assert_eq!(
        fx.engine
            .readlink(&caller, &path("demo/main/README"))
            .await
            .unwrap_err(),
        FsError::NotASymlink
    );

    let module = fx
        .engine
        .getattr(&caller, &path("demo/main/vendor/lib"))
        .await
        .unwrap();
    assert_eq!(module.file_type, FileType::Directory);
    let listing = fx
        .engine
        .readdir(&caller, &path("demo/main/vendor/lib"))
        .await
        .unwrap();
    assert!(listing.is_empty());
    assert_eq!(
        fx.engine
            .getattr(&caller, &path("demo/main/vendor/lib/anything"))
            .await
            .unwrap_err(),
        FsError::NotFound
    );
}

#[tokio::test]
async fn test_missing_paths() {
    let fx = setup().await;
    let caller = alice();

    for missing in [
        "nope",
        "demo/nope",
        "demo/main/nope",
        "demo/main/docs/nope.txt",
        "team/nope",
        "demo/feature/y",
    ] {
        assert_eq!(
            fx.engine.getattr(&caller, &path(missing)).await.unwrap_err(),
            FsError::NotFound,
            "{missing}"
        );
    }

    assert_eq!(
        fx.engine
            .getattr(&caller, &path("demo/main/README/child"))
            .await
            .unwrap_err(),
        FsError::NotADirectory
    );
    assert_eq!(
        fx.engine
            .readdir(&caller, &path("demo/main/README"))
            .await
            .unwrap_err(),
        FsError::NotADirectory
    );
}

#[tokio::test]
async fn test_open_rules() {
    let fx = setup().await;
    let caller = alice();

    assert_eq!(
        fx.engine
            .open(&caller, &path("demo/main/docs"), false)
            .await
            .unwrap_err(),
        FsError::IsADirectory
    );
    assert_eq!(
        fx.engine
            .open(&caller, &path("demo/main/README"), true)
            .await
            .unwrap_err(),
        FsError::PermissionDenied
    );
    assert_eq!(
        fx.engine
            .open(&caller, &path("demo/main/missing"), false)
            .await
            .unwrap_err(),
        FsError::NotFound
    );
    assert_eq!(fx.engine.open_files(), 0);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let fx = setup().await;
    let fh = fx
        .engine
        .open(&alice(), &path("demo/main/README"), false)
        .await
        .unwrap();
    assert_eq!(fx.engine.open_files(), 1);

    fx.engine.release(fh);
    fx.engine.release(fh);
    assert_eq!(fx.engine.open_files(), 0);
    assert_eq!(fx.engine.read(fh, 0, 10).await.unwrap_err(), FsError::BadHandle);
}

#[tokio::test]
async fn test_open_file_limit() {
    let fx = setup_with_config(EngineConfig {
        max_open_files: 2,
        ..EngineConfig::default()
    });
    fx.refresh().await;
    let caller = alice();
    let readme = path("demo/main/README");

    let first = fx.engine.open(&caller, &readme, false).await.unwrap();
    fx.engine.open(&caller, &readme, false).await.unwrap();
    assert_eq!(
        fx.engine.open(&caller, &readme, false).await.unwrap_err(),
        FsError::TooManyOpenFiles
    );

    fx.engine.release(first);
    assert!(fx.engine.open(&caller, &readme, false).await.is_ok());
}

#[tokio::test]
async fn test_repeated_reads_are_identical() {
    let fx = setup().await;
    let caller = alice();
    let guide = path("demo/main/docs/guide.txt");

    let mut reads = Vec::new();
    for _ in 0..3 {
        let fh = fx.engine.open(&caller, &guide, false).await.unwrap();
        reads.push(fx.engine.read(fh, 0, 4096).await.unwrap());
        fx.engine.release(fh);
    }
    assert!(reads.windows(2).all(|w| w[0] == w[1]));

    // Later reads come from the cache.
    assert_eq!(fx.demo.range_reads(), 1);
    assert_eq!(fx.demo.blob_reads(), 0);
}

#[tokio::test]
async fn test_statfs_counts_visible_repositories() {
    let fx = setup().await;
    assert_eq!(fx.engine.statfs(&alice()).files, 4);
    assert_eq!(fx.engine.statfs(&bob()).files, 1);
}
