//! End-to-end synchronization tests over local volumes
//!
//! These exercise the whole pipeline — scan, map, plan, execute — the way
//! a caller would, and pin down the engine's observable guarantees:
//! idempotence, convergence, mode correctness, quick-check behavior and
//! conflict safety.

use std::fs;
use tempfile::TempDir;

use volsync_engine::{sync_local, SyncEngine};
use volsync_tests::test_utils::{local, read_file, rel, set_mtime, tree_paths, write_file};
use volsync_types::{Error, SyncMode, SyncOptions, SyncStatus};

fn source_tree(tmp: &TempDir) -> std::path::PathBuf {
    let root = tmp.path().join("project");
    write_file(&root.join("readme.md"), b"hello");
    write_file(&root.join("src/main.rs"), b"fn main() {}");
    write_file(&root.join("src/lib.rs"), b"pub fn lib() {}");
    write_file(&root.join("assets/logo.bin"), &[0u8; 2048]);
    root
}

#[tokio::test]
async fn fresh_merge_copies_everything() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");

    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, SyncStatus::Done);
    assert!(result.errors.is_empty());
    assert_eq!(result.counts.files_copied, 4);
    assert_eq!(result.bytes_transferred, 5 + 12 + 15 + 2048);
    assert_eq!(tree_paths(&source).await, tree_paths(&target).await);
    assert_eq!(read_file(&target.join("src/main.rs")), b"fn main() {}");
}

#[tokio::test]
async fn second_run_is_all_skips() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");

    sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();
    let second = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(second.counts.total_changes(), 0);
    assert!(second.counts.skipped > 0);
    assert!(second.errors.is_empty());
}

#[tokio::test]
async fn mirror_converges_target_onto_source() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");
    write_file(&target.join("stale.txt"), b"old");
    write_file(&target.join("stale-dir/deep/file.txt"), b"old");

    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::mirror())
        .await
        .unwrap();

    assert_eq!(result.status, SyncStatus::Done);
    assert!(result.counts.files_deleted >= 2);
    assert!(result.counts.dirs_deleted >= 2);
    assert_eq!(tree_paths(&source).await, tree_paths(&target).await);
}

#[tokio::test]
async fn nest_introduces_exactly_one_wrapper() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");
    fs::create_dir(&target).unwrap();
    write_file(&target.join("existing.txt"), b"keep me");

    sync_local(&source, &target, SyncMode::Nest, SyncOptions::default())
        .await
        .unwrap();

    let paths = tree_paths(&target).await;
    let top_level: Vec<&String> = paths.iter().filter(|p| !p.contains('/')).collect();
    assert_eq!(top_level, vec!["existing.txt", "project"]);
    assert_eq!(read_file(&target.join("project/readme.md")), b"hello");
}

#[tokio::test]
async fn merge_never_reproduces_the_source_root_name() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");

    sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    assert!(!target.join("project").exists());
    assert!(target.join("readme.md").exists());
}

#[tokio::test]
async fn quick_check_trusts_matching_size_and_mtime() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("src");
    let target = tmp.path().join("dst");
    write_file(&source.join("f.txt"), b"AAAA");
    write_file(&target.join("f.txt"), b"BBBB");
    set_mtime(&source.join("f.txt"), 1_700_000_000);
    set_mtime(&target.join("f.txt"), 1_700_000_000);

    // same size, same mtime: assumed identical without reading content
    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(result.counts.files_updated, 0);
    assert_eq!(result.fingerprints_computed, 0);
    assert_eq!(read_file(&target.join("f.txt")), b"BBBB");

    // ignore_times forces the fingerprint compare and catches the drift
    let options = SyncOptions {
        ignore_times: true,
        ..SyncOptions::default()
    };
    let result = sync_local(&source, &target, SyncMode::Merge, options)
        .await
        .unwrap();
    assert_eq!(result.counts.files_updated, 1);
    assert!(result.fingerprints_computed >= 2);
    assert_eq!(read_file(&target.join("f.txt")), b"AAAA");
}

#[tokio::test]
async fn changed_mtime_with_equal_content_stays_skipped() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("src");
    let target = tmp.path().join("dst");
    write_file(&source.join("f.txt"), b"same bytes");
    write_file(&target.join("f.txt"), b"same bytes");
    set_mtime(&source.join("f.txt"), 1_700_000_000);
    set_mtime(&target.join("f.txt"), 1_700_009_999);

    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    // mtimes differ, so fingerprints were compared and proved equality
    assert_eq!(result.counts.files_updated, 0);
    assert!(result.fingerprints_computed >= 2);
}

#[tokio::test]
async fn conflict_without_force_leaves_target_untouched() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("src");
    let target = tmp.path().join("dst");
    write_file(&source.join("thing"), b"i am a file");
    write_file(&target.join("thing/nested.txt"), b"i live in a dir");

    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    assert!(matches!(result.errors[0].error, Error::Conflict { .. }));
    assert!(target.join("thing").is_dir());
    assert_eq!(read_file(&target.join("thing/nested.txt")), b"i live in a dir");
}

#[tokio::test]
async fn force_replaces_type_mismatches() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("src");
    let target = tmp.path().join("dst");
    write_file(&source.join("thing"), b"i am a file");
    write_file(&target.join("thing/nested.txt"), b"doomed");

    let options = SyncOptions {
        force: true,
        ..SyncOptions::default()
    };
    let result = sync_local(&source, &target, SyncMode::Merge, options)
        .await
        .unwrap();

    assert!(result.errors.is_empty());
    assert!(target.join("thing").is_file());
    assert_eq!(read_file(&target.join("thing")), b"i am a file");
}

#[tokio::test]
async fn missing_target_parent_aborts_without_parents_option() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("deep/ly/nested/backup");

    let aborted = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(aborted.error, Error::ParentMissing { .. }));
    assert_eq!(aborted.partial.status, SyncStatus::Aborted);

    let options = SyncOptions {
        parents: true,
        ..SyncOptions::default()
    };
    let result = sync_local(&source, &target, SyncMode::Merge, options)
        .await
        .unwrap();
    assert_eq!(result.status, SyncStatus::Done);
    assert!(target.join("readme.md").exists());
}

#[tokio::test]
async fn missing_source_aborts_with_partial_result() {
    let tmp = TempDir::new().unwrap();
    let aborted = sync_local(
        tmp.path().join("nope"),
        tmp.path().join("dst"),
        SyncMode::Merge,
        SyncOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(aborted.error, Error::Scan { .. }));
    assert_eq!(aborted.partial.status, SyncStatus::Aborted);
    assert_eq!(aborted.partial.counts.total_changes(), 0);
}

#[tokio::test]
async fn cancellation_marks_the_run_cancelled() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");

    let engine = SyncEngine::new(SyncOptions::default());
    engine.cancellation_token().cancel();
    let result = engine
        .sync(local(&source), local(&target), SyncMode::Merge)
        .await
        .unwrap();

    assert_eq!(result.status, SyncStatus::Cancelled);
    assert!(!target.join("readme.md").exists());
}

#[tokio::test]
async fn single_file_merge_writes_the_target_path() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("notes.txt");
    write_file(&source, b"just one file");
    let target = tmp.path().join("copy.txt");

    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(result.counts.files_copied, 1);
    assert_eq!(read_file(&target), b"just one file");
}

#[tokio::test]
async fn single_file_nest_lands_inside_the_target_dir() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("notes.txt");
    write_file(&source, b"just one file");
    let target = tmp.path().join("inbox");

    sync_local(&source, &target, SyncMode::Nest, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(read_file(&target.join("notes.txt")), b"just one file");
}

#[tokio::test]
async fn excludes_keep_subtrees_out() {
    let tmp = TempDir::new().unwrap();
    let source = source_tree(&tmp);
    let target = tmp.path().join("backup");

    let options = SyncOptions {
        excludes: vec![rel("assets")],
        ..SyncOptions::default()
    };
    sync_local(&source, &target, SyncMode::Merge, options)
        .await
        .unwrap();

    assert!(target.join("src/main.rs").exists());
    assert!(!target.join("assets").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinks_are_copied_as_links() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("src");
    let target = tmp.path().join("dst");
    write_file(&source.join("real.txt"), b"pointed at");
    std::os::unix::fs::symlink("real.txt", source.join("link")).unwrap();

    let result = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    assert!(result.errors.is_empty());
    let copied = target.join("link");
    assert!(copied.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(
        fs::read_link(&copied).unwrap().to_string_lossy(),
        "real.txt"
    );
    assert_eq!(read_file(&target.join("real.txt")), b"pointed at");
}

#[tokio::test]
async fn updates_preserve_source_mtime_for_the_next_quick_check() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("src");
    let target = tmp.path().join("dst");
    write_file(&source.join("f.txt"), b"version two!");
    set_mtime(&source.join("f.txt"), 1_700_000_000);

    sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();

    // the copy restored the source mtime, so the next run quick-checks
    let second = sync_local(&source, &target, SyncMode::Merge, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(second.counts.total_changes(), 0);
    assert_eq!(second.fingerprints_computed, 0);
}
