use tokio::io::AsyncWriteExt;

use crate::node::store::{pretty_bytes, ChunkStore};

async fn write_file(path: &std::path::Path, contents: &[u8]) {
    let mut file = tokio::fs::File::create(path).await.unwrap();
    file.write_all(contents).await.unwrap();
    file.flush().await.unwrap();
}

// ============================================================
// STARTUP SWEEP
// ============================================================

#[tokio::test]
async fn open_creates_missing_directory() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("chunks");

    let store = ChunkStore::open(&dir, 1000).await.unwrap();
    assert!(dir.is_dir());
    assert_eq!(store.used(), 0);
}

#[tokio::test]
async fn open_sweeps_tmp_files_and_recounts_used() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path();

    // One orphaned tmp file from a crash, one committed 17-byte chunk.
    write_file(&dir.join("a.tmp"), b"leftover").await;
    write_file(&dir.join("b"), b"seventeen bytes!!").await;

    let store = ChunkStore::open(dir, 1000).await.unwrap();

    assert!(!dir.join("a.tmp").exists());
    assert!(dir.join("b").exists());
    assert_eq!(store.used(), 17);
}

#[tokio::test]
async fn open_caps_used_at_limit() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path();
    write_file(&dir.join("big"), &[0u8; 64]).await;

    let store = ChunkStore::open(dir, 10).await.unwrap();
    assert_eq!(store.used(), 10);
}

// ============================================================
// SEGMENT LIFECYCLE
// ============================================================

#[tokio::test]
async fn commit_promotes_tmp_to_final_name() {
    let root = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(root.path(), 1000).await.unwrap();

    let tmp = store.tmp_path();
    assert!(tmp.to_string_lossy().ends_with(".tmp"));
    write_file(&tmp, b"chunk bytes").await;
    store.add_used(11);

    let target = store
        .commit("deadbeef", &tmp.to_string_lossy())
        .await
        .unwrap();

    assert!(!tmp.exists());
    assert_eq!(target, store.chunk_path("deadbeef"));
    assert_eq!(tokio::fs::read(&target).await.unwrap(), b"chunk bytes");
    assert_eq!(store.used(), 11);
}

#[tokio::test]
async fn commit_of_missing_tmp_fails() {
    let root = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(root.path(), 1000).await.unwrap();

    let gone = store.tmp_path();
    assert!(store
        .commit("deadbeef", &gone.to_string_lossy())
        .await
        .is_err());
}

#[tokio::test]
async fn rollback_of_tmp_file_frees_its_bytes() {
    let root = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(root.path(), 1000).await.unwrap();

    let tmp = store.tmp_path();
    write_file(&tmp, b"0123456789").await;
    store.add_used(10);

    let freed = store
        .rollback("deadbeef", &tmp.to_string_lossy())
        .await
        .unwrap();

    assert_eq!(freed, 10);
    assert!(!tmp.exists());
    assert_eq!(store.used(), 0);
}

#[tokio::test]
async fn rollback_falls_back_to_committed_name() {
    // A rollback after a successful commit: the tmp path is gone, the chunk
    // lives under its final name.
    let root = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(root.path(), 1000).await.unwrap();

    let tmp = store.tmp_path();
    write_file(&tmp, b"abcde").await;
    store.add_used(5);
    store.commit("cafebabe", &tmp.to_string_lossy()).await.unwrap();

    let freed = store
        .rollback("cafebabe", &tmp.to_string_lossy())
        .await
        .unwrap();

    assert_eq!(freed, 5);
    assert!(!store.chunk_path("cafebabe").exists());
    assert_eq!(store.used(), 0);
}

#[tokio::test]
async fn rollback_of_missing_target_fails() {
    let root = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(root.path(), 1000).await.unwrap();

    assert!(store.rollback("nothere", "").await.is_err());
}

#[tokio::test]
async fn sub_used_saturates_at_zero() {
    let root = tempfile::tempdir().unwrap();
    let store = ChunkStore::open(root.path(), 1000).await.unwrap();

    store.add_used(3);
    store.sub_used(100);
    assert_eq!(store.used(), 0);
}

// ============================================================
// FORMATTING
// ============================================================

#[test]
fn pretty_bytes_formats_each_magnitude() {
    assert_eq!(pretty_bytes(0), "0 B");
    assert_eq!(pretty_bytes(1023), "1023 B");
    assert_eq!(pretty_bytes(1024), "1.0 KB");
    assert_eq!(pretty_bytes(1536), "1.5 KB");
    assert_eq!(pretty_bytes(10 * 1024 * 1024 * 1024), "10.0 GB");
}
