//! End-to-end upload/download exercises: the manager handlers driven
//! against storage node routers served on ephemeral listeners. Metadata
//! lives in the in-memory store so every record can be inspected.

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Extension, Path};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::routing::{delete, post, put};
use axum::Router;
use sha2::{Digest, Sha256};

use shardstore::manager::handlers as manager_api;
use shardstore::manager::Manager;
use shardstore::metadata::memory::MemoryStore;
use shardstore::metadata::MetadataStore;
use shardstore::node::store::ChunkStore;
use shardstore::node::StorageNode;
use shardstore::protocol::{
    HEADER_ADDR, HEADER_FILENAME, HEADER_HASH, HEADER_LIMIT, HEADER_REGISTER, HEADER_USED,
};

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serves a real storage node on an ephemeral port.
async fn spawn_node(dir: &FsPath, limit: u64) -> (Arc<StorageNode>, u16, String) {
    let store = ChunkStore::open(dir, limit).await.unwrap();
    let node = StorageNode::new(store);
    let app = node.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (node, addr.port(), format!("http://{}", addr))
}

/// Registers a node through the manager's register handler, the same way
/// the registrar does over the wire.
async fn register_node(manager: &Arc<Manager>, port: u16, limit: u64, used: u64) {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_REGISTER, HeaderValue::from_static("true"));
    headers.insert(HEADER_ADDR, format!(":{}", port).parse().unwrap());
    headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
    headers.insert(HEADER_USED, HeaderValue::from(used));
    let peer: SocketAddr = "127.0.0.1:39999".parse().unwrap();
    let (status, body) =
        manager_api::register(Extension(manager.clone()), ConnectInfo(peer), headers).await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
}

async fn put_file(manager: &Arc<Manager>, name: &str, contents: &[u8]) -> (StatusCode, String) {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(contents.len()));
    manager_api::upload(
        Extension(manager.clone()),
        Path(name.to_string()),
        headers,
        Body::from(contents.to_vec()),
    )
    .await
}

async fn get_file(manager: &Arc<Manager>, name: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = manager_api::download(Extension(manager.clone()), Path(name.to_string())).await;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, bytes.to_vec())
}

async fn used_counters(manager: &Arc<Manager>) -> Vec<u64> {
    manager
        .registry
        .snapshot()
        .await
        .iter()
        .map(|record| record.used)
        .collect()
}

/// Rollback runs on a background task; poll until the registry settles.
async fn wait_for_used(manager: &Arc<Manager>, expected: &[u64]) {
    for _ in 0..100 {
        if used_counters(manager).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        used_counters(manager).await,
        expected,
        "rollback never settled"
    );
}

fn chunk_files(dir: &FsPath) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                std::fs::read(entry.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

async fn wait_for_chunk_count(dir: &FsPath, expected: usize) {
    for _ in 0..100 {
        if chunk_files(dir).len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(chunk_files(dir).len(), expected, "node dir never settled");
}

#[tokio::test]
async fn upload_splits_proportionally_and_round_trips() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    let (node1, port1, url1) = spawn_node(dir1.path(), 1000).await;
    let (node2, port2, url2) = spawn_node(dir2.path(), 1000).await;

    let metadata = Arc::new(MemoryStore::new());
    let manager = Manager::new(metadata.clone());
    register_node(&manager, port1, 1000, 0).await;
    register_node(&manager, port2, 1000, 500).await;

    let contents: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
    let hash = sha256_hex(&contents);

    let (status, body) = put_file(&manager, "data.bin", &contents).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {body}");

    // 100% free vs 50% free: 200 + 100 bytes, reserved at plan time.
    assert_eq!(used_counters(&manager).await, [200, 600]);
    assert_eq!(node1.store.used(), 200);
    assert_eq!(node2.store.used(), 100);

    // One placement row with both refs, in scheme order.
    let info = metadata.load("data.bin", None).await.unwrap();
    assert_eq!(info.hash, hash);
    assert_eq!(info.size, 300);
    assert_eq!(info.placement.len(), 2);
    assert!(info.placement[0].starts_with(&url1));
    assert!(info.placement[1].starts_with(&url2));

    // Every committed chunk sits under its own digest.
    for dir in [dir1.path(), dir2.path()] {
        let files = chunk_files(dir);
        assert_eq!(files.len(), 1);
        for (name, chunk) in files {
            assert_eq!(name, sha256_hex(&chunk));
        }
    }

    let (status, headers, downloaded) = get_file(&manager, "data.bin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(HEADER_HASH).unwrap().to_str().unwrap(), hash);
    assert_eq!(downloaded, contents);
}

#[tokio::test]
async fn name_collision_is_rejected_without_touching_counters() {
    let dir = tempfile::tempdir().unwrap();
    let (node, port, _url) = spawn_node(dir.path(), 1000).await;

    let metadata = Arc::new(MemoryStore::new());
    let manager = Manager::new(metadata.clone());
    register_node(&manager, port, 1000, 0).await;

    let (status, body) = put_file(&manager, "a.txt", b"hello").await;
    assert_eq!(status, StatusCode::OK, "upload failed: {body}");
    assert_eq!(used_counters(&manager).await, [5]);

    // Same name, different content.
    let (status, _) = put_file(&manager, "a.txt", b"world").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Nothing moved: no reservation, no node bytes, no second chunk.
    assert_eq!(used_counters(&manager).await, [5]);
    assert_eq!(node.store.used(), 5);
    assert_eq!(chunk_files(dir.path()).len(), 1);

    let (_, _, downloaded) = get_file(&manager, "a.txt").await;
    assert_eq!(downloaded, b"hello".to_vec());
}

#[tokio::test]
async fn duplicate_content_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let (node, port, _url) = spawn_node(dir.path(), 1000).await;

    let metadata = Arc::new(MemoryStore::new());
    let manager = Manager::new(metadata.clone());
    register_node(&manager, port, 1000, 0).await;

    let (status, _) = put_file(&manager, "a.txt", b"hello").await;
    assert_eq!(status, StatusCode::OK);

    // Identical content under a second name: accepted, then the freshly
    // streamed chunk is rolled back.
    let (status, _) = put_file(&manager, "b.txt", b"hello").await;
    assert_eq!(status, StatusCode::OK);

    wait_for_used(&manager, &[5]).await;
    wait_for_chunk_count(dir.path(), 1).await;
    for _ in 0..100 {
        if node.store.used() == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.store.used(), 5);

    // Both names resolve to the same placement.
    let a = metadata.load("a.txt", None).await.unwrap();
    let b = metadata.load("b.txt", None).await.unwrap();
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.placement, b.placement);

    let (_, _, from_a) = get_file(&manager, "a.txt").await;
    let (_, _, from_b) = get_file(&manager, "b.txt").await;
    assert_eq!(from_a, b"hello".to_vec());
    assert_eq!(from_a, from_b);
}

/// A node that accepts segments honestly but refuses every commit, and
/// records the rollback names it receives.
async fn spawn_commit_failing_node() -> (u16, Arc<Mutex<Vec<String>>>) {
    let rollbacks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let segment = put(|body: Bytes| async move {
        let digest = hex::encode(Sha256::digest(&body));
        (
            StatusCode::OK,
            [
                (HEADER_HASH, digest.clone()),
                (HEADER_FILENAME, format!("/stub/{digest}.tmp")),
            ],
            String::new(),
        )
    });
    let commit = post(|| async { StatusCode::INTERNAL_SERVER_ERROR });
    let rollback = delete({
        let log = rollbacks.clone();
        move |Path(name): Path<String>| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                StatusCode::OK
            }
        }
    });

    let app = Router::new()
        .route("/commit/:name", commit)
        .route("/rollback/:name", rollback)
        .route("/:name", segment);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, rollbacks)
}

#[tokio::test]
async fn commit_failure_rolls_back_and_leaves_no_metadata() {
    let (port, rollbacks) = spawn_commit_failing_node().await;

    let metadata = Arc::new(MemoryStore::new());
    let manager = Manager::new(metadata.clone());
    register_node(&manager, port, 1000, 0).await;

    let contents = b"0123456789".to_vec();
    let (status, body) = put_file(&manager, "f.bin", &contents).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("committing"), "unexpected body: {body}");

    // The reservation comes back and the rollback DELETE reaches the node,
    // addressed by the chunk's digest.
    wait_for_used(&manager, &[0]).await;
    for _ in 0..100 {
        if !rollbacks.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        rollbacks.lock().unwrap().clone(),
        vec![sha256_hex(&contents)]
    );

    // No records were written.
    assert!(metadata.load("f.bin", None).await.is_err());
}

/// A node that reports a bogus digest for every segment.
async fn spawn_corrupting_node() -> u16 {
    let segment = put(|body: Bytes| async move {
        let _ = body;
        (
            StatusCode::OK,
            [
                (HEADER_HASH, "0".repeat(64)),
                (HEADER_FILENAME, "/stub/corrupt.tmp".to_string()),
            ],
            String::new(),
        )
    });

    let app = Router::new().route("/:name", segment);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test]
async fn segment_hash_mismatch_aborts_the_upload() {
    let port = spawn_corrupting_node().await;

    let metadata = Arc::new(MemoryStore::new());
    let manager = Manager::new(metadata.clone());
    register_node(&manager, port, 1000, 0).await;

    let (status, body) = put_file(&manager, "f.bin", b"hello").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("uploading"), "unexpected body: {body}");

    wait_for_used(&manager, &[0]).await;
    assert!(metadata.load("f.bin", None).await.is_err());
}
