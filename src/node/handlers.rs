//! Storage Node API Handlers
//!
//! The four verbs of the transactional store plus a health probe. Segment
//! bodies are streamed straight to disk while being hashed; downloads are
//! streamed straight from disk.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use super::store::pretty_bytes;
use super::StorageNode;
use crate::protocol::{header_value, HEADER_FILENAME, HEADER_HASH};

/// Rejects names that could escape the store directory.
fn bad_name(name: &str) -> bool {
    name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\')
}

/// PUT /:name: accept a segment into a tmp file. Only the literal name
/// `segment` is a valid upload target; anything else is malformed.
pub async fn segment(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if name != "segment" {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    }

    let tmp_path = node.store.tmp_path();
    let mut file = match tokio::fs::File::create(&tmp_path).await {
        Ok(file) => file,
        Err(err) => {
            error!("Failed to create tmp file in {:?}: {}", node.store.dir(), err);
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mut hasher = Sha256::new();
    let mut written = 0u64;
    let mut stream = body.into_data_stream();
    loop {
        match stream.try_next().await {
            Ok(Some(bytes)) => {
                hasher.update(&bytes);
                if let Err(err) = file.write_all(&bytes).await {
                    return segment_failed(&tmp_path, err).await;
                }
                written += bytes.len() as u64;
            }
            Ok(None) => break,
            Err(err) => return segment_failed(&tmp_path, std::io::Error::other(err)).await,
        }
    }
    if let Err(err) = file.flush().await {
        return segment_failed(&tmp_path, err).await;
    }
    drop(file);

    let hash = hex::encode(hasher.finalize());
    info!(
        "Stored segment {:?} ({} bytes, sha256 {})",
        tmp_path, written, hash
    );

    // The planner reserved Content-Length bytes for this segment; count the
    // same figure here so both sides agree.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(written);
    node.store.add_used(declared);

    (
        StatusCode::OK,
        [
            (HEADER_HASH, hash),
            (HEADER_FILENAME, tmp_path.to_string_lossy().into_owned()),
        ],
        String::new(),
    )
        .into_response()
}

async fn segment_failed(tmp_path: &std::path::Path, err: std::io::Error) -> Response {
    error!("Segment upload to {:?} failed: {}", tmp_path, err);
    let _ = tokio::fs::remove_file(tmp_path).await;
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

/// GET /:name: serve a committed chunk straight from disk.
pub async fn download(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(name): Path<String>,
) -> Response {
    if bad_name(&name) {
        return (StatusCode::BAD_REQUEST, "filename is required").into_response();
    }

    let path = node.store.chunk_path(&name);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(err) => {
            error!("Failed to stat {:?}: {}", path, err);
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(ReaderStream::new(file)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// POST /commit/:name: rename a tmp file to its final (hash) name.
pub async fn commit(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let tmp_path = header_value(&headers, HEADER_FILENAME);
    if bad_name(&name) || tmp_path.is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid URL path".into());
    }

    match node.store.commit(&name, &tmp_path).await {
        Ok(target) => {
            info!("Committed {} -> {:?}", tmp_path, target);
            (StatusCode::OK, String::new())
        }
        Err(err) => {
            error!("Commit of {} failed: {}", tmp_path, err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// DELETE /rollback/:name: remove a segment, by its tmp path when it still
/// exists, by its committed name otherwise.
pub async fn rollback(
    Extension(node): Extension<Arc<StorageNode>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    if bad_name(&name) {
        return (StatusCode::BAD_REQUEST, "Filename is required".into());
    }
    let tmp_path = header_value(&headers, HEADER_FILENAME);

    match node.store.rollback(&name, &tmp_path).await {
        Ok(size) => {
            info!("Rolled back {} ({} bytes)", name, size);
            (StatusCode::OK, String::new())
        }
        Err(err) => {
            error!("Rollback of {} failed: {}", name, err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// GET /health: plain-text capacity report.
pub async fn health(Extension(node): Extension<Arc<StorageNode>>) -> String {
    format!(
        "Storage node is healthy\nCapacity: {} ({})\nUsed: {} ({})\n",
        node.store.limit(),
        pretty_bytes(node.store.limit()),
        node.store.used(),
        pretty_bytes(node.store.used()),
    )
}
