//! Manager API Handlers
//!
//! HTTP endpoints that drive the upload and download coordinators, node
//! registration, and the usage report. These handlers translate requests
//! into the logic of `transaction.rs`/`download.rs` and map every
//! `StoreError` to its status code.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, Path};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

use super::registry::NodeRecord;
use super::Manager;
use crate::error::StoreError;
use crate::metadata::FileInfo;
use crate::protocol::{
    header_value, HEADER_ADDR, HEADER_HASH, HEADER_LIMIT, HEADER_REGISTER, HEADER_USED, USER_AGENT,
};

/// PUT /:filename: the upload transaction.
pub async fn upload(
    Extension(manager): Extension<Arc<Manager>>,
    Path(filename): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, String) {
    info!("Received upload request for file: {}", filename);

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(-1);
    if size <= 0 {
        warn!("Invalid Content-Length: {}", size);
        return (StatusCode::BAD_REQUEST, "Invalid Content-Length".into());
    }
    let size = size as u64;

    let hint = header_value(&headers, HEADER_HASH);

    // Existence check: by name first, then by the client's hash hint.
    match manager.metadata.load(&filename, Some(&hint)).await {
        Ok(existing) if existing.name.is_empty() => {
            // Content already placed under the hinted hash: alias the new
            // name to it without consuming the body.
            info!(
                "Content '{}' already placed, adding name '{}'",
                existing.hash, filename
            );
            manager
                .store_record(&FileInfo {
                    name: filename.clone(),
                    hash: existing.hash,
                    ..Default::default()
                })
                .await;
            return (StatusCode::OK, String::new());
        }
        Ok(existing) => {
            if !hint.is_empty() && existing.hash == hint {
                // Same name, same content: idempotent success. The body is
                // not drained.
                return (StatusCode::OK, String::new());
            }
            return (
                StatusCode::FORBIDDEN,
                format!("file '{}' already exists", filename),
            );
        }
        Err(StoreError::NotFound(_)) => {}
        Err(err) => {
            error!("Metadata lookup for {} failed: {}", filename, err);
            return (StatusCode::FORBIDDEN, err.to_string());
        }
    }

    // Plan the split; shares are reserved as part of planning.
    let mut scheme = match manager.registry.plan(size).await {
        Ok(scheme) => scheme,
        Err(err) => {
            warn!("{}", err);
            return (err.status(), err.to_string());
        }
    };

    // Stream & verify, strictly sequential over the single request body.
    let mut reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    let mut aggregate = Sha256::new();

    let mut stream_failed = false;
    for entry in scheme.iter_mut() {
        if let Err(err) = manager.store_chunk(&mut reader, entry, &mut aggregate).await {
            error!("Error storing chunk on {}: {}", entry.url, err);
            stream_failed = true;
            break;
        }
    }
    if stream_failed {
        manager.schedule_rollback(scheme);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error uploading file".into(),
        );
    }

    for (idx, entry) in scheme.iter().enumerate() {
        info!("Scheme[{}]: {} ({})", idx, entry.url, entry.size);
    }

    let hash = hex::encode(aggregate.finalize());

    // Post-stream dedup: this exact content may already be placed.
    if manager.metadata.load(&filename, Some(&hash)).await.is_ok() {
        info!("File with hash '{}' already exists. STORE & ROLLBACK", hash);
        // Metadata before rollback: a crash in between leaves orphan bytes,
        // never a dangling reference.
        manager
            .store_record(&FileInfo {
                name: filename.clone(),
                hash,
                ..Default::default()
            })
            .await;
        manager.schedule_rollback(scheme);
        return (StatusCode::OK, String::new());
    }

    // Commit phase.
    if let Err(err) = manager.commit_scheme(&mut scheme).await {
        error!("Error committing chunks: {}", err);
        manager.schedule_rollback(scheme);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error committing chunks".into(),
        );
    }

    // Persist the placement. Failures here are logged, not rolled back: the
    // chunks are durable even when the record is not.
    let record = FileInfo {
        name: filename.clone(),
        hash,
        size,
        placement: scheme.iter().map(|entry| entry.url.clone()).collect(),
    };
    manager.store_record(&record).await;

    info!(
        "filename: {} size: {} sha256: {} uploaded successfully",
        record.name, record.size, record.hash
    );
    if let Ok(pretty) = serde_json::to_string_pretty(&record) {
        info!("{}", pretty);
    }
    (StatusCode::OK, String::new())
}

/// GET /:filename: reassembles a file from its chunks.
pub async fn download(
    Extension(manager): Extension<Arc<Manager>>,
    Path(filename): Path<String>,
) -> Response {
    let info = match manager.metadata.load(&filename, None).await {
        Ok(info) => info,
        Err(err) => {
            info!("File not found: {} ({})", filename, err);
            return (StatusCode::NOT_FOUND, "file not found").into_response();
        }
    };

    let (tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let streamer = manager.clone();
    let size = info.size;
    let hash = info.hash.clone();
    tokio::spawn(async move { streamer.stream_chunks(info, tx).await });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::SERVER, USER_AGENT)
        .header(HEADER_HASH, hash)
        .body(Body::from_stream(rx))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// POST /register: a storage node announcing itself. The node's reachable
/// IP comes from the connection's peer address; the port rides in `x-addr`.
pub async fn register(
    Extension(manager): Extension<Arc<Manager>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    if header_value(&headers, HEADER_REGISTER) != "true" {
        warn!("Invalid register header from {}", peer);
        return (StatusCode::BAD_REQUEST, "Invalid Register header".into());
    }

    let addr = header_value(&headers, HEADER_ADDR);
    let limit = header_value(&headers, HEADER_LIMIT).parse::<u64>();
    let used = header_value(&headers, HEADER_USED).parse::<u64>();
    let (Ok(limit), Ok(used)) = (limit, used) else {
        warn!("Invalid limit/used headers from {}", peer);
        return (
            StatusCode::BAD_REQUEST,
            "Invalid Limit or Used header".into(),
        );
    };
    if addr.is_empty() {
        warn!("Missing addr header from {}", peer);
        return (StatusCode::BAD_REQUEST, "Missing required headers".into());
    }

    let ip = match peer.ip() {
        std::net::IpAddr::V4(v4) => v4.to_string(),
        std::net::IpAddr::V6(v6) => format!("[{}]", v6),
    };
    let base_url = format!("http://{}{}", ip, addr);

    if let Err(err) = manager.registry.register(&base_url, limit, used).await {
        warn!("Failed to register storage node: {}", err);
        return (err.status(), err.to_string());
    }
    info!("Storage node {} registered successfully", base_url);
    (StatusCode::OK, String::new())
}

/// GET /usage: the current node records as JSON.
pub async fn usage(Extension(manager): Extension<Arc<Manager>>) -> Json<Vec<NodeRecord>> {
    Json(manager.registry.snapshot().await)
}
