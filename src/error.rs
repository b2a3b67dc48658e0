//! Error Taxonomy
//!
//! Every failure the core can produce maps to one of these variants, and
//! every variant maps to exactly one HTTP status code at the handler layer.
//! Binaries wrap these in `anyhow` for context; handlers convert them to
//! plain status codes with short text bodies.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A file name or placement hash that must be unique is already taken.
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The registered nodes cannot absorb the requested size. Also covers
    /// the empty-registry case (`free` is then 0).
    #[error("not enough capacity: {needed} bytes requested, {free} free")]
    CapacityExhausted { needed: u64, free: u64 },

    /// A node reported a digest that does not match the bytes we sent it.
    #[error("hash mismatch: expected {expected}, node reported {reported}")]
    HashMismatch { expected: String, reported: String },

    #[error("node {url} unreachable: {reason}")]
    NodeUnreachable { url: String, reason: String },

    /// The node answered, but with a non-success status.
    #[error("node rejected {verb} {url}: status {status}")]
    NodeRejected {
        url: String,
        verb: &'static str,
        status: u16,
    },

    #[error("metadata write failed: {0}")]
    MetadataWriteFailed(String),

    #[error("i/o failure: {0}")]
    IOFailure(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl StoreError {
    /// The HTTP status this error surfaces as.
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::AlreadyExists(_) => StatusCode::FORBIDDEN,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::CapacityExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
            StoreError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::HashMismatch { .. }
            | StoreError::NodeUnreachable { .. }
            | StoreError::NodeRejected { .. }
            | StoreError::MetadataWriteFailed(_)
            | StoreError::IOFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
