//! Manager Module
//!
//! The coordination layer clients talk to. It owns the node registry and
//! the metadata gateway and exposes four endpoints:
//!
//! - `PUT /:filename`: the upload transaction. Plan a proportional split,
//!   stream each segment to its node while hashing, dedup against the
//!   metadata index, then commit (or roll back) across all nodes.
//! - `GET /:filename`: reassemble a file by fetching its chunks in
//!   placement order, verifying each against its content hash.
//! - `POST /register`: storage nodes announcing themselves.
//! - `GET /usage`: the current node records as JSON.
//!
//! ## Capacity accounting
//! Shares are reserved against a node's `used` counter at plan time, so
//! concurrent plans see a pessimistic view. A rollback returns the
//! reservation; a successful commit leaves it in place.

pub mod download;
pub mod handlers;
pub mod planner;
pub mod registry;
pub mod transaction;


use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::{Extension, Router};

use crate::metadata::{FileInfo, MetadataStore};
use registry::NodeRegistry;

/// Fixed timeout for every manager -> node call.
pub(crate) const NODE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Manager {
    pub registry: NodeRegistry,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) client: reqwest::Client,
}

impl Manager {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Arc<Self> {
        Arc::new(Self {
            registry: NodeRegistry::new(),
            metadata,
            client: reqwest::Client::new(),
        })
    }

    /// Builds the manager's HTTP surface. Uploads stream the raw body, so
    /// the default body limit is lifted.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/register", post(handlers::register))
            .route("/usage", get(handlers::usage))
            .route("/:filename", put(handlers::upload).get(handlers::download))
            .layer(DefaultBodyLimit::disable())
            .layer(Extension(self.clone()))
    }

    /// Inserts a metadata record, logging failure instead of propagating.
    /// Callers past the streaming phase treat the metadata write as
    /// best-effort; the durability gap is deliberate and documented.
    pub(crate) async fn store_record(&self, info: &FileInfo) {
        if let Err(err) = self.metadata.store(info).await {
            tracing::error!("Failed to insert metadata for '{}': {}", info.name, err);
        }
    }
}
