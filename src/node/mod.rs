//! Storage Node Module
//!
//! Holds chunk bytes on the local filesystem with transactional handling:
//! an uploaded segment lands in a `*.tmp` file, a commit renames it to its
//! final (hash) name, a rollback deletes it. A startup sweep removes tmp
//! files orphaned by crashes and recounts the `used` counter from what
//! survived, so the node is crash-safe without any sidecar metadata.
//!
//! Nodes know nothing about file names or whole-file hashes; they see only
//! tmp paths and final chunk names. That separation is intentional.

pub mod handlers;
pub mod registrar;
pub mod store;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Router};

use store::ChunkStore;

pub struct StorageNode {
    pub store: ChunkStore,
}

impl StorageNode {
    pub fn new(store: ChunkStore) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Builds the node's HTTP surface. Segment uploads stream the raw body,
    /// so the default body limit is lifted.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/commit/:name", post(handlers::commit))
            .route("/rollback/:name", delete(handlers::rollback))
            .route("/download/:name", get(handlers::download))
            .route("/:name", put(handlers::segment).get(handlers::download))
            .layer(DefaultBodyLimit::disable())
            .layer(Extension(self.clone()))
    }
}
