//! Storage node entry point: opens the chunk store (with its crash-recovery
//! sweep), starts the HTTP listener, then registers with the manager.
//! Registration is one-shot; failure aborts startup.

use anyhow::Context;

use shardstore::node::registrar;
use shardstore::node::store::{pretty_bytes, ChunkStore};
use shardstore::node::StorageNode;
use shardstore::protocol::listen_addr;

/// Default capacity when STORAGE_LIMIT is not set.
const DEFAULT_LIMIT: u64 = 10 * 1024 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let addr = std::env::var("STORAGE_ADDR")
        .context("STORAGE_ADDR environment variable must be set")?;
    let dir =
        std::env::var("STORAGE_DIR").context("STORAGE_DIR environment variable must be set")?;
    let register_url =
        std::env::var("REGISTER_URL").context("REGISTER_URL environment variable must be set")?;
    let limit = std::env::var("STORAGE_LIMIT")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_LIMIT);

    let store = ChunkStore::open(&dir, limit)
        .await
        .with_context(|| format!("failed to open storage directory {dir}"))?;
    tracing::info!(
        "Storage ready: dir {} used {} of {}",
        dir,
        pretty_bytes(store.used()),
        pretty_bytes(store.limit())
    );

    let node = StorageNode::new(store);
    let app = node.router();

    let listener = tokio::net::TcpListener::bind(listen_addr(&addr)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Storage node listening on {}", local_addr);

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    registrar::register(
        &register_url,
        local_addr.port(),
        node.store.limit(),
        node.store.used(),
    )
    .await
    .context("registration with the manager failed")?;
    tracing::info!("Registered with manager at {}", register_url);

    server.await??;
    Ok(())
}
