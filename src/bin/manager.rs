//! Manager entry point: connects to the metadata store and serves the
//! upload/download/register/usage API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use shardstore::manager::Manager;
use shardstore::metadata::mongo::MongoStore;
use shardstore::protocol::listen_addr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let addr = std::env::var("MANAGER_ADDR")
        .context("MANAGER_ADDR environment variable must be set")?;
    let mongo_url =
        std::env::var("MONGO_URL").context("MONGO_URL environment variable must be set")?;

    let metadata = MongoStore::connect(&mongo_url)
        .await
        .context("failed to connect to the metadata store")?;
    tracing::info!("Connected to metadata store");

    let manager = Manager::new(Arc::new(metadata));
    let app = manager.router();

    let listener = tokio::net::TcpListener::bind(listen_addr(&addr)).await?;
    tracing::info!("Manager listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
