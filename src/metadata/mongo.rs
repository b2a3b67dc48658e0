//! MongoDB metadata store.
//!
//! The DSN carries the database name in its path (`mongodb://host/dbname`);
//! the driver exposes it as the default database. Indexes are created at
//! connect time so uniqueness holds even when several managers share one
//! database.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};

use super::{FileInfo, MetadataStore};
use crate::error::StoreError;

const FILES_COLLECTION: &str = "files";
const PLACEMENT_COLLECTION: &str = "placement";

#[derive(Debug, Serialize, Deserialize)]
struct FileDoc {
    name: String,
    hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlacementDoc {
    hash: String,
    size: i64,
    placement: Vec<String>,
}

pub struct MongoStore {
    files: Collection<FileDoc>,
    placement: Collection<PlacementDoc>,
}

impl MongoStore {
    /// Connects and ensures the indexes. The database name comes from the
    /// DSN path.
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(options)?;
        let db = client
            .default_database()
            .ok_or_else(|| anyhow::anyhow!("database name missing from DSN [{uri}]"))?;

        let files = db.collection::<FileDoc>(FILES_COLLECTION);
        files
            .create_indexes(
                [
                    IndexModel::builder()
                        .keys(doc! { "name": 1 })
                        .options(IndexOptions::builder().unique(true).build())
                        .build(),
                    IndexModel::builder().keys(doc! { "hash": 1 }).build(),
                ],
                None,
            )
            .await?;

        let placement = db.collection::<PlacementDoc>(PLACEMENT_COLLECTION);
        placement
            .create_indexes(
                [IndexModel::builder()
                    .keys(doc! { "hash": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build()],
                None,
            )
            .await?;

        Ok(Self { files, placement })
    }
}

fn read_failed(err: mongodb::error::Error) -> StoreError {
    StoreError::IOFailure(std::io::Error::other(err))
}

fn write_failed(err: mongodb::error::Error) -> StoreError {
    StoreError::MetadataWriteFailed(err.to_string())
}

/// Server code 11000: an insert bounced off a unique index. Concurrent
/// uploads can both pass the count pre-check; the index is the arbiter.
fn duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write))
            if write.code == 11000
    )
}

#[async_trait]
impl MetadataStore for MongoStore {
    async fn store(&self, info: &FileInfo) -> Result<(), StoreError> {
        let taken = self
            .files
            .count_documents(doc! { "name": &info.name }, None)
            .await
            .map_err(read_failed)?;
        if taken > 0 {
            return Err(StoreError::AlreadyExists(format!("file '{}'", info.name)));
        }

        if let Err(err) = self
            .files
            .insert_one(
                FileDoc {
                    name: info.name.clone(),
                    hash: info.hash.clone(),
                },
                None,
            )
            .await
        {
            if duplicate_key(&err) {
                return Err(StoreError::AlreadyExists(format!("file '{}'", info.name)));
            }
            return Err(write_failed(err));
        }

        if info.placement.is_empty() {
            return Ok(());
        }

        let taken = self
            .placement
            .count_documents(doc! { "hash": &info.hash }, None)
            .await
            .map_err(read_failed)?;
        if taken > 0 {
            return Err(StoreError::AlreadyExists(format!(
                "placement for '{}'",
                info.hash
            )));
        }

        if let Err(err) = self
            .placement
            .insert_one(
                PlacementDoc {
                    hash: info.hash.clone(),
                    size: info.size as i64,
                    placement: info.placement.clone(),
                },
                None,
            )
            .await
        {
            if duplicate_key(&err) {
                return Err(StoreError::AlreadyExists(format!(
                    "placement for '{}'",
                    info.hash
                )));
            }
            return Err(write_failed(err));
        }
        Ok(())
    }

    async fn load(&self, name: &str, hash: Option<&str>) -> Result<FileInfo, StoreError> {
        let by_name = self
            .files
            .find_one(doc! { "name": name }, None)
            .await
            .map_err(read_failed)?;

        if let Some(file) = by_name {
            let mut info = FileInfo {
                name: file.name,
                hash: file.hash,
                ..Default::default()
            };
            let placement = self
                .placement
                .find_one(doc! { "hash": &info.hash }, None)
                .await
                .map_err(read_failed)?;
            if let Some(placement) = placement {
                info.size = placement.size as u64;
                info.placement = placement.placement;
            }
            return Ok(info);
        }

        if let Some(hash) = hash.filter(|h| !h.is_empty()) {
            let placement = self
                .placement
                .find_one(doc! { "hash": hash }, None)
                .await
                .map_err(read_failed)?;
            if let Some(placement) = placement {
                return Ok(FileInfo {
                    name: String::new(),
                    hash: hash.to_string(),
                    size: placement.size as u64,
                    placement: placement.placement,
                });
            }
        }

        Err(StoreError::NotFound(format!("file '{}'", name)))
    }
}
