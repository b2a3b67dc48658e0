//! Metadata Gateway Module
//!
//! Wraps the document store behind the narrow interface the upload and
//! download coordinators consume. Two logical collections:
//!
//! - **`files`**: one row per file name, pointing at a content hash.
//!   Unique index on `name`, secondary index on `hash`.
//! - **`placement`**: one row per distinct content, holding the ordered
//!   chunk refs that reassemble it. Unique index on `hash`.
//!
//! Deduplication falls out of the split: two file names with identical
//! content share a single placement row.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Merged view of a stored file: its identity plus, when known, the
/// placement that reassembles it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Unique file name. Empty when the record was resolved by hash alone.
    pub name: String,
    /// Content SHA-256, hex.
    pub hash: String,
    /// Total size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Ordered chunk refs; their sizes sum to `size`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placement: Vec<String>,
}

/// The document-store contract the coordinators consume.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Inserts the file record and, when `placement` is non-empty, the
    /// placement record. Uniqueness is checked per collection: a taken file
    /// name and a taken placement hash are distinct `AlreadyExists` errors.
    async fn store(&self, info: &FileInfo) -> Result<(), StoreError>;

    /// Loads a merged record: by `name` first, then by `hash` when given
    /// and the name is unknown. `NotFound` when neither resolves.
    async fn load(&self, name: &str, hash: Option<&str>) -> Result<FileInfo, StoreError>;
}
