//! In-memory metadata store.
//!
//! Same contract as the MongoDB gateway, backed by two concurrent maps.
//! Used by the test suite; also handy for running a manager without a
//! database at hand.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{FileInfo, MetadataStore};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryStore {
    /// name -> content hash
    files: DashMap<String, String>,
    /// content hash -> (size, ordered chunk refs)
    placement: DashMap<String, (u64, Vec<String>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn store(&self, info: &FileInfo) -> Result<(), StoreError> {
        // Entry guards make check-and-insert atomic; concurrent uploads of
        // the same name race here, and exactly one wins.
        match self.files.entry(info.name.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::AlreadyExists(format!("file '{}'", info.name)));
            }
            Entry::Vacant(slot) => {
                slot.insert(info.hash.clone());
            }
        }

        if info.placement.is_empty() {
            return Ok(());
        }

        match self.placement.entry(info.hash.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(format!(
                "placement for '{}'",
                info.hash
            ))),
            Entry::Vacant(slot) => {
                slot.insert((info.size, info.placement.clone()));
                Ok(())
            }
        }
    }

    async fn load(&self, name: &str, hash: Option<&str>) -> Result<FileInfo, StoreError> {
        if let Some(file_hash) = self.files.get(name) {
            let mut info = FileInfo {
                name: name.to_string(),
                hash: file_hash.value().clone(),
                ..Default::default()
            };
            if let Some(entry) = self.placement.get(&info.hash) {
                let (size, placement) = entry.value();
                info.size = *size;
                info.placement = placement.clone();
            }
            return Ok(info);
        }

        if let Some(hash) = hash.filter(|h| !h.is_empty()) {
            if let Some(entry) = self.placement.get(hash) {
                let (size, placement) = entry.value();
                return Ok(FileInfo {
                    name: String::new(),
                    hash: hash.to_string(),
                    size: *size,
                    placement: placement.clone(),
                });
            }
        }

        Err(StoreError::NotFound(format!("file '{}'", name)))
    }
}
