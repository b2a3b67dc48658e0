//! Node Registry
//!
//! The manager's only shared mutable state: the list of registered storage
//! nodes with their capacity counters, guarded by a single reader-writer
//! lock. Registration order is preserved; it is the deterministic iteration
//! order the planner sees. The lock is never held across a network call.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::RwLock;

use super::planner::{self, Scheme};
use crate::error::StoreError;

/// One registered storage node. `used` moves only at plan time (reserve)
/// and on rollback (revert); nodes are never removed during a run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub base_url: String,
    /// Capacity in bytes.
    pub limit: u64,
    /// Bytes accounted for, including plan-time reservations.
    pub used: u64,
    /// Unix epoch milliseconds.
    pub registered_at: u64,
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeRecord>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Fails when the base URL is already registered.
    pub async fn register(&self, base_url: &str, limit: u64, used: u64) -> Result<(), StoreError> {
        let mut nodes = self.nodes.write().await;
        if nodes.iter().any(|node| node.base_url == base_url) {
            return Err(StoreError::AlreadyExists(format!(
                "storage node '{}'",
                base_url
            )));
        }
        nodes.push(NodeRecord {
            base_url: base_url.to_string(),
            limit,
            used,
            registered_at: now_ms(),
        });
        Ok(())
    }

    /// A consistent copy of every node record, in registration order.
    pub async fn snapshot(&self) -> Vec<NodeRecord> {
        self.nodes.read().await.clone()
    }

    /// Plans a placement for `size` bytes and reserves each share under the
    /// same lock, so concurrent plans cannot oversubscribe a node.
    pub async fn plan(&self, size: u64) -> Result<Vec<Scheme>, StoreError> {
        let mut nodes = self.nodes.write().await;
        planner::build_scheme(&mut nodes, size)
    }

    /// Returns a rolled-back share to the node that reserved it.
    pub async fn revert(&self, base_url: &str, bytes: u64) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.iter_mut().find(|node| node.base_url == base_url) {
            node.used = node.used.saturating_sub(bytes);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
