//! Placement Planner
//!
//! Splits an incoming file across the registered nodes in proportion to
//! their free space. The split is deterministic for a given registry
//! snapshot: nodes are visited in registration order, shares are floored,
//! and the rounding remainder is handed out one byte at a time in the same
//! order, so the shares always sum to the file size exactly.

use super::registry::NodeRecord;
use crate::error::StoreError;

/// One entry of an upload plan. `url` starts as the node's base URL and is
/// rewritten to a chunk ref once the segment lands on the node; `tmp_path`
/// is the opaque path the node returned for that segment.
#[derive(Debug, Clone)]
pub struct Scheme {
    pub url: String,
    pub size: u64,
    pub tmp_path: String,
    /// Set once the chunk's commit succeeded; a rollback then targets the
    /// final name instead of the vanished tmp path.
    pub committed: bool,
}

/// Builds the plan and reserves each share against its node. The caller
/// holds the registry write lock for the duration.
pub fn build_scheme(nodes: &mut [NodeRecord], size: u64) -> Result<Vec<Scheme>, StoreError> {
    let candidates: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.used < node.limit)
        .map(|(idx, _)| idx)
        .collect();

    let free: u64 = candidates
        .iter()
        .map(|&idx| nodes[idx].limit - nodes[idx].used)
        .sum();
    if candidates.is_empty() || free < size {
        return Err(StoreError::CapacityExhausted { needed: size, free });
    }

    // Share weight is the percentage of the node that is free, not its
    // absolute free space: a half-empty small node pulls the same weight as
    // a half-empty big one.
    let percents: Vec<f64> = candidates
        .iter()
        .map(|&idx| 100.0 * (1.0 - nodes[idx].used as f64 / nodes[idx].limit as f64))
        .collect();
    let total: f64 = percents.iter().sum();

    let mut shares: Vec<u64> = percents
        .iter()
        .map(|percent| (size as f64 * percent / total) as u64)
        .collect();

    // Hand out the rounding remainder one byte at a time so the shares sum
    // to the file size exactly.
    let assigned: u64 = shares.iter().sum();
    let mut remainder = size.saturating_sub(assigned);
    let mut idx = 0;
    while remainder > 0 {
        let pos = idx % shares.len();
        shares[pos] += 1;
        idx += 1;
        remainder -= 1;
    }

    let mut scheme = Vec::with_capacity(candidates.len());
    for (slot, &node_idx) in candidates.iter().enumerate() {
        let share = shares[slot];
        if share == 0 {
            continue;
        }
        // Reserve at plan time; rollback reverts, commit is a no-op.
        nodes[node_idx].used += share;
        scheme.push(Scheme {
            url: nodes[node_idx].base_url.clone(),
            size: share,
            tmp_path: String::new(),
            committed: false,
        });
    }
    Ok(scheme)
}
