//! Transactional Chunk Store
//!
//! A flat directory of committed chunks named by their SHA-256 hex hash,
//! plus transient `*.tmp` files for segments in flight. The `used` counter
//! is a single atomic integer: segment uploads add to it, rollbacks
//! subtract what they free.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tracing::info;
use uuid::Uuid;

pub struct ChunkStore {
    dir: PathBuf,
    limit: u64,
    used: AtomicU64,
}

impl ChunkStore {
    /// Opens the store: creates the directory if absent, sweeps orphaned
    /// `*.tmp` files left by prior crashes, and recounts `used` from the
    /// files that survived (capped at the limit).
    pub async fn open(dir: impl Into<PathBuf>, limit: u64) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut total = 0u64;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                info!("Sweeping orphaned tmp file {:?}", entry.path());
                fs::remove_file(entry.path()).await?;
                continue;
            }
            total += meta.len();
        }

        Ok(Self {
            dir,
            used: AtomicU64::new(total.min(limit)),
            limit,
        })
    }

    /// A fresh tmp path inside the store directory.
    pub fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", Uuid::new_v4()))
    }

    /// The final on-disk path of a committed chunk.
    pub fn chunk_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Atomically promotes a tmp file to its final name.
    pub async fn commit(&self, name: &str, tmp_path: &str) -> std::io::Result<PathBuf> {
        let target = self.chunk_path(name);
        fs::rename(tmp_path, &target).await?;
        Ok(target)
    }

    /// Removes the file a rollback addresses and returns the bytes freed.
    /// Prefers the tmp path the manager echoed back; when that is gone the
    /// entry was already committed, so the final name is tried instead.
    pub async fn rollback(&self, name: &str, tmp_path: &str) -> std::io::Result<u64> {
        let target = if !tmp_path.is_empty() && fs::metadata(tmp_path).await.is_ok() {
            PathBuf::from(tmp_path)
        } else {
            self.chunk_path(name)
        };
        let size = fs::metadata(&target).await?.len();
        fs::remove_file(&target).await?;
        self.sub_used(size);
        Ok(size)
    }

    pub fn add_used(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Saturating: a rollback may free bytes the counter never saw.
    pub fn sub_used(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Formats a byte count for logs and the health report, powers of 1024.
pub fn pretty_bytes(size: u64) -> String {
    const UNIT: u64 = 1024;
    const UNITS: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

    if size < UNIT {
        return format!("{} B", size);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = size / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", size as f64 / div as f64, UNITS[exp])
}
