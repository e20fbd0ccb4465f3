//! Result cache keyed by `(target, provider)`.
//!
//! The backend is abstract: the in-memory store is the default, the disk
//! store adds persistence between runs as a quality-of-life feature. In
//! every backend a miss is never an error, and writes replace entries
//! atomically.

pub mod disk;
pub mod memory;

pub use disk::DiskCache;
pub use memory::MemoryCache;

use crate::record::UnifiedRecord;
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Default entry time-to-live: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

/// How the engine uses the cache for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Probe before fetching, write after.
    #[default]
    ReadWrite,
    /// Bypass the probe but still write fresh results.
    Refresh,
    /// Bypass both read and write.
    Disabled,
}

impl CacheMode {
    pub fn reads(&self) -> bool {
        matches!(self, CacheMode::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        !matches!(self, CacheMode::Disabled)
    }
}

/// Cache fingerprint: one live entry per `(target, provider)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub target: String,
    pub provider: String,
}

impl CacheKey {
    pub fn new(target: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            provider: provider.into(),
        }
    }

    /// Human-readable key used by the in-memory store and pattern clears.
    pub fn label(&self) -> String {
        format!("{}:{}", self.provider, self.target)
    }

    /// Stable content address used as the on-disk file name.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.target.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Entry and size counters for `stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
}

/// Storage behind the cache layer.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the entry if it is younger than both its own TTL and
    /// `max_age`. Misses are silent; corruption is a miss.
    async fn get(&self, key: &CacheKey, max_age: Duration) -> Option<UnifiedRecord>;

    /// Writes atomically, replacing any existing entry.
    async fn put(&self, key: &CacheKey, record: &UnifiedRecord, ttl: Duration);

    async fn invalidate(&self, key: &CacheKey);

    /// Removes entries whose `provider:target` label contains `pattern`;
    /// `None` clears everything. Returns the number of entries removed.
    async fn clear(&self, pattern: Option<&str>) -> usize;

    async fn stats(&self) -> CacheStats;
}
