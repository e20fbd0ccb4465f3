//! In-memory cache backend built on moka.
//!
//! Entries carry their own stored-at instant and TTL; moka handles
//! capacity, per-entry expiry and byte accounting via a weigher. Ages are
//! measured on the tokio clock so they are monotonic (and testable under
//! a paused runtime); wall-clock time never decides expiry here.

use super::{CacheBackend, CacheKey, CacheStats};
use crate::record::UnifiedRecord;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant;
use tracing::trace;

#[derive(Clone)]
struct StoredEntry {
    record: Arc<UnifiedRecord>,
    stored_at: Instant,
    ttl: Duration,
    weight: u32,
}

struct EntryTtl;

impl Expiry<String, StoredEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &StoredEntry,
        _created_at: StdInstant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Bounded in-memory result cache.
pub struct MemoryCache {
    entries: Cache<String, StoredEntry>,
}

impl MemoryCache {
    /// Creates a cache bounded to roughly `max_bytes` of serialized records.
    pub fn new(max_bytes: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key, entry: &StoredEntry| entry.weight)
            .expire_after(EntryTtl)
            .build();
        Self { entries }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        // 64 MiB of serialized records
        Self::new(64 * 1024 * 1024)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey, max_age: Duration) -> Option<UnifiedRecord> {
        let entry = self.entries.get(&key.label()).await?;
        let age = entry.stored_at.elapsed();
        if age <= entry.ttl.min(max_age) {
            trace!(key = %key.label(), age_secs = age.as_secs(), "cache hit");
            Some((*entry.record).clone())
        } else {
            None
        }
    }

    async fn put(&self, key: &CacheKey, record: &UnifiedRecord, ttl: Duration) {
        let weight = serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0) as u32;
        let entry = StoredEntry {
            record: Arc::new(record.clone()),
            stored_at: Instant::now(),
            ttl,
            weight,
        };
        self.entries.insert(key.label(), entry).await;
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.entries.invalidate(&key.label()).await;
    }

    async fn clear(&self, pattern: Option<&str>) -> usize {
        let mut removed = 0;
        let keys: Vec<String> = self
            .entries
            .iter()
            .map(|(k, _)| (*k).clone())
            .filter(|k| pattern.map(|p| k.contains(p)).unwrap_or(true))
            .collect();
        for key in keys {
            self.entries.invalidate(&key).await;
            removed += 1;
        }
        self.entries.run_pending_tasks().await;
        removed
    }

    async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        CacheStats {
            entries: self.entries.entry_count(),
            bytes: self.entries.weighted_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TargetType;

    fn record(target: &str) -> UnifiedRecord {
        let mut r = UnifiedRecord::empty("dns", target, TargetType::Domain);
        r.resolved.ip.insert("93.184.216.34");
        r
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl() {
        let cache = MemoryCache::default();
        let key = CacheKey::new("example.com", "dns");
        cache
            .put(&key, &record("example.com"), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(59)).await;
        let hit = cache.get(&key, Duration::from_secs(60)).await;
        assert_eq!(hit, Some(record("example.com")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_after_ttl() {
        let cache = MemoryCache::default();
        let key = CacheKey::new("example.com", "dns");
        cache
            .put(&key, &record("example.com"), Duration::from_secs(60))
            .await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key, Duration::from_secs(3600)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_tighter_than_ttl() {
        let cache = MemoryCache::default();
        let key = CacheKey::new("example.com", "dns");
        cache
            .put(&key, &record("example.com"), Duration::from_secs(3600))
            .await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(&key, Duration::from_secs(10)).await.is_none());
        assert!(cache.get(&key, Duration::from_secs(60)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites() {
        let cache = MemoryCache::default();
        let key = CacheKey::new("example.com", "dns");
        cache
            .put(&key, &record("example.com"), Duration::from_secs(60))
            .await;

        let mut newer = record("example.com");
        newer.resolved.ip.insert("1.2.3.4");
        cache.put(&key, &newer, Duration::from_secs(60)).await;

        let hit = cache.get(&key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(hit.resolved.ip.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_pattern_and_stats() {
        let cache = MemoryCache::default();
        cache
            .put(
                &CacheKey::new("example.com", "dns"),
                &record("example.com"),
                Duration::from_secs(60),
            )
            .await;
        cache
            .put(
                &CacheKey::new("example.org", "whoisxml"),
                &record("example.org"),
                Duration::from_secs(60),
            )
            .await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert!(stats.bytes > 0);

        let removed = cache.clear(Some("whoisxml")).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().await.entries, 1);

        let removed = cache.clear(None).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate() {
        let cache = MemoryCache::default();
        let key = CacheKey::new("example.com", "dns");
        cache
            .put(&key, &record("example.com"), Duration::from_secs(60))
            .await;
        cache.invalidate(&key).await;
        assert!(cache.get(&key, Duration::from_secs(60)).await.is_none());
    }
}
