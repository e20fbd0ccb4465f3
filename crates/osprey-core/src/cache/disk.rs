//! Directory-backed cache backend.
//!
//! One JSON file per `(target, provider)` key, named by its SHA-256
//! fingerprint. Writes go to a temp file in the same directory followed by
//! a rename. Missing or corrupt files are misses, never errors.

use super::{CacheBackend, CacheKey, CacheStats};
use crate::record::UnifiedRecord;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    target: String,
    provider: String,
    record: UnifiedRecord,
    /// Unix seconds at write time. Persistence crosses process restarts,
    /// so wall-clock is the only option here.
    timestamp: i64,
    ttl_seconds: u64,
}

/// Persistent result cache under a single directory.
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.fingerprint()))
    }

    async fn read_entry(&self, path: &PathBuf) -> Option<DiskEntry> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), "corrupt cache file treated as miss: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn get(&self, key: &CacheKey, max_age: Duration) -> Option<UnifiedRecord> {
        let entry = self.read_entry(&self.path_for(key)).await?;
        let age = Utc::now().timestamp().saturating_sub(entry.timestamp);
        if age < 0 {
            return None;
        }
        let limit = entry.ttl_seconds.min(max_age.as_secs());
        if age as u64 <= limit {
            Some(entry.record)
        } else {
            None
        }
    }

    async fn put(&self, key: &CacheKey, record: &UnifiedRecord, ttl: Duration) {
        let entry = DiskEntry {
            target: key.target.clone(),
            provider: key.provider.clone(),
            record: record.clone(),
            timestamp: Utc::now().timestamp(),
            ttl_seconds: ttl.as_secs(),
        };

        let payload = match serde_json::to_vec(&entry) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize cache entry: {}", e);
                return;
            }
        };

        // Write-temp + rename keeps the entry atomic: readers see either
        // the old file or the new one, never a partial write.
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", key.fingerprint()));
        if let Err(e) = tokio::fs::write(&tmp, &payload).await {
            warn!(path = %tmp.display(), "cache write failed: {}", e);
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!(path = %path.display(), "cache rename failed: {}", e);
            let _ = tokio::fs::remove_file(&tmp).await;
        }
    }

    async fn invalidate(&self, key: &CacheKey) {
        let _ = tokio::fs::remove_file(self.path_for(key)).await;
    }

    async fn clear(&self, pattern: Option<&str>) -> usize {
        let mut removed = 0;
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };

        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let matches = match pattern {
                None => true,
                Some(p) => self
                    .read_entry(&path)
                    .await
                    .map(|e| format!("{}:{}", e.provider, e.target).contains(p))
                    .unwrap_or(false),
            };
            if matches && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        debug!(removed, "cleared disk cache entries");
        removed
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return stats;
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(meta) = item.metadata().await {
                stats.entries += 1;
                stats.bytes += meta.len();
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TargetType;
    use tempfile::tempdir;

    fn record(target: &str) -> UnifiedRecord {
        let mut r = UnifiedRecord::empty("dns", target, TargetType::Domain);
        r.resolved.ip.insert("93.184.216.34");
        r
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let key = CacheKey::new("example.com", "dns");

        cache
            .put(&key, &record("example.com"), Duration::from_secs(3600))
            .await;
        let hit = cache.get(&key, Duration::from_secs(3600)).await;
        assert_eq!(hit, Some(record("example.com")));
    }

    #[tokio::test]
    async fn test_missing_file_is_miss() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let key = CacheKey::new("example.com", "dns");
        assert!(cache.get(&key, Duration::from_secs(3600)).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_miss() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let key = CacheKey::new("example.com", "dns");

        let path = dir.path().join(format!("{}.json", key.fingerprint()));
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(cache.get(&key, Duration::from_secs(3600)).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let key = CacheKey::new("example.com", "dns");

        // hand-write an entry stored 100 seconds ago with a 50 second ttl
        let entry = DiskEntry {
            target: key.target.clone(),
            provider: key.provider.clone(),
            record: record("example.com"),
            timestamp: Utc::now().timestamp() - 100,
            ttl_seconds: 50,
        };
        let path = dir.path().join(format!("{}.json", key.fingerprint()));
        tokio::fs::write(&path, serde_json::to_vec(&entry).unwrap())
            .await
            .unwrap();

        assert!(cache.get(&key, Duration::from_secs(3600)).await.is_none());
        // a tighter max_age is also respected for fresh entries
        cache
            .put(&key, &record("example.com"), Duration::from_secs(3600))
            .await;
        assert!(cache.get(&key, Duration::from_secs(3600)).await.is_some());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        let key = CacheKey::new("example.com", "dns");

        cache
            .put(&key, &record("example.com"), Duration::from_secs(3600))
            .await;
        let mut newer = record("example.com");
        newer.resolved.ip.insert("1.2.3.4");
        cache.put(&key, &newer, Duration::from_secs(3600)).await;

        let hit = cache.get(&key, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(hit.resolved.ip.len(), 2);
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_clear_by_pattern() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();

        cache
            .put(
                &CacheKey::new("example.com", "dns"),
                &record("example.com"),
                Duration::from_secs(3600),
            )
            .await;
        cache
            .put(
                &CacheKey::new("example.org", "whoisxml"),
                &record("example.org"),
                Duration::from_secs(3600),
            )
            .await;

        assert_eq!(cache.clear(Some("example.org")).await, 1);
        assert_eq!(cache.stats().await.entries, 1);
        assert_eq!(cache.clear(None).await, 1);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path()).unwrap();
        cache
            .put(
                &CacheKey::new("example.com", "dns"),
                &record("example.com"),
                Duration::from_secs(3600),
            )
            .await;

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }
}
