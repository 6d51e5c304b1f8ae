//! Two-tier response cache.
//!
//! The in-process map is authoritative and fast; every write is mirrored to
//! disk so entries survive restarts. Disk files are named by the SHA-256 of
//! the logical key:
//!
//! ```text
//! {cache_dir}/{sha256(key)}.json   # DiskEntry { key, data, timestamp, expires_at }
//! ```
//!
//! Expired entries are treated as absent and left in place. The in-process
//! map evicts in insertion order (FIFO) once it exceeds `max_size`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::digest::cache_file_stem;

/// A cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    /// When the payload was fetched.
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(data: serde_json::Value, ttl: Duration) -> Self {
        let timestamp = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = timestamp
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            data,
            timestamp,
            expires_at,
        }
    }

    /// Usable only while `now < expires_at`.
    pub fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// On-disk form; carries the original key so collisions are detectable.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry,
}

#[derive(Debug, Default)]
struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct ResponseCache {
    max_size: usize,
    ttl: Duration,
    cache_dir: Option<PathBuf>,
    memory: Mutex<MemoryTier>,
}

impl ResponseCache {
    /// In-process cache with a disk mirror under `cache_dir`.
    pub fn new(max_size: usize, ttl: Duration, cache_dir: Option<PathBuf>) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl,
            cache_dir,
            memory: Mutex::new(MemoryTier::default()),
        }
    }

    /// Default disk location: `{platform cache dir}/rampart/responses/{namespace}`.
    pub fn default_dir(namespace: &str) -> Option<PathBuf> {
        dirs::cache_dir()
            .or_else(dirs::home_dir)
            .map(|base| base.join("rampart").join("responses").join(namespace))
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`, falling back to disk and re-hydrating memory on a disk hit.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.get_memory(key) {
            debug!(key, "cache hit (memory)");
            return Some(entry);
        }

        let entry = self.read_disk(key).await?;
        if !entry.is_fresh() {
            debug!(key, expires_at = %entry.expires_at, "disk cache entry expired");
            return None;
        }

        debug!(key, "cache hit (disk)");
        self.insert_memory(key, entry.clone());
        Some(entry)
    }

    /// Store `data` under `key` in memory and mirror it to disk.
    ///
    /// Disk failures are logged and swallowed.
    pub async fn put(&self, key: &str, data: serde_json::Value) -> CacheEntry {
        let entry = CacheEntry::new(data, self.ttl);
        self.insert_memory(key, entry.clone());

        if let Err(e) = self.write_disk(key, &entry).await {
            warn!(key, error = %e, "failed to mirror cache entry to disk");
        }
        entry
    }

    /// Number of entries held in memory (fresh or not).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every in-process entry and remove disk files.
    pub async fn clear(&self) {
        {
            let mut memory = self.lock();
            memory.entries.clear();
            memory.order.clear();
        }
        if let Some(dir) = &self.cache_dir {
            if let Err(e) = fs::remove_dir_all(dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %dir.display(), error = %e, "failed to clear disk cache");
                }
            }
        }
    }

    fn get_memory(&self, key: &str) -> Option<CacheEntry> {
        let memory = self.lock();
        memory.entries.get(key).filter(|e| e.is_fresh()).cloned()
    }

    fn insert_memory(&self, key: &str, entry: CacheEntry) {
        let mut memory = self.lock();
        if memory.entries.insert(key.to_string(), entry).is_none() {
            memory.order.push_back(key.to_string());
        }
        while memory.entries.len() > self.max_size {
            match memory.order.pop_front() {
                Some(oldest) => {
                    memory.entries.remove(&oldest);
                    debug!(key = %oldest, "evicted oldest cache entry");
                }
                None => break,
            }
        }
    }

    fn disk_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", cache_file_stem(key))))
    }

    async fn read_disk(&self, key: &str) -> Option<CacheEntry> {
        let path = self.disk_path(key)?;
        let raw = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<DiskEntry>(&raw) {
            Ok(disk) if disk.key == key => Some(disk.entry),
            Ok(_) => {
                warn!(key, path = %path.display(), "disk cache key mismatch, ignoring");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "corrupt disk cache entry, ignoring");
                None
            }
        }
    }

    async fn write_disk(&self, key: &str, entry: &CacheEntry) -> std::io::Result<()> {
        let Some(path) = self.disk_path(key) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let disk = DiskEntry {
            key: key.to_string(),
            entry: entry.clone(),
        };
        let json = serde_json::to_string(&disk)?;
        write_atomic(&path, &json).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_cache(max_size: usize, ttl: Duration) -> (ResponseCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(max_size, ttl, Some(temp_dir.path().join("responses")));
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn test_cache_roundtrip() {
        let (cache, _temp_dir) = create_test_cache(10, Duration::from_secs(60));
        cache.put("tvl:aave", json!({"tvl": 1.5e9})).await;

        let entry = cache.get("tvl:aave").await.unwrap();
        assert_eq!(entry.data, json!({"tvl": 1.5e9}));
        assert!(entry.expires_at > entry.timestamp);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _temp_dir) = create_test_cache(10, Duration::from_secs(60));
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_disk_entry_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("responses");

        let first = ResponseCache::new(10, Duration::from_secs(60), Some(dir.clone()));
        first.put("price:eth", json!(3200)).await;
        drop(first);

        let second = ResponseCache::new(10, Duration::from_secs(60), Some(dir));
        assert!(second.is_empty());
        let entry = second.get("price:eth").await.unwrap();
        assert_eq!(entry.data, json!(3200));
        // Re-hydrated into memory.
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_expiry() {
        let (cache, _temp_dir) = create_test_cache(10, Duration::from_millis(20));
        cache.put("short", json!("v")).await;
        assert!(cache.get("short").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("short").await.is_none());
        // Expired entries stay in place until overwritten.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction_ignores_reads() {
        let cache = ResponseCache::new(2, Duration::from_secs(60), None);
        cache.put("a", json!(1)).await;
        cache.put("b", json!(2)).await;
        // Reading "a" does not protect it; eviction is by insertion order.
        assert!(cache.get("a").await.is_some());
        cache.put("c", json!(3)).await;

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_disk_write_failure_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "not a dir").unwrap();

        let cache = ResponseCache::new(10, Duration::from_secs(60), Some(blocker.join("sub")));
        cache.put("k", json!(true)).await;
        assert_eq!(cache.get("k").await.unwrap().data, json!(true));
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_is_a_miss() {
        let (cache, _temp_dir) = create_test_cache(10, Duration::from_secs(60));
        cache.put("k", json!(1)).await;
        let path = cache.disk_path("k").unwrap();
        std::fs::write(&path, "{{{ not json").unwrap();

        let fresh = ResponseCache::new(10, Duration::from_secs(60), cache.cache_dir().map(Path::to_path_buf));
        assert!(fresh.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_no_temp_files_remain() {
        let (cache, _temp_dir) = create_test_cache(10, Duration::from_secs(60));
        cache.put("k", json!({"x": 1})).await;

        let dir = cache.cache_dir().unwrap();
        let mut entries = fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"));
        }
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _temp_dir) = create_test_cache(10, Duration::from_secs(60));
        cache.put("k", json!(1)).await;
        cache.clear().await;
        assert!(cache.get("k").await.is_none());
    }
}
