//! Cache store abstraction
//!
//! Provides a trait for cache storage that can be backed by different
//! implementations (local directory, in-memory).

use crate::cache::archive::{self, ArchivePath};
use crate::error::{CircletError, CircletResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A restored cache entry
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The stored key that matched
    pub key: String,
    /// Tar archive produced by [`archive::pack`]
    pub archive: Vec<u8>,
}

/// Metadata about a stored entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Monotonic save counter; breaks ties between equal timestamps
    pub sequence: u64,
}

impl CacheEntry {
    /// Check if this entry is older than the given number of days
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.created_at < cutoff
    }
}

/// Abstract cache store interface
///
/// `restore` takes keys in precedence order and returns the first hit.
/// `save` always writes under the given key; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up keys in order, returning the first hit
    async fn restore(&self, keys: &[String]) -> CircletResult<Option<CacheHit>>;

    /// Archive `paths` and store them under `key`
    async fn save(&self, key: &str, paths: &[ArchivePath]) -> CircletResult<()>;

    /// List stored entries
    async fn entries(&self) -> CircletResult<Vec<CacheEntry>>;

    /// Remove an entry; returns whether it existed
    async fn remove(&self, key: &str) -> CircletResult<bool>;

    /// Human-readable store name for display
    fn store_name(&self) -> &'static str;
}

/// Pick the entry matching `keys`, in order.
///
/// For each key an exact match wins; otherwise the most recently saved entry
/// whose key starts with it.
pub fn select_entry<'a>(keys: &[String], entries: &'a [CacheEntry]) -> Option<&'a CacheEntry> {
    keys.iter().find_map(|key| {
        entries.iter().find(|e| &e.key == key).or_else(|| {
            entries
                .iter()
                .filter(|e| e.key.starts_with(key.as_str()))
                .max_by_key(|e| (e.created_at, e.sequence))
        })
    })
}

/// Pack paths on the blocking pool
pub async fn pack_paths(paths: &[ArchivePath]) -> CircletResult<Vec<u8>> {
    let paths = paths.to_vec();
    tokio::task::spawn_blocking(move || archive::pack(&paths))
        .await
        .map_err(|e| CircletError::Internal(format!("archive task failed: {}", e)))?
}

/// In-memory store, useful for tests and dry runs
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, (CacheEntry, Vec<u8>)>,
    sequence: u64,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw archive bytes under a key
    pub async fn insert(&self, key: impl Into<String>, archive: Vec<u8>) {
        let key = key.into();
        let mut inner = self.inner.lock().await;
        inner.sequence += 1;
        let entry = CacheEntry {
            key: key.clone(),
            size_bytes: archive.len() as u64,
            created_at: Utc::now(),
            sequence: inner.sequence,
        };
        inner.entries.insert(key, (entry, archive));
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn restore(&self, keys: &[String]) -> CircletResult<Option<CacheHit>> {
        let inner = self.inner.lock().await;
        let entries: Vec<CacheEntry> = inner.entries.values().map(|(e, _)| e.clone()).collect();

        Ok(select_entry(keys, &entries).and_then(|entry| {
            inner.entries.get(&entry.key).map(|(_, archive)| CacheHit {
                key: entry.key.clone(),
                archive: archive.clone(),
            })
        }))
    }

    async fn save(&self, key: &str, paths: &[ArchivePath]) -> CircletResult<()> {
        let archive = pack_paths(paths).await?;
        self.insert(key, archive).await;
        Ok(())
    }

    async fn entries(&self) -> CircletResult<Vec<CacheEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<CacheEntry> =
            inner.entries.values().map(|(e, _)| e.clone()).collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn remove(&self, key: &str) -> CircletResult<bool> {
        Ok(self.inner.lock().await.entries.remove(key).is_some())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
