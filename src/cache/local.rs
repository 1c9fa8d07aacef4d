//! Directory-backed cache store
//!
//! Layout under the cache directory:
//!
//! ```text
//! index.json            key -> object file, size, timestamps
//! objects/<hash>.tar    one archive per key
//! ```
//!
//! Index updates are serialized through a mutex and written via a temp file
//! plus rename, so concurrent jobs saving different keys never corrupt it.

use crate::cache::archive::ArchivePath;
use crate::cache::store::{pack_paths, select_entry, CacheEntry, CacheHit, CacheStore};
use crate::error::{CircletError, CircletResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const INDEX_FILE: &str = "index.json";
const OBJECTS_DIR: &str = "objects";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    entries: BTreeMap<String, IndexEntry>,
    next_sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    object: String,
    #[serde(flatten)]
    meta: CacheEntry,
}

/// Cache store keeping tar archives in a local directory
pub struct LocalCacheStore {
    dir: PathBuf,
    index_lock: Mutex<()>,
}

impl LocalCacheStore {
    /// Create a store rooted at `dir` (created lazily on first save)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index_lock: Mutex::new(()),
        }
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Object file name for a key
    fn object_name(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("{}.tar", hex::encode(&digest[..16]))
    }

    fn object_path(&self, object: &str) -> PathBuf {
        self.dir.join(OBJECTS_DIR).join(object)
    }

    async fn load_index(&self) -> CircletResult<Index> {
        let path = self.dir.join(INDEX_FILE);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(CircletError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn write_index(&self, index: &Index) -> CircletResult<()> {
        let path = self.dir.join(INDEX_FILE);
        let content = serde_json::to_string_pretty(index)?;
        write_atomic(&path, content.as_bytes()).await
    }

    /// Remove entries older than `days`; returns the removed keys
    pub async fn gc(&self, days: u32, dry_run: bool) -> CircletResult<Vec<String>> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;

        let expired: Vec<String> = index
            .entries
            .values()
            .filter(|e| e.meta.is_older_than_days(days))
            .map(|e| e.meta.key.clone())
            .collect();

        if dry_run || expired.is_empty() {
            return Ok(expired);
        }

        for key in &expired {
            if let Some(entry) = index.entries.remove(key) {
                remove_object(&self.object_path(&entry.object)).await?;
            }
        }
        self.write_index(&index).await?;
        info!("Removed {} expired cache entries", expired.len());
        Ok(expired)
    }

    /// Remove every entry; returns how many were removed
    pub async fn clear(&self) -> CircletResult<usize> {
        let _guard = self.index_lock.lock().await;
        let index = self.load_index().await?;
        let count = index.entries.len();

        for entry in index.entries.values() {
            remove_object(&self.object_path(&entry.object)).await?;
        }
        self.write_index(&Index {
            entries: BTreeMap::new(),
            next_sequence: index.next_sequence,
        })
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn restore(&self, keys: &[String]) -> CircletResult<Option<CacheHit>> {
        let (key, object) = {
            let _guard = self.index_lock.lock().await;
            let index = self.load_index().await?;
            let metas: Vec<CacheEntry> = index.entries.values().map(|e| e.meta.clone()).collect();

            let Some(found) = select_entry(keys, &metas) else {
                return Ok(None);
            };
            let object = index.entries[&found.key].object.clone();
            (found.key.clone(), object)
        };

        let path = self.object_path(&object);
        let archive = fs::read(&path)
            .await
            .map_err(|e| CircletError::io(format!("reading cache object {}", path.display()), e))?;

        debug!("Restored '{}' from {}", key, path.display());
        Ok(Some(CacheHit { key, archive }))
    }

    async fn save(&self, key: &str, paths: &[ArchivePath]) -> CircletResult<()> {
        let archive = pack_paths(paths).await?;
        let object = Self::object_name(key);
        write_atomic(&self.object_path(&object), &archive).await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        index.next_sequence += 1;
        let sequence = index.next_sequence;
        index.entries.insert(
            key.to_string(),
            IndexEntry {
                object,
                meta: CacheEntry {
                    key: key.to_string(),
                    size_bytes: archive.len() as u64,
                    created_at: Utc::now(),
                    sequence,
                },
            },
        );
        self.write_index(&index).await?;

        debug!("Saved '{}' ({} bytes)", key, archive.len());
        Ok(())
    }

    async fn entries(&self) -> CircletResult<Vec<CacheEntry>> {
        let _guard = self.index_lock.lock().await;
        let index = self.load_index().await?;
        let mut entries: Vec<CacheEntry> = index.entries.into_values().map(|e| e.meta).collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn remove(&self, key: &str) -> CircletResult<bool> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        let Some(entry) = index.entries.remove(key) else {
            return Ok(false);
        };
        remove_object(&self.object_path(&entry.object)).await?;
        self.write_index(&index).await?;
        Ok(true)
    }

    fn store_name(&self) -> &'static str {
        "local"
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> CircletResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| CircletError::io(format!("creating {}", parent.display()), e))?;
    }

    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, content)
        .await
        .map_err(|e| CircletError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| CircletError::io(format!("renaming into {}", path.display()), e))
}

async fn remove_object(path: &Path) -> CircletResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CircletError::io(format!("removing {}", path.display()), e)),
    }
}
