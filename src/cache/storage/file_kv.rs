//! Disk-backed Key-Value Store
//!
//! `KvStore` over a local directory, for single-node deployments that want
//! the durable tier to survive restarts. Values live in sharded
//! subdirectories named by key digest, each with a `.meta` sidecar holding
//! the original key and expiry. The in-memory index is rebuilt from the
//! sidecars on startup.

use crate::cache::keys::fingerprint;
use crate::cache::storage::KvStore;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const TEMP_EXTENSION: &str = "tmp";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the file store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileKvStoreConfig {
    /// Root directory for value files
    pub root_path: PathBuf,
    /// fsync every write
    pub sync_writes: bool,
}

impl Default for FileKvStoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/cache/tiered-response-cache"),
            sync_writes: false,
        }
    }
}

/// Sidecar stored next to each value file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    key: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct IndexRecord {
    path: PathBuf,
    expires_at: DateTime<Utc>,
}

// =============================================================================
// File KV Store
// =============================================================================

/// Disk-backed `KvStore`
pub struct FileKvStore {
    root_path: PathBuf,
    index: RwLock<HashMap<String, IndexRecord>>,
    sync_writes: bool,
}

impl FileKvStore {
    /// Open a store rooted at `root_path`
    pub async fn open(root_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(FileKvStoreConfig {
            root_path: root_path.into(),
            ..Default::default()
        })
        .await
    }

    /// Open with full config, rebuilding the index from disk
    pub async fn with_config(config: FileKvStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let store = Self {
            root_path: config.root_path,
            index: RwLock::new(HashMap::new()),
            sync_writes: config.sync_writes,
        };
        let rebuilt = store.scan().await?;
        let count = rebuilt.len();
        *store.index.write() = rebuilt;

        tracing::info!(root = %store.root_path.display(), entries = count, "Durable file store opened");
        Ok(store)
    }

    /// Number of indexed keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn scan(&self) -> Result<HashMap<String, IndexRecord>> {
        let mut index = HashMap::new();
        let now = Utc::now();

        let mut shards = fs::read_dir(&self.root_path).await?;
        while let Some(shard) = shards.next_entry().await? {
            let shard_path = shard.path();
            if !shard.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let mut files = match fs::read_dir(&shard_path).await {
                Ok(files) => files,
                Err(_) => continue,
            };
            while let Some(file) = files.next_entry().await? {
                let meta_path = file.path();
                if meta_path.extension().map_or(false, |ext| ext == TEMP_EXTENSION) {
                    let _ = fs::remove_file(&meta_path).await;
                    continue;
                }
                if meta_path.extension().map_or(true, |ext| ext != "meta") {
                    continue;
                }
                let sidecar = match read_sidecar(&meta_path).await {
                    Some(sidecar) => sidecar,
                    None => continue,
                };
                let data_path = meta_path.with_extension("");
                if sidecar.expires_at <= now || !fs::try_exists(&data_path).await.unwrap_or(false) {
                    remove_pair(&data_path).await;
                    continue;
                }
                index.insert(
                    sidecar.key,
                    IndexRecord {
                        path: data_path,
                        expires_at: sidecar.expires_at,
                    },
                );
            }
        }
        Ok(index)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = fingerprint(key.as_bytes());
        self.root_path.join(&digest[..2]).join(digest)
    }

    fn lookup(&self, key: &str) -> Option<IndexRecord> {
        self.index.read().get(key).cloned()
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let record = match self.lookup(key) {
            Some(record) => record,
            None => return Ok(None),
        };
        if record.expires_at <= Utc::now() {
            self.index.write().remove(key);
            remove_pair(&record.path).await;
            return Ok(None);
        }
        match fs::read(&record.path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.index.write().remove(key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes, expiration_ttl_secs: u64) -> Result<()> {
        let data_path = self.path_for(key);
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        write_atomic(&data_path, &value, self.sync_writes).await?;

        let expires_at = Utc::now() + ChronoDuration::seconds(expiration_ttl_secs.min(i64::MAX as u64 / 1000) as i64);
        let sidecar = Sidecar {
            key: key.to_string(),
            expires_at,
        };
        write_atomic(
            &data_path.with_extension("meta"),
            &serde_json::to_vec(&sidecar)?,
            self.sync_writes,
        )
        .await?;

        self.index.write().insert(
            key.to_string(),
            IndexRecord {
                path: data_path,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.index.write().remove(key);
        match removed {
            Some(record) => {
                remove_pair(&record.path).await;
                Ok(record.expires_at > Utc::now())
            }
            None => Ok(false),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .index
            .read()
            .iter()
            .filter(|(key, record)| key.starts_with(prefix) && record.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> Result<bool> {
        let check_path = self.root_path.join(".health_check");
        match fs::write(&check_path, b"ok").await {
            Ok(_) => {
                let _ = fs::remove_file(&check_path).await;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

/// Write to a unique temp file in the target's directory, then rename over the target
///
/// Readers see either the previous contents or the new ones, never a partial write.
async fn write_atomic(target: &Path, data: &[u8], sync: bool) -> Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!("{}.{}.{}", name, Uuid::new_v4().simple(), TEMP_EXTENSION));

    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        if sync {
            file.sync_all().await?;
        }
        drop(file);
        fs::rename(&temp, target).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_sidecar(path: &Path) -> Option<Sidecar> {
    let raw = fs::read(path).await.ok()?;
    serde_json::from_slice(&raw).ok()
}

async fn remove_pair(data_path: &Path) {
    let _ = fs::remove_file(data_path).await;
    let _ = fs::remove_file(data_path.with_extension("meta")).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_basic_operations() {
        let tmp = TempDir::new().unwrap();
        let store = FileKvStore::open(tmp.path()).await.unwrap();

        store.put("file:GET:/a", Bytes::from_static(b"hello"), 60).await.unwrap();
        assert_eq!(store.get("file:GET:/a").await.unwrap().unwrap().as_ref(), b"hello");
        assert_eq!(store.list("file:").await.unwrap(), vec!["file:GET:/a".to_string()]);

        assert!(store.delete("file:GET:/a").await.unwrap());
        assert!(!store.delete("file:GET:/a").await.unwrap());
        assert!(store.get("file:GET:/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let store = FileKvStore::open(tmp.path()).await.unwrap();
            store.put("api:GET:/x", Bytes::from_static(b"persisted"), 600).await.unwrap();
            store.put("api:GET:/y", Bytes::from_static(b"also"), 600).await.unwrap();
        }

        let reopened = FileKvStore::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.get("api:GET:/x").await.unwrap().unwrap().as_ref(),
            b"persisted"
        );
    }

    #[tokio::test]
    async fn test_expired_values_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let store = FileKvStore::open(tmp.path()).await.unwrap();
        store.put("k", Bytes::from_static(b"v"), 0).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key_never_tear() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileKvStore::open(tmp.path()).await.unwrap());
        const VALUE_LEN: usize = 64 * 1024;

        let tasks: Vec<_> = (0..64u8)
            .map(|writer| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put("file:GET:/same", Bytes::from(vec![writer; VALUE_LEN]), 600)
                        .await
                        .unwrap();
                    store.get("file:GET:/same").await.unwrap()
                })
            })
            .collect();

        for task in tasks {
            let value = task.await.unwrap().expect("value present after put");
            assert_eq!(value.len(), VALUE_LEN);
            assert!(value.iter().all(|b| *b == value[0]), "torn value");
        }

        let mut leftovers = Vec::new();
        for shard in std::fs::read_dir(tmp.path()).unwrap() {
            let shard = shard.unwrap().path();
            if shard.is_dir() {
                for file in std::fs::read_dir(&shard).unwrap() {
                    leftovers.push(file.unwrap().path());
                }
            }
        }
        assert!(leftovers.iter().all(|p| p.extension().map_or(true, |ext| ext != TEMP_EXTENSION)));
        assert_eq!(leftovers.len(), 2);

        let reopened = FileKvStore::open(tmp.path()).await.unwrap();
        let value = reopened.get("file:GET:/same").await.unwrap().unwrap();
        assert!(value.iter().all(|b| *b == value[0]));
    }

    #[tokio::test]
    async fn test_health_check() {
        let tmp = TempDir::new().unwrap();
        let store = FileKvStore::open(tmp.path()).await.unwrap();
        assert!(store.health_check().await.unwrap());
    }
}
