//! Cache storage trait and implementations.
//!
//! Stores are write-once per key: `put_if_absent` publishes a blob only when
//! no entry exists, and a published entry is never replaced. Concurrent
//! writers of one key race to publish; exactly one wins and the others see
//! [`SaveOutcome::AlreadyPresent`].

use crate::keys::sanitize_key;
use crate::types::{CacheEntry, SaveOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use trellis_core::{Error, Result};

/// Trait for cache storage backends.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `blob` under `key` unless an entry already exists.
    async fn put_if_absent(&self, key: &str, blob: Vec<u8>) -> Result<SaveOutcome>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<CacheEntry>>;
}

fn checksum(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

fn write_entry(file: &mut tempfile::NamedTempFile, sum: &str, blob: &[u8]) -> std::io::Result<()> {
    file.write_all(sum.as_bytes())?;
    file.write_all(b"\n")?;
    file.write_all(blob)?;
    file.as_file().sync_all()
}

/// In-process store, used by tests and single-invocation runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, (CacheEntry, Arc<Vec<u8>>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).map(|(_, blob)| blob.as_ref().clone()))
    }

    async fn put_if_absent(&self, key: &str, blob: Vec<u8>) -> Result<SaveOutcome> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(SaveOutcome::AlreadyPresent);
        }

        let entry = CacheEntry {
            key: key.to_string(),
            size_bytes: blob.len() as u64,
            created_at: Utc::now(),
            checksum: checksum(&blob),
        };
        entries.insert(key.to_string(), (entry.clone(), Arc::new(blob)));
        Ok(SaveOutcome::Stored(entry))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, (entry, _))| entry.clone())
            .collect())
    }
}

const ENTRY_EXTENSION: &str = "entry";
const CHECKSUM_LEN: usize = 64;

/// Filesystem-backed store.
///
/// Each entry is one file `<root>/<key>.entry` holding the hex SHA-256 of
/// the blob, a newline, then the blob. Files are written to a temporary
/// file in `root` and published with a no-clobber rename, so readers
/// never observe a partial entry.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_dir
            .join(format!("{}.{}", sanitize_key(key), ENTRY_EXTENSION))
    }

    fn io_error(context: &str, path: &Path, e: std::io::Error) -> Error {
        Error::CacheWriteFailed(format!("{} {}: {}", context, path.display(), e))
    }
}

#[async_trait]
impl CacheStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if contents.len() <= CHECKSUM_LEN || contents[CHECKSUM_LEN] != b'\n' {
            return Err(Error::CacheCorrupt(format!(
                "malformed entry {}",
                path.display()
            )));
        }
        let (header, rest) = contents.split_at(CHECKSUM_LEN + 1);
        let blob = rest.to_vec();

        if &header[..CHECKSUM_LEN] != checksum(&blob).as_bytes() {
            return Err(Error::CacheCorrupt(format!(
                "checksum mismatch for {}",
                path.display()
            )));
        }

        debug!(key, bytes = blob.len(), "Cache hit");
        Ok(Some(blob))
    }

    async fn put_if_absent(&self, key: &str, blob: Vec<u8>) -> Result<SaveOutcome> {
        let path = self.key_path(key);
        if tokio::fs::try_exists(&path).await? {
            return Ok(SaveOutcome::AlreadyPresent);
        }

        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| Self::io_error("failed to create cache dir", &self.root_dir, e))?;

        let root_dir = self.root_dir.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<SaveOutcome> {
            let sum = checksum(&blob);

            let mut tmp = tempfile::NamedTempFile::new_in(&root_dir)
                .map_err(|e| Self::io_error("failed to create temp file in", &root_dir, e))?;
            if let Err(e) = write_entry(&mut tmp, &sum, &blob) {
                return Err(Self::io_error("failed to write", tmp.path(), e));
            }

            match tmp.persist_noclobber(&path) {
                Ok(_) => Ok(SaveOutcome::Stored(CacheEntry {
                    key,
                    size_bytes: blob.len() as u64,
                    created_at: Utc::now(),
                    checksum: sum,
                })),
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(key = %key, "Lost publish race, entry already present");
                    Ok(SaveOutcome::AlreadyPresent)
                }
                Err(e) => Err(Self::io_error("failed to publish", &path, e.error)),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("cache writer task failed: {}", e)))?
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.key_path(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<CacheEntry>> {
        if !tokio::fs::try_exists(&self.root_dir).await? {
            return Ok(vec![]);
        }

        let sanitized_prefix = sanitize_key(prefix);
        let mut entries = vec![];
        let mut read_dir = tokio::fs::read_dir(&self.root_dir).await?;

        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !key.starts_with(&sanitized_prefix) {
                continue;
            }

            let metadata = dir_entry.metadata().await?;
            let size = metadata.len();
            if size <= CHECKSUM_LEN as u64 {
                warn!(path = %path.display(), "Skipping malformed cache entry");
                continue;
            }

            let mut header = vec![0u8; CHECKSUM_LEN];
            {
                use tokio::io::AsyncReadExt;
                let mut file = tokio::fs::File::open(&path).await?;
                file.read_exact(&mut header).await?;
            }

            let created_at: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            entries.push(CacheEntry {
                key: key.to_string(),
                size_bytes: size - CHECKSUM_LEN as u64 - 1,
                created_at,
                checksum: String::from_utf8_lossy(&header).into_owned(),
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn exercise_write_once(store: &dyn CacheStore) {
        assert_eq!(store.get("pip-linux-00").await.unwrap(), None);

        let first = store.put_if_absent("pip-linux-00", b"first".to_vec()).await.unwrap();
        assert!(first.is_stored());

        let second = store.put_if_absent("pip-linux-00", b"second".to_vec()).await.unwrap();
        assert_eq!(second, SaveOutcome::AlreadyPresent);

        assert_eq!(store.get("pip-linux-00").await.unwrap(), Some(b"first".to_vec()));
        assert!(store.exists("pip-linux-00").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_write_once() {
        let store = MemoryStore::new();
        exercise_write_once(&store).await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_list_filters_by_prefix() {
        let store = MemoryStore::new();
        store.put_if_absent("pip-linux-01", vec![1]).await.unwrap();
        store.put_if_absent("npm-linux-01", vec![2]).await.unwrap();

        let listed = store.list("pip-").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "pip-linux-01");
        assert_eq!(store.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_filesystem_store_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("cache"));
        exercise_write_once(&store).await;
    }

    #[tokio::test]
    async fn test_filesystem_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        store.put_if_absent("pip-macos-01", vec![1, 2, 3]).await.unwrap();
        store.put_if_absent("pip-linux-01", vec![4]).await.unwrap();
        store.put_if_absent("npm-linux-01", vec![5]).await.unwrap();

        let listed = store.list("pip-").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["pip-linux-01", "pip-macos-01"]);
        assert_eq!(listed[1].size_bytes, 3);
        assert_eq!(listed[1].checksum, checksum(&[1, 2, 3]));

        assert!(store.delete("pip-linux-01").await.unwrap());
        assert!(!store.delete("pip-linux-01").await.unwrap());
        assert_eq!(store.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_filesystem_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        store.put_if_absent("k", b"payload".to_vec()).await.unwrap();

        let path = store.key_path("k");
        let mut contents = std::fs::read(&path).unwrap();
        let last = contents.len() - 1;
        contents[last] ^= 0xff;
        std::fs::write(&path, contents).unwrap();

        assert!(matches!(store.get("k").await, Err(Error::CacheCorrupt(_))));
    }

    #[tokio::test]
    async fn test_concurrent_writers_publish_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FilesystemStore::new(dir.path()));

        let writers = (0..8u8).map(|i| {
            let store = Arc::clone(&store);
            async move { store.put_if_absent("race", vec![i; 4096]).await.unwrap() }
        });
        let outcomes = futures::future::join_all(writers).await;

        assert_eq!(outcomes.iter().filter(|o| o.is_stored()).count(), 1);
        let blob = store.get("race").await.unwrap().unwrap();
        assert_eq!(blob.len(), 4096);
        assert!(blob.iter().all(|b| *b == blob[0]));
        assert_eq!(store.list("").await.unwrap().len(), 1);
    }
}
