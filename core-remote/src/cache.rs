//! # Response Cache
//!
//! Disk-backed "last known good" store for read-only listings.
//!
//! ## Overview
//!
//! One file per [`CacheKey`] under the cache directory. Entries never expire;
//! an entry is replaced only when a fresh response for the same key is
//! written. Each file is a small JSON document with an explicit format
//! version so a future layout change can be detected and ignored instead of
//! being misread:
//!
//! ```text
//! { "format": 1, "endpoint": "getIndexes", "written_at": "...", "payload": { ... } }
//! ```
//!
//! Unreadable, corrupt or foreign-format files are reported as absent.

use crate::error::{RemoteError, Result};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bumped whenever the on-disk layout of cached payloads changes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Deterministic key of one cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    endpoint: String,
    fingerprint: String,
}

impl CacheKey {
    /// `server_identity` is the server URL plus account; `param` is the single
    /// value that tells two responses of the same endpoint apart (a folder id).
    pub fn new(server_identity: &str, endpoint: &str, param: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(server_identity.as_bytes());
        hasher.update([0u8]);
        hasher.update(endpoint.as_bytes());
        hasher.update([0u8]);
        match param {
            Some(param) => {
                hasher.update([1u8]);
                hasher.update(param.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self {
            endpoint: endpoint.to_string(),
            fingerprint: hex::encode(hasher.finalize()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.endpoint, &self.fingerprint[..32])
    }
}

#[derive(Serialize)]
struct StoredEntryRef<'a, T> {
    format: u32,
    endpoint: &'a str,
    written_at: DateTime<Utc>,
    payload: &'a T,
}

#[derive(Deserialize)]
struct StoredEntry<T> {
    format: u32,
    payload: T,
}

#[derive(Deserialize)]
struct StoredHeader {
    format: u32,
}

pub struct ResponseCache {
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    dir: PathBuf,
}

impl ResponseCache {
    pub fn new(fs: Arc<dyn FileSystemAccess>, clock: Arc<dyn Clock>, dir: PathBuf) -> Self {
        Self { fs, clock, dir }
    }

    pub fn directory(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Last value written for `key`, or `None`.
    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let path = self.path_for(key);
        match self.fs.exists(&path).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(endpoint = key.endpoint(), error = %e, "Cache lookup failed");
                return None;
            }
        }

        let bytes = match self.fs.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(endpoint = key.endpoint(), error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_slice::<StoredHeader>(&bytes) {
            Ok(header) if header.format == CACHE_FORMAT_VERSION => {}
            Ok(header) => {
                warn!(
                    endpoint = key.endpoint(),
                    found = header.format,
                    expected = CACHE_FORMAT_VERSION,
                    "Ignoring cache entry with unknown format"
                );
                return None;
            }
            Err(e) => {
                warn!(endpoint = key.endpoint(), error = %e, "Ignoring corrupt cache entry");
                return None;
            }
        }

        match serde_json::from_slice::<StoredEntry<T>>(&bytes) {
            Ok(entry) => {
                debug!(endpoint = key.endpoint(), format = entry.format, "Cache hit");
                Some(entry.payload)
            }
            Err(e) => {
                warn!(endpoint = key.endpoint(), error = %e, "Ignoring undecodable cache entry");
                None
            }
        }
    }

    /// Replace the entry for `key`.
    pub async fn write<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let entry = StoredEntryRef {
            format: CACHE_FORMAT_VERSION,
            endpoint: key.endpoint(),
            written_at: self.clock.now(),
            payload: value,
        };
        let encoded = serde_json::to_vec(&entry)
            .map_err(|e| RemoteError::Cache(format!("encode {}: {}", key.endpoint(), e)))?;

        self.fs.create_dir_all(&self.dir).await?;
        self.fs
            .write_file(&self.path_for(key), Bytes::from(encoded))
            .await?;
        debug!(endpoint = key.endpoint(), "Cache entry written");
        Ok(())
    }

    /// Drop the entry for `key`, if any.
    pub async fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.path_for(key);
        if self.fs.exists(&path).await? {
            self.fs.delete_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::FileMetadata;
    use bridge_traits::time::FixedClock;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;

    #[derive(Default)]
    struct MapFs {
        files: Mutex<HashMap<PathBuf, Bytes>>,
        writes: Mutex<usize>,
    }

    #[async_trait]
    impl FileSystemAccess for MapFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/cache"))
        }
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/data"))
        }
        async fn exists(&self, path: &Path) -> BridgeResult<bool> {
            Ok(self.files.lock().contains_key(path))
        }
        async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
            let size = self.files.lock().get(path).map(|b| b.len() as u64);
            size.map(|size| FileMetadata {
                size,
                modified_at: None,
                is_directory: false,
            })
            .ok_or_else(|| BridgeError::OperationFailed("missing".into()))
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
            self.files
                .lock()
                .get(path)
                .cloned()
                .ok_or_else(|| BridgeError::OperationFailed("missing".into()))
        }
        async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
            *self.writes.lock() += 1;
            self.files.lock().insert(path.to_path_buf(), data);
            Ok(())
        }
        async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
            self.files.lock().remove(path);
            Ok(())
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            Err(BridgeError::NotAvailable("rename".into()))
        }
        async fn open_read_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn core_async::io::AsyncRead + Send + Unpin>> {
            Err(BridgeError::NotAvailable("open_read_stream".into()))
        }
        async fn open_write_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
            Err(BridgeError::NotAvailable("open_write_stream".into()))
        }
        async fn open_append_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
            Err(BridgeError::NotAvailable("open_append_stream".into()))
        }
    }

    fn cache(fs: Arc<MapFs>) -> ResponseCache {
        let clock = Arc::new(FixedClock(DateTime::<Utc>::UNIX_EPOCH));
        ResponseCache::new(fs, clock, PathBuf::from("/cache/responses"))
    }

    #[test]
    fn keys_are_deterministic_and_disambiguated() {
        let a = CacheKey::new("https://s|alice", "getIndexes", Some("1"));
        let b = CacheKey::new("https://s|alice", "getIndexes", Some("1"));
        let c = CacheKey::new("https://s|alice", "getIndexes", Some("2"));
        let d = CacheKey::new("https://s|bob", "getIndexes", Some("1"));
        assert_eq!(a, b);
        assert_ne!(a.file_name(), c.file_name());
        assert_ne!(a.file_name(), d.file_name());
        assert!(a.file_name().starts_with("getIndexes-"));
    }

    #[test]
    fn missing_param_differs_from_empty_param() {
        let none = CacheKey::new("https://s|alice", "getIndexes", None);
        let empty = CacheKey::new("https://s|alice", "getIndexes", Some(""));
        assert_ne!(none, empty);
        assert_ne!(none.file_name(), empty.file_name());
    }

    #[tokio::test]
    async fn read_returns_last_write() {
        let fs = Arc::new(MapFs::default());
        let cache = cache(fs.clone());
        let key = CacheKey::new("srv", "getMusicFolders", None);

        assert_eq!(cache.read::<Vec<String>>(&key).await, None);

        cache.write(&key, &vec!["one".to_string()]).await.unwrap();
        assert_eq!(cache.read::<Vec<String>>(&key).await, Some(vec!["one".to_string()]));

        cache.write(&key, &vec!["two".to_string()]).await.unwrap();
        assert_eq!(cache.read::<Vec<String>>(&key).await, Some(vec!["two".to_string()]));
        assert_eq!(*fs.writes.lock(), 2);
    }

    #[tokio::test]
    async fn foreign_format_and_corrupt_files_read_as_absent() {
        let fs = Arc::new(MapFs::default());
        let cache = cache(fs.clone());
        let key = CacheKey::new("srv", "getIndexes", Some("3"));
        let path = cache.directory().join(key.file_name());

        fs.files.lock().insert(
            path.clone(),
            Bytes::from_static(br#"{"format":99,"endpoint":"getIndexes","payload":[1]}"#),
        );
        assert_eq!(cache.read::<Vec<u32>>(&key).await, None);

        fs.files.lock().insert(path, Bytes::from_static(b"\xac\xed\x00\x05sr"));
        assert_eq!(cache.read::<Vec<u32>>(&key).await, None);
    }

    #[tokio::test]
    async fn remove_drops_the_entry() {
        let fs = Arc::new(MapFs::default());
        let cache = cache(fs);
        let key = CacheKey::new("srv", "getArtists", None);
        cache.write(&key, &1u32).await.unwrap();
        cache.remove(&key).await.unwrap();
        assert_eq!(cache.read::<u32>(&key).await, None);
    }
}
