//! Storage and File System Abstractions
//!
//! Everything the core persists (response cache entries, partial and complete
//! media downloads, artwork) goes through [`FileSystemAccess`].

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Directory for data that can be rebuilt (response cache, artwork).
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Directory for data the user expects to keep (downloaded media).
    async fn get_data_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write a whole file, creating parent directories as needed.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Atomically move `from` to `to`, replacing `to` if it exists.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncRead + Send + Unpin>>;

    /// Open for writing from byte zero, truncating any existing content.
    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncWrite + Send + Unpin>>;

    /// Open for writing at the end of the file, creating it if missing.
    async fn open_append_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn core_async::io::AsyncWrite + Send + Unpin>>;

    /// Size of the file at `path`, or `None` when it does not exist.
    async fn file_size(&self, path: &Path) -> Result<Option<u64>> {
        if !self.exists(path).await? {
            return Ok(None);
        }
        Ok(Some(self.metadata(path).await?.size))
    }
}
