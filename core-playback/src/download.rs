//! # Download Worker
//!
//! Copies one media item from a [`MediaSource`] to local storage.
//!
//! ## Files
//!
//! ```text
//! <media_dir>/Artist/Album/01 Song.partial.mp3    bytes so far
//! <media_dir>/Artist/Album/01 Song.complete.mp3   finished download
//! <media_dir>/Artist/Album/01 Song.mp3            pinned (saved) download
//! ```
//!
//! Pinning renames the complete file to the saved name and unpinning renames
//! it back, so a saved file is never written directly.
//!
//! The size of the partial file is the resume offset. If the server answers
//! a ranged request with the whole file, the partial file is truncated and
//! written from zero. Only a fully copied stream is renamed to the complete
//! name.
//!
//! Cancellation is checked before the request and around every chunk read;
//! the writer is dropped on the way out so no file handle outlives the task.

use crate::error::{PlaybackError, Result};
use bridge_traits::storage::FileSystemAccess;
use core_async::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use core_async::sync::CancellationToken;
use core_remote::error::RemoteError;
use core_remote::fetcher::MediaSource;
use core_remote::models::{sanitize_component, MediaItem};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Partial and complete locations of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFile {
    pub partial: PathBuf,
    pub complete: PathBuf,
    pub saved: PathBuf,
}

impl DownloadFile {
    pub fn for_item(media_dir: &Path, item: &MediaItem) -> Self {
        let relative = item.local_path();
        let stem = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| sanitize_component(&item.id));
        let ext = item.effective_suffix();
        let parent = media_dir.join(relative.parent().unwrap_or_else(|| Path::new("")));
        Self {
            partial: parent.join(format!("{}.partial.{}", stem, ext)),
            complete: parent.join(format!("{}.complete.{}", stem, ext)),
            saved: parent.join(format!("{}.{}", stem, ext)),
        }
    }

    pub fn parent(&self) -> Option<&Path> {
        self.complete.parent()
    }

    /// The finished file, saved or not.
    pub async fn finished(&self, fs: &dyn FileSystemAccess) -> Option<&Path> {
        for path in [&self.saved, &self.complete] {
            if fs.exists(path).await.unwrap_or(false) {
                return Some(path.as_path());
            }
        }
        None
    }

    pub async fn is_complete(&self, fs: &dyn FileSystemAccess) -> bool {
        self.finished(fs).await.is_some()
    }

    pub async fn is_saved(&self, fs: &dyn FileSystemAccess) -> bool {
        fs.exists(&self.saved).await.unwrap_or(false)
    }

    /// Move a complete download to the saved name. Returns false when there
    /// is no complete file yet.
    pub async fn pin(&self, fs: &dyn FileSystemAccess) -> Result<bool> {
        if !fs.exists(&self.complete).await? {
            return Ok(self.is_saved(fs).await);
        }
        fs.rename(&self.complete, &self.saved).await?;
        Ok(true)
    }

    /// Move a saved download back to the cache name.
    pub async fn unpin(&self, fs: &dyn FileSystemAccess) -> Result<bool> {
        if !fs.exists(&self.saved).await? {
            return Ok(false);
        }
        fs.rename(&self.saved, &self.complete).await?;
        Ok(true)
    }

    /// Bytes already on disk for resume.
    pub async fn resume_offset(&self, fs: &dyn FileSystemAccess) -> u64 {
        fs.file_size(&self.partial).await.ok().flatten().unwrap_or(0)
    }

    /// Remove every file of the item, saved or not.
    pub async fn delete(&self, fs: &dyn FileSystemAccess) -> Result<()> {
        for path in [&self.partial, &self.complete, &self.saved] {
            if fs.exists(path).await? {
                fs.delete_file(path).await?;
            }
        }
        Ok(())
    }
}

/// Finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downloaded {
    /// Size of the complete file.
    pub bytes: u64,
    /// Bytes that came over the network in this run.
    pub transferred: u64,
}

/// Download `item` into `file`, resuming from any partial file.
///
/// `on_progress` receives the number of bytes on disk after each chunk.
#[instrument(skip_all, fields(item_id = %item.id))]
pub async fn transfer(
    source: &dyn MediaSource,
    fs: &dyn FileSystemAccess,
    item: &MediaItem,
    file: &DownloadFile,
    cancel: &CancellationToken,
    buffer_bytes: usize,
    on_progress: &(dyn Fn(u64, Option<u64>) + Send + Sync),
) -> Result<Downloaded> {
    if let Some(done) = file.finished(fs).await {
        let bytes = fs.file_size(done).await?.unwrap_or(0);
        debug!(bytes, "Already downloaded");
        return Ok(Downloaded {
            bytes,
            transferred: 0,
        });
    }
    if cancel.is_cancelled() {
        return Err(RemoteError::Cancelled.into());
    }

    if let Some(parent) = file.parent() {
        fs.create_dir_all(parent).await?;
    }
    let offset = file.resume_offset(fs).await;
    let mut stream = source.fetch_stream(item, offset, cancel.clone()).await?;
    let total = stream.total_len();

    let mut writer = if stream.is_resumed() {
        info!(offset, "Resuming download");
        fs.open_append_stream(&file.partial).await?
    } else {
        fs.open_write_stream(&file.partial).await?
    };

    let mut written = stream.offset;
    let mut transferred = 0u64;
    let mut buf = vec![0u8; buffer_bytes.max(1)];
    on_progress(written, total);

    loop {
        let read = core_async::select! {
            biased;
            _ = cancel.cancelled() => None,
            read = stream.body.read(&mut buf) => Some(read),
        };
        let n = match read {
            None => {
                drop(writer);
                debug!(written, "Download cancelled");
                return Err(RemoteError::Cancelled.into());
            }
            Some(read) => read.map_err(|e| PlaybackError::Bridge(e.into()))?,
        };
        if n == 0 {
            break;
        }
        write_chunk(&mut writer, &buf[..n]).await?;
        written += n as u64;
        transferred += n as u64;
        on_progress(written, total);
    }

    writer
        .shutdown()
        .await
        .map_err(|e| PlaybackError::Bridge(e.into()))?;
    drop(writer);

    if let Some(expected) = total {
        if written < expected {
            return Err(PlaybackError::Remote(RemoteError::InvalidResponse(format!(
                "stream ended at {} of {} bytes",
                written, expected
            ))));
        }
    }

    fs.rename(&file.partial, &file.complete).await?;
    info!(bytes = written, transferred, "Download complete");
    Ok(Downloaded {
        bytes: written,
        transferred,
    })
}

async fn write_chunk(writer: &mut Box<dyn AsyncWrite + Send + Unpin>, chunk: &[u8]) -> Result<()> {
    writer
        .write_all(chunk)
        .await
        .map_err(|e| PlaybackError::Bridge(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_mark_partial_and_complete() {
        let item = MediaItem::new("7", "Song").with_path("Artist/Album/01 Song.flac");
        let file = DownloadFile::for_item(Path::new("/media"), &item);
        assert_eq!(file.partial, PathBuf::from("/media/Artist/Album/01 Song.partial.flac"));
        assert_eq!(file.complete, PathBuf::from("/media/Artist/Album/01 Song.complete.flac"));
        assert_eq!(file.saved, PathBuf::from("/media/Artist/Album/01 Song.flac"));
    }

    #[test]
    fn items_without_path_use_their_id() {
        let item = MediaItem::new("42", "Song").with_suffix("ogg");
        let file = DownloadFile::for_item(Path::new("/media"), &item);
        assert_eq!(file.partial, PathBuf::from("/media/42.partial.ogg"));
    }

    #[test]
    fn unusable_server_path_stays_inside_media_dir() {
        let item = MediaItem::new("../../etc/passwd", "Song").with_path("..");
        let file = DownloadFile::for_item(Path::new("/media"), &item);
        assert_eq!(file.parent(), Some(Path::new("/media")));
        assert_eq!(file.partial, PathBuf::from("/media/.._.._etc_passwd.partial.mp3"));
    }
}
