//! # Media Fetcher
//!
//! Streams audio and image payloads through the [`RequestExecutor`].
//!
//! ## Overview
//!
//! - **Resume**: `offset > 0` adds `Range: bytes=<offset>-`. A `206` answer
//!   continues at the offset; a plain `200` means the server ignored the
//!   range and the caller must start over.
//! - **Offset-scaled read timeout**: transcoding servers need longer to reach
//!   deep offsets, so the first read timeout is
//!   `download_read_timeout + offset * offset_timeout_per_mb / 1 MB`.
//! - **Disguised errors**: a structured content type on a binary endpoint is
//!   an error envelope. It is parsed into a typed error and never handed to
//!   the caller as media.
//! - **Artwork**: cover art and avatars are serialized per key with a
//!   [`KeyedMutex`] and saved to a content-addressed file, so a second
//!   request for the same key waits and then reads the saved file.

use crate::envelope::{is_structured_content_type, ResponseEnvelope};
use crate::error::{RemoteError, Result};
use crate::executor::RequestExecutor;
use crate::models::MediaItem;
use crate::request::RequestSpec;
use crate::version::{features, ServerVersion};
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpStreamResponse;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_async::io::{AsyncRead, AsyncReadExt};
use core_async::sync::{CancellationToken, KeyedMutex};
use core_runtime::config::{NetworkConfig, PlaybackConfig};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Error envelopes are small; anything beyond this is not worth parsing.
const MAX_ERROR_BODY: u64 = 64 * 1024;
const MAX_ARTWORK_BYTES: u64 = 32 * 1024 * 1024;
const BYTES_PER_MB: f64 = 1_000_000.0;

/// Binary payload of a media fetch.
pub struct MediaStream {
    pub status: u16,
    /// Byte position of the first byte in `body`. Zero unless resumed.
    pub offset: u64,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

impl MediaStream {
    pub fn is_resumed(&self) -> bool {
        self.offset > 0
    }

    /// Total size of the resource when the server told us.
    pub fn total_len(&self) -> Option<u64> {
        self.content_length.map(|len| len + self.offset)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("status", &self.status)
            .field("offset", &self.offset)
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Source of media bytes for the download worker.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch_stream(
        &self,
        item: &MediaItem,
        offset: u64,
        cancel: CancellationToken,
    ) -> Result<MediaStream>;
}

/// First read timeout for a fetch starting at `offset`.
pub fn read_timeout_for_offset(network: &NetworkConfig, offset: u64) -> Duration {
    let per_byte = network.offset_timeout_per_mb.as_secs_f64() / BYTES_PER_MB;
    network.download_read_timeout + Duration::from_secs_f64(per_byte * offset as f64)
}

pub struct MediaFetcher {
    executor: Arc<RequestExecutor>,
    fs: Arc<dyn FileSystemAccess>,
    versions: Arc<ServerVersion>,
    playback: PlaybackConfig,
    artwork_dir: PathBuf,
    artwork_locks: KeyedMutex<String>,
}

impl MediaFetcher {
    pub fn new(
        executor: Arc<RequestExecutor>,
        fs: Arc<dyn FileSystemAccess>,
        versions: Arc<ServerVersion>,
        playback: PlaybackConfig,
        artwork_dir: PathBuf,
    ) -> Self {
        Self {
            executor,
            fs,
            versions,
            playback,
            artwork_dir,
            artwork_locks: KeyedMutex::new(),
        }
    }

    pub fn stream_spec(&self, item: &MediaItem, offset: u64) -> RequestSpec {
        RequestSpec::new("stream")
            .param("id", &item.id)
            .param_opt("maxBitRate", self.playback.max_bitrate.filter(|b| *b > 0))
            .read_timeout(read_timeout_for_offset(self.executor.network(), offset))
            .range_from(offset)
    }

    /// Saved location of an artwork key, addressed by a hash of server and key.
    pub fn artwork_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.executor.server().identity().as_bytes());
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        self.artwork_dir
            .join(format!("{}.img", hex::encode(hasher.finalize())))
    }

    /// Cover art of `item`, or `None` when the item has none.
    ///
    /// `size` is forwarded only when the server does the scaling; otherwise
    /// the full image is fetched once and saved for every size.
    #[instrument(skip(self, item, cancel), fields(item_id = %item.id))]
    pub async fn cover_art(
        &self,
        item: &MediaItem,
        size: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>> {
        let Some(cover_id) = item.cover_art.as_deref() else {
            return Ok(None);
        };
        let size = size.filter(|_| self.playback.server_scaling);
        let key = match size {
            Some(size) => format!("cover:{}:{}", cover_id, size),
            None => format!("cover:{}", cover_id),
        };
        let spec = RequestSpec::new("getCoverArt")
            .param("id", cover_id)
            .param_opt("size", size);
        let save = !self.playback.server_scaling || self.playback.save_artwork;
        self.fetch_image(key, spec, save, cancel).await.map(Some)
    }

    /// Avatar of `username`. Older servers have none; that is not an error.
    #[instrument(skip(self, cancel))]
    pub async fn avatar(&self, username: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        if !self.versions.supports(features::AVATAR) {
            debug!("Server too old for avatars");
            return Ok(None);
        }
        let spec = RequestSpec::new("getAvatar").param("username", username);
        self.fetch_image(format!("avatar:{}", username), spec, true, cancel)
            .await
            .map(Some)
    }

    async fn fetch_image(
        &self,
        key: String,
        spec: RequestSpec,
        save: bool,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let _guard = self.artwork_locks.lock(key.clone()).await;
        let path = self.artwork_path(&key);

        if self.fs.exists(&path).await.unwrap_or(false) {
            match self.fs.read_file(&path).await {
                Ok(bytes) if !bytes.is_empty() => {
                    debug!(key = %key, "Artwork served from disk");
                    return Ok(bytes);
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Saved artwork unreadable"),
            }
        }

        let response = self.executor.execute_stream(&spec, cancel, None).await?;
        let mut response = self.ensure_binary(&spec.endpoint, response).await?;
        let bytes = read_limited(&mut response.body, MAX_ARTWORK_BYTES).await?;

        if save {
            let saved = async {
                self.fs.create_dir_all(&self.artwork_dir).await?;
                self.fs.write_file(&path, bytes.clone()).await
            };
            if let Err(e) = saved.await {
                warn!(key = %key, error = %e, "Could not save artwork");
            }
        }
        Ok(bytes)
    }

    /// Reject error envelopes and non-success statuses on binary endpoints.
    async fn ensure_binary(
        &self,
        endpoint: &str,
        mut response: HttpStreamResponse,
    ) -> Result<HttpStreamResponse> {
        let content_type = response.content_type().map(str::to_string);
        if let Some(content_type) = content_type.filter(|ct| is_structured_content_type(ct)) {
            let body = read_limited(&mut response.body, MAX_ERROR_BODY).await?;
            let envelope = ResponseEnvelope::parse(&body)?;
            if let Some(version) = envelope.version.as_deref() {
                self.versions.observe(version);
            }
            let error = envelope.error().unwrap_or_else(|| {
                RemoteError::InvalidResponse(format!(
                    "{}: expected binary payload, got {}",
                    endpoint, content_type
                ))
            });
            warn!(endpoint, status = response.status, error = %error, "Error payload on binary endpoint");
            return Err(error);
        }

        if !response.is_success() {
            return Err(RemoteError::Http {
                endpoint: endpoint.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl MediaSource for MediaFetcher {
    #[instrument(skip(self, item, cancel), fields(item_id = %item.id))]
    async fn fetch_stream(
        &self,
        item: &MediaItem,
        offset: u64,
        cancel: CancellationToken,
    ) -> Result<MediaStream> {
        let spec = self.stream_spec(item, offset);
        let response = self.executor.execute_stream(&spec, &cancel, None).await?;
        let response = self.ensure_binary(&spec.endpoint, response).await?;

        let resumed = offset > 0 && response.status == 206;
        if offset > 0 && !resumed {
            debug!(offset, status = response.status, "Range ignored, restarting from zero");
        }
        Ok(MediaStream {
            status: response.status,
            offset: if resumed { offset } else { 0 },
            content_length: response.content_length,
            content_type: response.content_type().map(str::to_string),
            body: response.body,
        })
    }
}

/// Read the whole body, failing when it is longer than `limit`.
async fn read_limited<R>(reader: &mut R, limit: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .await
        .map_err(BridgeError::from)?;
    if buf.len() as u64 > limit {
        return Err(RemoteError::InvalidResponse(format!(
            "payload exceeds {} bytes",
            limit
        )));
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = actual.as_secs_f64() - expected.as_secs_f64();
        assert!(diff.abs() < 1e-6, "{actual:?} != {expected:?}");
    }

    #[test]
    fn read_timeout_grows_with_offset() {
        let network = NetworkConfig::default();
        assert_eq!(read_timeout_for_offset(&network, 0), Duration::from_secs(30));
        assert_close(
            read_timeout_for_offset(&network, 5_000_000),
            Duration::from_secs(130),
        );
        assert_close(
            read_timeout_for_offset(&network, 1_000),
            Duration::from_millis(30_020),
        );
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let mut exact = std::io::Cursor::new(vec![7u8; 4]);
        assert_eq!(read_limited(&mut exact, 4).await.unwrap().len(), 4);

        let mut oversized = std::io::Cursor::new(vec![7u8; 5]);
        let err = read_limited(&mut oversized, 4).await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[test]
    fn stream_reports_total_length_for_resumed_transfers() {
        let stream = MediaStream {
            status: 206,
            offset: 100,
            content_length: Some(900),
            content_type: Some("audio/mpeg".into()),
            body: Box::new(core_async::io::empty()),
        };
        assert!(stream.is_resumed());
        assert_eq!(stream.total_len(), Some(1_000));
    }
}
