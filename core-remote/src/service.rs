//! # Music Service
//!
//! Typed operations over the remote protocol.
//!
//! ## Read-Through Caching
//!
//! Listing calls take a `refresh` flag:
//!
//! 1. Without `refresh`, a cached value is returned when present.
//! 2. Otherwise the live request runs and its parsed result is written back.
//! 3. If the live request fails (anything but cancellation), the last cached
//!    value is returned instead. Index listings degrade further to an empty
//!    [`Indexes`] so browsing screens stay usable offline.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let folders = service.get_music_folders(false, &cancel).await?;
//! let indexes = service.get_indexes(Some(&folders[0].id), false, &cancel).await?;
//! ```

use crate::cache::{CacheKey, ResponseCache};
use crate::envelope::ResponseEnvelope;
use crate::error::{RemoteError, Result};
use crate::executor::{ProgressSink, RequestExecutor};
use crate::fetcher::{MediaFetcher, MediaSource, MediaStream};
use crate::models::{Indexes, License, MediaItem, MusicFolder, MusicFolders, RandomSongs};
use crate::request::RequestSpec;
use crate::version::{features, ProtocolVersion, ServerVersion};
use async_trait::async_trait;
use bytes::Bytes;
use core_async::sync::CancellationToken;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Supplies tracks for shuffle play.
#[async_trait]
pub trait RandomSongSource: Send + Sync {
    async fn random_songs(&self, count: usize, cancel: &CancellationToken) -> Result<Vec<MediaItem>>;
}

pub struct MusicService {
    executor: Arc<RequestExecutor>,
    cache: ResponseCache,
    fetcher: Arc<MediaFetcher>,
    versions: Arc<ServerVersion>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl MusicService {
    pub fn new(
        executor: Arc<RequestExecutor>,
        cache: ResponseCache,
        fetcher: Arc<MediaFetcher>,
        versions: Arc<ServerVersion>,
    ) -> Self {
        Self {
            executor,
            cache,
            fetcher,
            versions,
            progress: None,
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn server_version(&self) -> Option<ProtocolVersion> {
        self.versions.get()
    }

    pub fn versions(&self) -> Arc<ServerVersion> {
        Arc::clone(&self.versions)
    }

    pub fn fetcher(&self) -> Arc<MediaFetcher> {
        Arc::clone(&self.fetcher)
    }

    fn cache_key(&self, endpoint: &str, param: Option<&str>) -> CacheKey {
        CacheKey::new(&self.executor.server().identity(), endpoint, param)
    }

    /// Send a structured request and unwrap its envelope.
    pub(crate) async fn call(
        &self,
        spec: &RequestSpec,
        cancel: &CancellationToken,
    ) -> Result<ResponseEnvelope> {
        let response = self
            .executor
            .execute(spec, cancel, self.progress.as_deref())
            .await?;

        let envelope = match ResponseEnvelope::parse(&response.body) {
            Ok(envelope) => envelope,
            Err(_) if !response.is_success() => {
                return Err(RemoteError::Http {
                    endpoint: spec.endpoint.clone(),
                    status: response.status,
                })
            }
            Err(e) => return Err(e),
        };
        if let Some(version) = envelope.version.as_deref() {
            self.versions.observe(version);
        }
        envelope.into_result()
    }

    async fn cached_read<T, Fut>(&self, key: CacheKey, refresh: bool, fetch: Fut) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        if !refresh {
            if let Some(cached) = self.cache.read(&key).await {
                return Ok(cached);
            }
        }

        match fetch.await {
            Ok(value) => {
                if let Err(e) = self.cache.write(&key, &value).await {
                    warn!(endpoint = key.endpoint(), error = %e, "Could not cache response");
                }
                Ok(value)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => match self.cache.read(&key).await {
                Some(cached) => {
                    warn!(endpoint = key.endpoint(), error = %e, "Live fetch failed, using cached copy");
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    // ========================================================================
    // Server
    // ========================================================================

    #[instrument(skip_all)]
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.call(&RequestSpec::new("ping"), cancel).await?;
        debug!(version = ?self.versions.get(), "Ping ok");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn get_license(&self, cancel: &CancellationToken) -> Result<License> {
        let mut envelope = self.call(&RequestSpec::new("getLicense"), cancel).await?;
        envelope.take("license")
    }

    // ========================================================================
    // Cacheable listings
    // ========================================================================

    #[instrument(skip(self, cancel))]
    pub async fn get_music_folders(
        &self,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<MusicFolder>> {
        let key = self.cache_key("getMusicFolders", None);
        self.cached_read(key, refresh, async {
            let mut envelope = self.call(&RequestSpec::new("getMusicFolders"), cancel).await?;
            let folders: MusicFolders = envelope.take_or_default("musicFolders")?;
            Ok(folders.folders)
        })
        .await
    }

    #[instrument(skip(self, cancel))]
    pub async fn get_indexes(
        &self,
        folder_id: Option<&str>,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Indexes> {
        let key = self.cache_key("getIndexes", folder_id);
        let spec = RequestSpec::new("getIndexes")
            .param_opt("musicFolderId", folder_id)
            .read_timeout(self.executor.network().long_read_timeout);
        let result = self
            .cached_read(key, refresh, async {
                let mut envelope = self.call(&spec, cancel).await?;
                envelope.take_or_default::<Indexes>("indexes")
            })
            .await;
        empty_on_failure("getIndexes", result)
    }

    /// Artists by ID3 tags. Requires protocol 1.8.
    #[instrument(skip(self, cancel))]
    pub async fn get_artists(&self, refresh: bool, cancel: &CancellationToken) -> Result<Indexes> {
        self.versions.require("getArtists", features::ARTISTS)?;
        let key = self.cache_key("getArtists", None);
        let spec = RequestSpec::new("getArtists")
            .read_timeout(self.executor.network().long_read_timeout);
        let result = self
            .cached_read(key, refresh, async {
                let mut envelope = self.call(&spec, cancel).await?;
                envelope.take_or_default::<Indexes>("artists")
            })
            .await;
        empty_on_failure("getArtists", result)
    }

    /// Random tracks from the whole library. Never cached: every call should
    /// give a different answer.
    #[instrument(skip(self, cancel))]
    pub async fn get_random_songs(
        &self,
        size: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaItem>> {
        let spec = RequestSpec::new("getRandomSongs").param("size", size);
        let mut envelope = self.call(&spec, cancel).await?;
        let random: RandomSongs = envelope.take_or_default("randomSongs")?;
        debug!(count = random.songs.len(), "Random songs received");
        Ok(random.songs)
    }

    // ========================================================================
    // Binary payloads
    // ========================================================================

    pub async fn stream(
        &self,
        item: &MediaItem,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<MediaStream> {
        self.fetcher.fetch_stream(item, offset, cancel.clone()).await
    }

    pub async fn cover_art(
        &self,
        item: &MediaItem,
        size: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>> {
        self.fetcher.cover_art(item, size, cancel).await
    }

    pub async fn avatar(&self, username: &str, cancel: &CancellationToken) -> Result<Option<Bytes>> {
        self.fetcher.avatar(username, cancel).await
    }
}

#[async_trait]
impl RandomSongSource for MusicService {
    async fn random_songs(&self, count: usize, cancel: &CancellationToken) -> Result<Vec<MediaItem>> {
        self.get_random_songs(count, cancel).await
    }
}

fn empty_on_failure(endpoint: &str, result: Result<Indexes>) -> Result<Indexes> {
    match result {
        Err(e) if !e.is_cancelled() => {
            info!(endpoint, error = %e, "Listing unavailable, returning empty result");
            Ok(Indexes::default())
        }
        other => other,
    }
}
