//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem)
//! into the shared Rust core and hands out the long-lived components: the
//! protocol client, the queue coordinator and the event bus. Hosts build one
//! [`CoreService`] at startup and pass it around; nothing here is global.
//! Desktop apps typically enable the `desktop-shims` feature, which supplies
//! the reqwest and tokio bridges when none are injected.
//!
//! ```text
//!   CoreConfig ──► CoreService::bootstrap
//!                     │
//!                     ├─ RequestExecutor ─┬─ MusicService (+ ResponseCache)
//!                     │                   └─ MediaFetcher ──┐
//!                     ├─ JukeboxBridge ◄── MusicService      │
//!                     └─ QueueCoordinator ◄──────────────────┘
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_playback::{LocalPlayer, NullPlayer, QueueCoordinator};
pub use core_remote::MusicService;
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus, EventStream};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::SystemClock;
use core_playback::{CoordinatorConfig, JukeboxBridge};
use core_remote::jukebox::JukeboxApi;
use core_remote::{
    MediaFetcher, RandomSongSource, RequestExecutor, ResponseCache, ServerEndpoint, ServerVersion,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const RESPONSES_DIR: &str = "responses";
const ARTWORK_DIR: &str = "artwork";
const MEDIA_DIR: &str = "media";

/// Where the service keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDirectories {
    pub responses: PathBuf,
    pub artwork: PathBuf,
    pub media: PathBuf,
}

impl ServiceDirectories {
    /// Resolve directories from the config, falling back to the bridge's
    /// cache and data directories.
    pub async fn resolve(config: &CoreConfig) -> Result<Self> {
        let cache_root = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => config.file_system.get_cache_directory().await?,
        };
        let media = match &config.media_dir {
            Some(dir) => dir.clone(),
            None => config.file_system.get_data_directory().await?.join(MEDIA_DIR),
        };
        Ok(Self {
            responses: cache_root.join(RESPONSES_DIR),
            artwork: cache_root.join(ARTWORK_DIR),
            media,
        })
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    directories: ServiceDirectories,
    events: EventBus,
    music: Arc<MusicService>,
    coordinator: Arc<QueueCoordinator>,
}

impl CoreService {
    /// Build every component with a silent local player. Hosts that render
    /// audio should use [`CoreService::bootstrap_with_player`].
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        Self::bootstrap_with_player(config, Arc::new(NullPlayer::default())).await
    }

    pub async fn bootstrap_with_player(
        config: CoreConfig,
        player: Arc<dyn LocalPlayer>,
    ) -> Result<Self> {
        config.validate()?;
        let directories = ServiceDirectories::resolve(&config).await?;
        let events = EventBus::new(config.event_buffer_size);
        let fs: Arc<dyn FileSystemAccess> = Arc::clone(&config.file_system);

        let executor = Arc::new(
            RequestExecutor::new(
                Arc::clone(&config.http_client),
                ServerEndpoint::from_config(&config),
                config.network.clone(),
            )
            .with_events(events.clone()),
        );
        let versions = Arc::new(ServerVersion::new());
        let cache = ResponseCache::new(
            Arc::clone(&fs),
            Arc::new(SystemClock),
            directories.responses.clone(),
        );
        let fetcher = Arc::new(MediaFetcher::new(
            Arc::clone(&executor),
            Arc::clone(&fs),
            Arc::clone(&versions),
            config.playback,
            directories.artwork.clone(),
        ));
        let music = Arc::new(MusicService::new(
            executor,
            cache,
            Arc::clone(&fetcher),
            versions,
        ));

        let jukebox = JukeboxBridge::new(Arc::clone(&music) as Arc<dyn JukeboxApi>);
        let coordinator_config =
            CoordinatorConfig::new(directories.media.clone()).with_playback(config.playback);
        let coordinator = QueueCoordinator::new(
            fetcher,
            fs,
            player,
            Some(jukebox),
            events.clone(),
            coordinator_config,
        )?;
        coordinator.set_random_source(Arc::clone(&music) as Arc<dyn RandomSongSource>);

        if config.playback.jukebox_by_default {
            if let Err(e) = coordinator.set_jukebox_enabled(true).await {
                warn!(error = %e, "Jukebox mode requested but unavailable");
            }
        }

        info!(
            server = %config.server.base_url,
            media_dir = %directories.media.display(),
            "Core service ready"
        );
        Ok(Self {
            config: Arc::new(config),
            directories,
            events,
            music,
            coordinator,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn directories(&self) -> &ServiceDirectories {
        &self.directories
    }

    pub fn music(&self) -> Arc<MusicService> {
        Arc::clone(&self.music)
    }

    pub fn coordinator(&self) -> Arc<QueueCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }
}
