//! # Core Configuration Module
//!
//! Builds the [`CoreConfig`] every component is constructed from.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern and fails fast: `build()`
//! rejects missing server details, malformed URLs, zero timeouts and missing
//! bridges with messages that say how to fix them.
//!
//! ## Required
//!
//! - Server profile (base URL, username, password)
//! - `HttpClient` and `FileSystemAccess` (desktop defaults with `desktop-shims`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .server("https://music.example.org", "alice", "secret")
//!     .client_id("sonic-desktop")
//!     .max_bitrate(320)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Protocol version this client speaks unless told otherwise.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.8.0";
pub const DEFAULT_CLIENT_ID: &str = "sonic-client";

// ============================================================================
// Server profile
// ============================================================================

/// Connection details for one media server.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerProfile {
    /// Base URL without the `/rest` suffix, e.g. `https://music.example.org`
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl ServerProfile {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Stable identity of the server account, used to key cached responses.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.base_url, self.username)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config("Server URL cannot be empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Server URL must start with http:// or https:// (got '{}')",
                self.base_url
            )));
        }
        if self.username.is_empty() {
            return Err(Error::Config("Username cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProfile")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Network settings
// ============================================================================

/// Timeouts and retry behaviour of the request executor.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    /// Read timeout of ordinary structured requests
    pub read_timeout: Duration,
    /// Read timeout for listings the server is slow to assemble
    pub long_read_timeout: Duration,
    /// Base read timeout of media downloads
    pub download_read_timeout: Duration,
    /// Extra read timeout granted per megabyte of resume offset
    pub offset_timeout_per_mb: Duration,
    pub retry: RetryPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            long_read_timeout: Duration::from_secs(60),
            download_read_timeout: Duration::from_secs(30),
            offset_timeout_per_mb: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("long_read_timeout", self.long_read_timeout),
            ("download_read_timeout", self.download_read_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        self.retry.validate()
    }
}

// ============================================================================
// Playback settings
// ============================================================================

/// Download and playback behaviour of the queue coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Requested maximum stream bitrate in kbps, `None` for the server default
    pub max_bitrate: Option<u32>,
    /// The server resizes cover art itself
    pub server_scaling: bool,
    /// Persist fetched artwork even when the server scales it
    pub save_artwork: bool,
    /// Completed background entries leave the background queue
    pub bounded_background_queue: bool,
    /// Background prefetch runs while a foreground download is active
    pub continuous_prefetch: bool,
    /// Try to enter jukebox mode at startup
    pub jukebox_by_default: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_bitrate: None,
            server_scaling: false,
            save_artwork: true,
            bounded_background_queue: true,
            continuous_prefetch: true,
            jukebox_by_default: false,
        }
    }
}

// ============================================================================
// Core configuration
// ============================================================================

/// Core configuration for the client.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub server: ServerProfile,
    /// Sent as `c` on every request
    pub client_id: String,
    /// Sent as `v` on every request
    pub protocol_version: String,
    /// Response cache and artwork root; defaults to the bridge cache directory
    pub cache_dir: Option<PathBuf>,
    /// Downloaded media root; defaults to the bridge data directory
    pub media_dir: Option<PathBuf>,
    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub network: NetworkConfig,
    pub playback: PlaybackConfig,
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("server", &self.server)
            .field("client_id", &self.client_id)
            .field("protocol_version", &self.protocol_version)
            .field("cache_dir", &self.cache_dir)
            .field("media_dir", &self.media_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("network", &self.network)
            .field("playback", &self.playback)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;

        if self.client_id.trim().is_empty() {
            return Err(Error::Config("Client id cannot be empty".to_string()));
        }

        if !is_version_string(&self.protocol_version) {
            return Err(Error::Config(format!(
                "Protocol version must look like '1.8.0' (got '{}')",
                self.protocol_version
            )));
        }

        self.network
            .validate()
            .map_err(|e| Error::Config(format!("Invalid network config: {}", e)))?;

        if self.playback.max_bitrate == Some(0) {
            return Err(Error::Config(
                "max_bitrate must be greater than 0, or unset for the server default".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_version_string(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    (2..=3).contains(&parts.len()) && parts.iter().all(|p| p.parse::<u32>().is_ok())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: format!("Default reqwest client could not be built: {}", e),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                  Desktop: enable the 'desktop-shims' feature. \
                  Mobile: inject the platform-native adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "No file system implementation provided. \
                  Desktop: enable the 'desktop-shims' feature. \
                  Mobile: inject the platform-native adapter."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    server: Option<ServerProfile>,
    client_id: Option<String>,
    protocol_version: Option<String>,
    cache_dir: Option<PathBuf>,
    media_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    network: NetworkConfig,
    playback: PlaybackConfig,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the server URL and credentials (required).
    pub fn server(
        mut self,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.server = Some(ServerProfile::new(base_url, username, password));
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }

    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn media_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.media_dir = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system implementation.
    ///
    /// If not provided, the tokio-based file system is used when the
    /// `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.network.read_timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.network.retry = policy;
        self
    }

    pub fn playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    pub fn max_bitrate(mut self, kbps: u32) -> Self {
        self.playback.max_bitrate = Some(kbps);
        self
    }

    pub fn jukebox_by_default(mut self, enabled: bool) -> Self {
        self.playback.jukebox_by_default = enabled;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn build(self) -> Result<CoreConfig> {
        let server = self.server.ok_or_else(|| {
            Error::Config(
                "Server is required. Use .server(url, username, password) to set it.".to_string(),
            )
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let config = CoreConfig {
            server,
            client_id: self
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            protocol_version: self
                .protocol_version
                .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string()),
            cache_dir: self.cache_dir,
            media_dir: self.media_dir,
            http_client,
            file_system,
            network: self.network,
            playback: self.playback,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse, HttpStreamResponse};
    use bridge_traits::storage::FileMetadata;
    use bytes::Bytes;
    use std::path::Path;

    struct NoopHttp;

    #[async_trait]
    impl HttpClient for NoopHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, Bytes::new()))
        }

        async fn execute_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            Ok(HttpStreamResponse {
                status: 200,
                headers: Default::default(),
                content_length: Some(0),
                body: Box::new(core_async::io::empty()),
            })
        }
    }

    struct NoopFs;

    #[async_trait]
    impl FileSystemAccess for NoopFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/tmp/cache"))
        }
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/tmp/data"))
        }
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Ok(FileMetadata {
                size: 0,
                modified_at: None,
                is_directory: false,
            })
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn open_read_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn core_async::io::AsyncRead + Send + Unpin>> {
            Ok(Box::new(core_async::io::empty()))
        }
        async fn open_write_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
            Ok(Box::new(tokio::io::sink()))
        }
        async fn open_append_stream(
            &self,
            _path: &Path,
        ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
            Ok(Box::new(tokio::io::sink()))
        }
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .server("https://music.example.org/", "alice", "secret")
            .http_client(Arc::new(NoopHttp))
            .file_system(Arc::new(NoopFs))
    }

    #[test]
    fn test_defaults_follow_protocol_client_conventions() {
        let config = builder().build().unwrap();

        assert_eq!(config.server.base_url, "https://music.example.org");
        assert_eq!(config.protocol_version, DEFAULT_PROTOCOL_VERSION);
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.network.download_read_timeout, Duration::from_secs(30));
        assert_eq!(config.network.retry.max_attempts, 5);
        assert!(config.playback.bounded_background_queue);
    }

    #[test]
    fn test_missing_server_is_rejected() {
        let err = CoreConfig::builder()
            .http_client(Arc::new(NoopHttp))
            .file_system(Arc::new(NoopFs))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Server is required"));
    }

    #[test]
    fn test_bad_url_and_version_are_rejected() {
        let err = CoreConfig::builder()
            .server("music.example.org", "alice", "secret")
            .http_client(Arc::new(NoopHttp))
            .file_system(Arc::new(NoopFs))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = builder().protocol_version("one.eight").build().unwrap_err();
        assert!(err.to_string().contains("Protocol version"));
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        let err = builder().read_timeout(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("read_timeout"));

        let err = builder()
            .retry_policy(RetryPolicy::default().with_max_attempts(0))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_identity_distinguishes_accounts() {
        let a = ServerProfile::new("https://h", "alice", "x");
        let b = ServerProfile::new("https://h", "bob", "x");
        assert_ne!(a.identity(), b.identity());
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_bridges_fail_fast() {
        let err = CoreConfig::builder()
            .server("https://h", "alice", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityMissing { .. }));
    }
}
