//! # Remote Protocol Client
//!
//! The resilient half of the client: everything between a typed call such as
//! [`MusicService::get_indexes`] and the host's single-attempt
//! [`HttpClient`](bridge_traits::http::HttpClient).
//!
//! ## Components
//!
//! ```text
//!  MusicService ──> ResponseCache (read-through, last known good)
//!       │
//!       ├──> MediaFetcher (range resume, artwork, disguised errors)
//!       │         │
//!       ▼         ▼
//!   RequestExecutor (retry, growing timeouts, cancellation)
//!       │
//!       ▼
//!   HttpClient (bridge)
//! ```
//!
//! - [`RequestExecutor`]: transient failures are retried here and nowhere else
//! - [`ResponseCache`]: schema-versioned JSON files, one per [`CacheKey`]
//! - [`MediaFetcher`]: implements [`MediaSource`] for the download worker
//! - [`ServerVersion`]: remembered server version for local feature gates
//! - [`JukeboxApi`]: server-side playback commands

pub mod cache;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod fetcher;
pub mod jukebox;
pub mod models;
pub mod request;
pub mod service;
pub mod version;

pub use cache::{CacheKey, ResponseCache, CACHE_FORMAT_VERSION};
pub use error::{RemoteError, Result, ServiceErrorCode};
pub use executor::{ProgressSink, RequestAttempt, RequestExecutor};
pub use fetcher::{read_timeout_for_offset, MediaFetcher, MediaSource, MediaStream};
pub use jukebox::JukeboxApi;
pub use models::{Artist, IndexGroup, Indexes, JukeboxStatus, License, MediaItem, MusicFolder};
pub use request::{RequestSpec, ServerEndpoint};
pub use service::{MusicService, RandomSongSource};
pub use version::{features, ProtocolVersion, ServerVersion};
