//! # Host Bridge Traits
//!
//! Capabilities the client core needs from its host, expressed as traits.
//!
//! ## Overview
//!
//! The core never opens sockets or files directly. Everything that touches the
//! outside world goes through one of these traits, which lets hosts swap in
//! native adapters (see `bridge-desktop`) and lets tests swap in mocks.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - single-attempt HTTP execution, buffered or streamed
//! - [`FileSystemAccess`](storage::FileSystemAccess) - cache files, partial downloads, artwork
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Retry Responsibility
//!
//! `HttpClient` implementations perform exactly one attempt per call and
//! classify failures through [`BridgeError`]. Retrying with growing timeouts
//! is the job of the request executor in `core-remote`, driven by
//! [`RetryPolicy`](http::RetryPolicy) and [`BridgeError::is_transient`].
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter can be shared
//! behind an `Arc` by every component.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse, RetryPolicy};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
