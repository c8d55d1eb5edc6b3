//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every client crate:
//! - Logging and tracing bootstrap
//! - Configuration (`CoreConfig` builder)
//! - Event bus for download, queue, playback and jukebox notifications
//!
//! ## Overview
//!
//! Nothing in here talks to the media server. It sets up the conventions
//! (log format, config validation, event shapes) the protocol client and the
//! playback coordinator build on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
