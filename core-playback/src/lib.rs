//! # Playback & Queue Module
//!
//! Coordinates what plays next, what downloads next, and who renders audio.
//!
//! ## Overview
//!
//! This module handles:
//! - The foreground (now playing) and background (prefetch) queues
//! - The player state machine and its listeners
//! - Resumable downloads of queued items into the media directory, with
//!   pinned (saved) files kept apart from cached ones
//! - Shuffle play, which keeps the queue topped up with random songs
//! - Jukebox mode, where the server renders audio and the client only sends
//!   transport commands
//!
//! ```text
//!            ┌──────────────────────┐
//!  UI ──────►│   QueueCoordinator   │──► PlayerStateListener / EventBus
//!            │ PlayQueue + Player   │
//!            └───┬─────────┬────┬───┘
//!                │         │    │
//!        download│   local │    │ jukebox
//!                ▼         ▼    ▼
//!        MediaSource  LocalPlayer  JukeboxBridge ──► JukeboxApi
//! ```

pub mod config;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod jukebox;
pub mod player;
pub mod queue;
pub mod remote_control;
pub mod traits;

pub use config::CoordinatorConfig;
pub use coordinator::{QueueCoordinator, SHUFFLE_PLAY_HISTORY, SHUFFLE_PLAY_UPCOMING};
pub use download::{DownloadFile, Downloaded};
pub use error::{PlaybackError, Result};
pub use jukebox::JukeboxBridge;
pub use player::{PlayerState, PlayerStateMachine, Transition};
pub use queue::{
    DownloadState, EnqueueMode, PlayQueue, QueueEntry, QueueEntryId, QueueKind, RepeatMode,
    SkipDirection,
};
pub use remote_control::RemoteControlStatus;
pub use traits::{LocalPlayer, NullPlayer, PlaybackSource, PlayerStateListener, StateChange};
