//! # Playback Seams
//!
//! Traits the coordinator drives but does not implement.
//!
//! - [`LocalPlayer`]: the host's audio output. Decoding lives behind it.
//! - [`PlayerStateListener`]: observers of player transitions (remote
//!   control receivers, widgets) that should not poll.

use crate::error::Result;
use crate::player::PlayerState;
use crate::queue::{QueueEntry, QueueEntryId};
use async_trait::async_trait;
use core_remote::models::MediaItem;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;

/// What the local player should open.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSource {
    pub entry_id: QueueEntryId,
    pub item: MediaItem,
    /// The complete file when it exists, otherwise the partial file that is
    /// still being written.
    pub path: PathBuf,
    pub complete: bool,
}

/// Host audio output.
///
/// Calls are short control operations; none of them should wait for audio
/// to finish. End of stream is reported back through
/// `QueueCoordinator::on_stream_completed`.
///
/// ## Example
///
/// ```rust,no_run
/// # use core_playback::traits::{LocalPlayer, PlaybackSource};
/// # use std::time::Duration;
/// async fn start(player: &dyn LocalPlayer, source: PlaybackSource) {
///     player.play(source, Duration::ZERO).await.unwrap();
///     player.set_volume(0.8).await.unwrap();
/// }
/// ```
#[async_trait]
pub trait LocalPlayer: Send + Sync {
    /// Open `source` and start at `start`.
    async fn play(&self, source: PlaybackSource, start: Duration) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Stop and release the current source.
    async fn stop(&self) -> Result<()>;

    async fn seek(&self, position: Duration) -> Result<()>;

    /// `volume` in `[0.0, 1.0]`.
    async fn set_volume(&self, volume: f32) -> Result<()>;

    async fn position(&self) -> Result<Duration>;
}

/// Player for hosts without local output. Remembers the last position it
/// was given so status snapshots stay meaningful.
#[derive(Debug, Default)]
pub struct NullPlayer {
    position: Mutex<Duration>,
}

#[async_trait]
impl LocalPlayer for NullPlayer {
    async fn play(&self, _source: PlaybackSource, start: Duration) -> Result<()> {
        *self.position.lock() = start;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.position.lock() = Duration::ZERO;
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        *self.position.lock() = position;
        Ok(())
    }

    async fn set_volume(&self, _volume: f32) -> Result<()> {
        Ok(())
    }

    async fn position(&self) -> Result<Duration> {
        Ok(*self.position.lock())
    }
}

/// A player transition together with the entry that is current afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub previous: PlayerState,
    pub state: PlayerState,
    pub entry: Option<QueueEntry>,
}

/// Receives every player transition, in order, outside the coordinator lock.
pub trait PlayerStateListener: Send + Sync {
    fn on_state_changed(&self, change: &StateChange);
}
