//! Status snapshot for remote-control receivers (car kits, headsets).

use crate::player::PlayerState;
use crate::queue::QueueEntry;
use serde::Serialize;
use std::time::Duration;

/// What a remote-control receiver needs to build its status broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoteControlStatus {
    pub track_id: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    pub position: Duration,
    pub list_size: usize,
    /// Zero-based position of the current entry in the foreground queue.
    pub list_position: Option<usize>,
    /// True only while the player is `Started`; paused reports not playing.
    pub playing: bool,
}

impl RemoteControlStatus {
    pub fn new(
        entry: Option<&QueueEntry>,
        list_position: Option<usize>,
        list_size: usize,
        state: PlayerState,
        position: Duration,
    ) -> Self {
        let item = entry.map(|e| &e.item);
        Self {
            track_id: item.map(|i| i.id.clone()),
            title: item.map(|i| i.title.clone()),
            artist: item.and_then(|i| i.artist.clone()),
            album: item.and_then(|i| i.album.clone()),
            duration: item
                .and_then(|i| i.duration)
                .map(|secs| Duration::from_secs(u64::from(secs))),
            position,
            list_size,
            list_position,
            playing: state == PlayerState::Started,
        }
    }
}
