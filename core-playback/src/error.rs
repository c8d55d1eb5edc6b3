//! # Playback Error Types
//!
//! Errors raised by the queue coordinator and its collaborators. Download
//! failures are not errors of the coordinator: they mark the entry `Failed`
//! and are reported as events.

use crate::player::PlayerState;
use crate::queue::QueueEntryId;
use bridge_traits::error::BridgeError;
use core_remote::error::{RemoteError, ServiceErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Queue Errors
    // ========================================================================
    #[error("Queue entry not found: {0}")]
    EntryNotFound(QueueEntryId),

    #[error("Index {index} out of range for queue of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Queue is empty")]
    EmptyQueue,

    // ========================================================================
    // Player Errors
    // ========================================================================
    #[error("Invalid player transition: {from} -> {to}")]
    InvalidTransition { from: PlayerState, to: PlayerState },

    /// The server cannot provide the requested feature (too old, unlicensed
    /// or not permitted).
    #[error("Feature unsupported: {0}")]
    FeatureUnsupported(String),

    #[error("Local player error: {0}")]
    Player(String),

    // ========================================================================
    // Collaborators
    // ========================================================================
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PlaybackError {
    /// Summarized text for the UI. Transport detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::Remote(e) => e.user_message(),
            PlaybackError::Bridge(_) => "Could not write to local storage.".to_string(),
            PlaybackError::FeatureUnsupported(feature) => {
                format!("{} is not supported by this server.", feature)
            }
            other => other.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlaybackError::Remote(RemoteError::Cancelled))
    }

    /// Map a jukebox availability failure to the error callers act on.
    pub(crate) fn from_jukebox(error: RemoteError) -> Self {
        match error {
            RemoteError::UnsupportedVersion { .. } | RemoteError::NotLicensed(_) => {
                PlaybackError::FeatureUnsupported(error.to_string())
            }
            RemoteError::Service {
                code: ServiceErrorCode::NotAuthorized | ServiceErrorCode::TrialExpired,
                ref message,
            } => PlaybackError::FeatureUnsupported(format!("Jukebox: {}", message)),
            other => PlaybackError::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
