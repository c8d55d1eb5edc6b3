use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] core_remote::RemoteError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

impl CoreError {
    /// Summarized text for the UI.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Remote(e) => e.user_message(),
            CoreError::Playback(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
