//! # Coordinator Configuration

use core_runtime::config::PlaybackConfig;
use std::path::PathBuf;

/// Size of one read/write step when copying a media stream to disk.
pub const DEFAULT_COPY_BUFFER_BYTES: usize = 64 * 1024;

/// Gain change applied by one jukebox volume step.
pub const JUKEBOX_GAIN_STEP: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Root of downloaded media files.
    pub media_dir: PathBuf,
    pub playback: PlaybackConfig,
    /// Start transfers automatically after every queue change.
    ///
    /// Default: true.
    pub auto_download: bool,
    /// Default: 64 KB.
    pub copy_buffer_bytes: usize,
}

impl CoordinatorConfig {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
            playback: PlaybackConfig::default(),
            auto_download: true,
            copy_buffer_bytes: DEFAULT_COPY_BUFFER_BYTES,
        }
    }

    pub fn with_playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    pub fn with_auto_download(mut self, enabled: bool) -> Self {
        self.auto_download = enabled;
        self
    }

    pub fn with_copy_buffer_bytes(mut self, bytes: usize) -> Self {
        self.copy_buffer_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.media_dir.as_os_str().is_empty() {
            return Err("media_dir must not be empty".to_string());
        }
        if self.copy_buffer_bytes == 0 {
            return Err("copy_buffer_bytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = CoordinatorConfig::new("/media");
        assert!(config.validate().is_ok());
        assert!(config.auto_download);
    }

    #[test]
    fn rejects_zero_buffer_and_empty_dir() {
        assert!(CoordinatorConfig::new("/media")
            .with_copy_buffer_bytes(0)
            .validate()
            .is_err());
        assert!(CoordinatorConfig::new("").validate().is_err());
    }
}
