//! # Remote Playback Bridge
//!
//! Translates coordinator commands into server-side jukebox calls while
//! jukebox mode is on. The bridge keeps the last gain it sent so volume can
//! be stepped without a status round trip.

use crate::config::JUKEBOX_GAIN_STEP;
use crate::error::{PlaybackError, Result};
use core_remote::jukebox::JukeboxApi;
use core_remote::models::JukeboxStatus;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct JukeboxBridge {
    api: Arc<dyn JukeboxApi>,
    enabled: AtomicBool,
    gain: Mutex<f32>,
}

impl JukeboxBridge {
    pub fn new(api: Arc<dyn JukeboxApi>) -> Self {
        Self {
            api,
            enabled: AtomicBool::new(false),
            gain: Mutex::new(0.5),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn gain(&self) -> f32 {
        *self.gain.lock()
    }

    /// Check availability and switch on. Old or unlicensed servers produce
    /// [`PlaybackError::FeatureUnsupported`].
    #[instrument(skip(self))]
    pub async fn enable(&self) -> Result<JukeboxStatus> {
        self.api
            .check_available()
            .await
            .map_err(PlaybackError::from_jukebox)?;
        let status = self.api.status().await.map_err(PlaybackError::from_jukebox)?;
        *self.gain.lock() = status.gain;
        self.enabled.store(true, Ordering::SeqCst);
        info!(gain = status.gain, "Jukebox enabled");
        Ok(status)
    }

    /// Switch off, stopping the server player. The mode is off even when the
    /// stop command fails.
    pub async fn disable(&self) -> Result<()> {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        if was_enabled {
            self.api.stop().await?;
            info!("Jukebox disabled");
        }
        Ok(())
    }

    pub async fn set_playlist(&self, ids: &[String]) -> Result<()> {
        debug!(count = ids.len(), "Pushing playlist to jukebox");
        self.api.set_playlist(ids).await?;
        Ok(())
    }

    /// Jump to `index` at `position` and make sure the server is playing.
    pub async fn play(&self, index: usize, position: Duration) -> Result<()> {
        let offset = u32::try_from(position.as_secs()).unwrap_or(u32::MAX);
        self.api.skip(index, offset).await?;
        self.api.start().await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.api.start().await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.api.stop().await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<JukeboxStatus> {
        Ok(self.api.status().await?)
    }

    pub async fn set_gain(&self, gain: f32) -> Result<f32> {
        let gain = gain.clamp(0.0, 1.0);
        let status = self.api.set_gain(gain).await?;
        *self.gain.lock() = status.gain;
        Ok(status.gain)
    }

    /// Step the gain by one notch up or down.
    pub async fn adjust_volume(&self, up: bool) -> Result<f32> {
        let step = if up { JUKEBOX_GAIN_STEP } else { -JUKEBOX_GAIN_STEP };
        let target = (self.gain() + step).clamp(0.0, 1.0);
        self.set_gain(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_remote::error::{RemoteError, Result as RemoteResult};
    use core_remote::version::ProtocolVersion;

    struct FakeJukebox {
        available: bool,
        gain: Mutex<f32>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeJukebox {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                available,
                gain: Mutex::new(0.95),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn snapshot(&self) -> JukeboxStatus {
            JukeboxStatus {
                current_index: 0,
                playing: false,
                gain: *self.gain.lock(),
                position: None,
            }
        }
    }

    #[async_trait]
    impl JukeboxApi for FakeJukebox {
        async fn check_available(&self) -> RemoteResult<()> {
            if self.available {
                Ok(())
            } else {
                Err(RemoteError::UnsupportedVersion {
                    feature: "Jukebox".into(),
                    required: ProtocolVersion::new(1, 7),
                    actual: ProtocolVersion::new(1, 5),
                })
            }
        }
        async fn set_playlist(&self, ids: &[String]) -> RemoteResult<JukeboxStatus> {
            self.calls.lock().push(format!("set:{}", ids.join(",")));
            Ok(self.snapshot())
        }
        async fn skip(&self, index: usize, offset_secs: u32) -> RemoteResult<JukeboxStatus> {
            self.calls.lock().push(format!("skip:{index}:{offset_secs}"));
            Ok(self.snapshot())
        }
        async fn start(&self) -> RemoteResult<JukeboxStatus> {
            self.calls.lock().push("start".into());
            Ok(self.snapshot())
        }
        async fn stop(&self) -> RemoteResult<JukeboxStatus> {
            self.calls.lock().push("stop".into());
            Ok(self.snapshot())
        }
        async fn status(&self) -> RemoteResult<JukeboxStatus> {
            Ok(self.snapshot())
        }
        async fn set_gain(&self, gain: f32) -> RemoteResult<JukeboxStatus> {
            *self.gain.lock() = gain;
            Ok(self.snapshot())
        }
    }

    #[tokio::test]
    async fn enabling_on_old_server_is_feature_unsupported() {
        let bridge = JukeboxBridge::new(FakeJukebox::new(false));
        let err = bridge.enable().await.unwrap_err();
        assert!(matches!(err, PlaybackError::FeatureUnsupported(_)));
        assert!(!bridge.is_enabled());
    }

    #[tokio::test]
    async fn volume_steps_are_clamped() {
        let bridge = JukeboxBridge::new(FakeJukebox::new(true));
        bridge.enable().await.unwrap();

        let gain = bridge.adjust_volume(true).await.unwrap();
        assert!((gain - 1.0).abs() < 1e-6);
        let gain = bridge.adjust_volume(true).await.unwrap();
        assert!((gain - 1.0).abs() < 1e-6);

        let gain = bridge.adjust_volume(false).await.unwrap();
        assert!((gain - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn play_skips_then_starts() {
        let api = FakeJukebox::new(true);
        let bridge = JukeboxBridge::new(api.clone());
        bridge.play(3, Duration::from_millis(42_900)).await.unwrap();
        assert_eq!(*api.calls.lock(), vec!["skip:3:42", "start"]);
    }
}
