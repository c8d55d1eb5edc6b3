//! Server-side jukebox commands.
//!
//! The jukebox plays audio on the server; the client only sends transport
//! commands through `jukeboxControl`. Every command answers with the current
//! [`JukeboxStatus`].

use crate::error::{RemoteError, Result};
use crate::models::JukeboxStatus;
use crate::request::RequestSpec;
use crate::service::MusicService;
use crate::version::features;
use async_trait::async_trait;
use core_async::sync::CancellationToken;
use tracing::instrument;

const ENDPOINT: &str = "jukeboxControl";

/// Remote transport used by the playback coordinator in jukebox mode.
#[async_trait]
pub trait JukeboxApi: Send + Sync {
    /// Fails with a typed error when the server cannot run a jukebox.
    async fn check_available(&self) -> Result<()>;

    /// Replace the server playlist.
    async fn set_playlist(&self, ids: &[String]) -> Result<JukeboxStatus>;

    async fn skip(&self, index: usize, offset_secs: u32) -> Result<JukeboxStatus>;

    async fn start(&self) -> Result<JukeboxStatus>;

    async fn stop(&self) -> Result<JukeboxStatus>;

    async fn status(&self) -> Result<JukeboxStatus>;

    /// `gain` in `[0, 1]`.
    async fn set_gain(&self, gain: f32) -> Result<JukeboxStatus>;
}

impl MusicService {
    async fn jukebox_command(&self, spec: RequestSpec) -> Result<JukeboxStatus> {
        self.versions().require("Jukebox", features::JUKEBOX)?;
        let mut envelope = self.call(&spec, &CancellationToken::new()).await?;
        envelope.take("jukeboxStatus")
    }

    fn jukebox_action(action: &str) -> RequestSpec {
        RequestSpec::new(ENDPOINT).param("action", action)
    }
}

#[async_trait]
impl JukeboxApi for MusicService {
    #[instrument(skip(self))]
    async fn check_available(&self) -> Result<()> {
        self.versions().require("Jukebox", features::JUKEBOX)?;
        let license = self.get_license(&CancellationToken::new()).await?;
        if !license.valid {
            return Err(RemoteError::NotLicensed("Jukebox".to_string()));
        }
        self.status().await.map(|_| ())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn set_playlist(&self, ids: &[String]) -> Result<JukeboxStatus> {
        let spec = ids
            .iter()
            .fold(Self::jukebox_action("set"), |spec, id| spec.param("id", id));
        self.jukebox_command(spec).await
    }

    #[instrument(skip(self))]
    async fn skip(&self, index: usize, offset_secs: u32) -> Result<JukeboxStatus> {
        let spec = Self::jukebox_action("skip")
            .param("index", index)
            .param("offset", offset_secs);
        self.jukebox_command(spec).await
    }

    async fn start(&self) -> Result<JukeboxStatus> {
        self.jukebox_command(Self::jukebox_action("start")).await
    }

    async fn stop(&self) -> Result<JukeboxStatus> {
        self.jukebox_command(Self::jukebox_action("stop")).await
    }

    async fn status(&self) -> Result<JukeboxStatus> {
        self.jukebox_command(Self::jukebox_action("status")).await
    }

    #[instrument(skip(self))]
    async fn set_gain(&self, gain: f32) -> Result<JukeboxStatus> {
        let spec = Self::jukebox_action("setGain").param("gain", gain.clamp(0.0, 1.0));
        self.jukebox_command(spec).await
    }
}
