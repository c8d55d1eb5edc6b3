#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::{FileMetadata, FileSystemAccess};
use bytes::Bytes;
use core_async::sync::CancellationToken;
use core_playback::{
    CoordinatorConfig, DownloadFile, JukeboxBridge, LocalPlayer, PlaybackSource, PlayerState,
    PlayerStateListener, QueueCoordinator, QueueEntry, QueueKind, Result as PlaybackResult,
    StateChange,
};
use core_remote::error::{RemoteError, Result as RemoteResult};
use core_remote::fetcher::{MediaSource, MediaStream};
use core_remote::jukebox::JukeboxApi;
use core_remote::models::{JukeboxStatus, MediaItem};
use core_remote::service::RandomSongSource;
use core_remote::version::ProtocolVersion;
use core_runtime::events::{CoreEvent, EventBus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

pub const MEDIA_DIR: &str = "/media";

pub fn item(id: &str) -> MediaItem {
    MediaItem::new(id, format!("Song {}", id.to_uppercase()))
        .with_artist("The Testers")
        .with_duration(180)
}

pub fn items(ids: &[&str]) -> Vec<MediaItem> {
    ids.iter().map(|id| item(id)).collect()
}

pub fn files_for(id: &str) -> DownloadFile {
    DownloadFile::for_item(Path::new(MEDIA_DIR), &item(id))
}

/// Payload the scripted source serves for `id` unless told otherwise.
pub fn default_payload(id: &str) -> Vec<u8> {
    id.as_bytes().repeat(16)
}

// ============================================================================
// Media source
// ============================================================================

#[derive(Default)]
pub struct ScriptedSource {
    payloads: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashSet<String>>,
    ignore_range: AtomicBool,
    calls: Mutex<Vec<(String, u64)>>,
}

impl ScriptedSource {
    pub fn set_payload(&self, id: &str, payload: &[u8]) {
        self.payloads.lock().insert(id.to_string(), payload.to_vec());
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    /// Fetches of `id` never produce data and only end when cancelled.
    pub fn hold(&self, id: &str) {
        self.held.lock().insert(id.to_string());
    }

    /// Answer ranged requests with the whole payload and a 200.
    pub fn ignore_range(&self) {
        self.ignore_range.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl MediaSource for ScriptedSource {
    async fn fetch_stream(
        &self,
        item: &MediaItem,
        offset: u64,
        cancel: CancellationToken,
    ) -> RemoteResult<MediaStream> {
        self.calls.lock().push((item.id.clone(), offset));
        let held = self.held.lock().contains(&item.id);
        if held {
            cancel.cancelled().await;
            return Err(RemoteError::Cancelled);
        }
        let failing = self.failing.lock().contains(&item.id);
        if failing {
            return Err(RemoteError::service(70, "Song not found"));
        }

        let payload = self
            .payloads
            .lock()
            .get(&item.id)
            .cloned()
            .unwrap_or_else(|| default_payload(&item.id));
        let resume = offset > 0
            && !self.ignore_range.load(Ordering::SeqCst)
            && (offset as usize) <= payload.len();
        let (status, start) = if resume { (206, offset) } else { (200, 0) };
        let body = payload[start as usize..].to_vec();
        Ok(MediaStream {
            status,
            offset: start,
            content_length: Some(body.len() as u64),
            content_type: Some("audio/mpeg".to_string()),
            body: Box::new(io::Cursor::new(body)),
        })
    }
}

// ============================================================================
// Random songs
// ============================================================================

/// Hands out `r0`, `r1`, ... in order.
#[derive(Default)]
pub struct CountingRandomSource {
    next: AtomicUsize,
    requests: Mutex<Vec<usize>>,
}

impl CountingRandomSource {
    /// Sizes of every request so far.
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RandomSongSource for CountingRandomSource {
    async fn random_songs(&self, count: usize, _cancel: &CancellationToken) -> RemoteResult<Vec<MediaItem>> {
        self.requests.lock().push(count);
        let first = self.next.fetch_add(count, Ordering::SeqCst);
        Ok((first..first + count).map(|n| item(&format!("r{n}"))).collect())
    }
}

// ============================================================================
// Player and listener
// ============================================================================

#[derive(Default)]
pub struct RecordingPlayer {
    commands: Mutex<Vec<String>>,
    position: Mutex<Duration>,
}

impl RecordingPlayer {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.commands.lock().last().cloned()
    }

    fn record(&self, command: String) {
        self.commands.lock().push(command);
    }
}

#[async_trait]
impl LocalPlayer for RecordingPlayer {
    async fn play(&self, source: PlaybackSource, start: Duration) -> PlaybackResult<()> {
        *self.position.lock() = start;
        self.record(format!("play:{}", source.item.id));
        Ok(())
    }

    async fn pause(&self) -> PlaybackResult<()> {
        self.record("pause".to_string());
        Ok(())
    }

    async fn resume(&self) -> PlaybackResult<()> {
        self.record("resume".to_string());
        Ok(())
    }

    async fn stop(&self) -> PlaybackResult<()> {
        self.record("stop".to_string());
        Ok(())
    }

    async fn seek(&self, position: Duration) -> PlaybackResult<()> {
        *self.position.lock() = position;
        self.record(format!("seek:{}", position.as_secs()));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> PlaybackResult<()> {
        self.record(format!("volume:{:.1}", volume));
        Ok(())
    }

    async fn position(&self) -> PlaybackResult<Duration> {
        Ok(*self.position.lock())
    }
}

#[derive(Default)]
pub struct RecordingListener {
    changes: Mutex<Vec<(PlayerState, PlayerState)>>,
}

impl RecordingListener {
    pub fn changes(&self) -> Vec<(PlayerState, PlayerState)> {
        self.changes.lock().clone()
    }
}

impl PlayerStateListener for RecordingListener {
    fn on_state_changed(&self, change: &StateChange) {
        self.changes.lock().push((change.previous, change.state));
    }
}

// ============================================================================
// Jukebox
// ============================================================================

pub struct FakeJukebox {
    available: bool,
    gain: Mutex<f32>,
    calls: Mutex<Vec<String>>,
}

impl FakeJukebox {
    pub fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available,
            gain: Mutex::new(0.5),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn snapshot(&self) -> JukeboxStatus {
        JukeboxStatus {
            current_index: -1,
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
                actual: ProtocolVersion::new(1, 6),
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
        self.calls.lock().push(format!("gain:{:.1}", gain));
        Ok(self.snapshot())
    }
}

// ============================================================================
// In-memory file system
// ============================================================================

type Files = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

#[derive(Clone, Default)]
pub struct MemoryFs {
    pub files: Files,
    write_delay: Arc<Mutex<Duration>>,
}

impl MemoryFs {
    /// Every chunk written after this call takes `delay` to land.
    pub fn slow_writes(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    pub fn put(&self, path: &Path, data: &[u8]) {
        self.files.lock().insert(path.to_path_buf(), data.to_vec());
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }
}

struct MemoryWriter {
    path: PathBuf,
    files: Files,
    delay: Duration,
    pending: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl MemoryWriter {
    fn new(fs: &MemoryFs, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            files: Arc::clone(&fs.files),
            delay: *fs.write_delay.lock(),
            pending: None,
        }
    }
}

impl core_async::io::AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if !this.delay.is_zero() {
            let delay = this.delay;
            let sleep = this
                .pending
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            ready!(sleep.as_mut().poll(cx));
            this.pending = None;
        }
        this.files
            .lock()
            .entry(this.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn missing(path: &Path) -> BridgeError {
    BridgeError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        path.display().to_string(),
    ))
}

#[async_trait]
impl FileSystemAccess for MemoryFs {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/cache"))
    }

    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/data"))
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        Ok(self.files.lock().contains_key(path))
    }

    async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
        let files = self.files.lock();
        let data = files.get(path).ok_or_else(|| missing(path))?;
        Ok(FileMetadata {
            size: data.len() as u64,
            modified_at: None,
            is_directory: false,
        })
    }

    async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        let files = self.files.lock();
        let data = files.get(path).ok_or_else(|| missing(path))?;
        Ok(Bytes::from(data.clone()))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.files.lock().insert(path.to_path_buf(), data.to_vec());
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.files.lock().remove(path);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        let mut files = self.files.lock();
        let data = files.remove(from).ok_or_else(|| missing(from))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn core_async::io::AsyncRead + Send + Unpin>> {
        let data = self.read_file(path).await?;
        Ok(Box::new(io::Cursor::new(data.to_vec())))
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
        self.files.lock().insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryWriter::new(self, path)))
    }

    async fn open_append_stream(
        &self,
        path: &Path,
    ) -> BridgeResult<Box<dyn core_async::io::AsyncWrite + Send + Unpin>> {
        self.files.lock().entry(path.to_path_buf()).or_default();
        Ok(Box::new(MemoryWriter::new(self, path)))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub coordinator: Arc<QueueCoordinator>,
    pub source: Arc<ScriptedSource>,
    pub fs: MemoryFs,
    pub player: Arc<RecordingPlayer>,
    pub listener: Arc<RecordingListener>,
    pub events: Receiver<CoreEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Self::config(), None)
    }

    /// Manual downloads with a tiny copy buffer so transfers take several
    /// chunks.
    pub fn config() -> CoordinatorConfig {
        CoordinatorConfig::new(MEDIA_DIR)
            .with_auto_download(false)
            .with_copy_buffer_bytes(7)
    }

    pub fn build(config: CoordinatorConfig, jukebox: Option<Arc<FakeJukebox>>) -> Self {
        let source = Arc::new(ScriptedSource::default());
        let fs = MemoryFs::default();
        let player = Arc::new(RecordingPlayer::default());
        let listener = Arc::new(RecordingListener::default());
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        let jukebox = jukebox.map(|api| JukeboxBridge::new(api as Arc<dyn JukeboxApi>));
        let coordinator = QueueCoordinator::new(
            source.clone(),
            Arc::new(fs.clone()),
            player.clone(),
            jukebox,
            bus,
            config,
        )
        .expect("valid config");
        coordinator.add_listener(listener.clone());
        Self {
            coordinator,
            source,
            fs,
            player,
            listener,
            events,
        }
    }

    /// Start the next transfers and wait for them to finish.
    pub async fn download_round(&self) {
        for handle in self.coordinator.download_next() {
            handle.await.expect("transfer task panicked");
        }
    }

    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn entry_at(&self, kind: QueueKind, index: usize) -> QueueEntry {
        self.coordinator.entries(kind)[index].clone()
    }

    /// Wait until `done` holds, giving spawned transfers time to run.
    pub async fn wait_for(&self, done: impl Fn(&Self) -> bool) {
        for _ in 0..500 {
            if done(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition never held");
    }

    pub fn partial_len(&self, id: &str) -> usize {
        self.fs.get(&files_for(id).partial).map_or(0, |data| data.len())
    }
}
