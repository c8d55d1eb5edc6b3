//! # Download Queue Coordinator
//!
//! Owns the play queue, the player state machine and the download workers.
//!
//! ## Overview
//!
//! All coordinator state sits behind a single lock. Every operation runs in
//! two phases:
//!
//! ```text
//!   lock ──► mutate queue / cursor / player state ──► collect effects ──► unlock
//!                                                                          │
//!   listeners, events, local player, jukebox, cancellation ◄───────────────┘
//! ```
//!
//! Nothing awaits while the lock is held, so a read of the queue length can
//! never interleave with a write that changes it. Transfers run as spawned
//! tasks and report back through [`QueueCoordinator::finish_transfer`].
//!
//! ## Cancelled transfers
//!
//! A cancelled transfer keeps writing until its task notices the token, so
//! it moves to a draining set instead of disappearing. Its item is not picked
//! again until the task reports back, and whatever it reports is dropped.
//! Each transfer also holds a per-item file lock for its whole run; deleting
//! or pinning files waits for that lock.
//!
//! ## Usage
//!
//! ```ignore
//! let coordinator = QueueCoordinator::new(source, fs, player, Some(jukebox), events, config)?;
//! coordinator
//!     .enqueue(items, EnqueueMode::Replace, QueueKind::Foreground, true, false)
//!     .await?;
//! coordinator.skip(SkipDirection::Next).await?;
//! ```

use crate::config::CoordinatorConfig;
use crate::download::{self, DownloadFile, Downloaded};
use crate::error::{PlaybackError, Result};
use crate::jukebox::JukeboxBridge;
use crate::player::{PlayerState, PlayerStateMachine, Transition};
use crate::queue::{
    DownloadState, EnqueueMode, PlayQueue, QueueEntry, QueueEntryId, QueueKind, RepeatMode,
    SkipDirection,
};
use crate::remote_control::RemoteControlStatus;
use crate::traits::{LocalPlayer, PlaybackSource, PlayerStateListener, StateChange};
use bridge_traits::storage::FileSystemAccess;
use core_async::sync::{CancellationToken, KeyedMutex};
use core_async::task::JoinHandle;
use core_remote::fetcher::MediaSource;
use core_remote::models::MediaItem;
use core_remote::service::RandomSongSource;
use core_runtime::events::{
    CoreEvent, DownloadEvent, EventBus, JukeboxEvent, PlaybackEvent, QueueEvent,
};
use parking_lot::{Mutex, RwLock};
use rand::rngs::ThreadRng;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// Internal state
// ============================================================================

/// Foreground entries kept ahead of the cursor in shuffle play.
pub const SHUFFLE_PLAY_UPCOMING: usize = 20;
/// Played entries kept behind the cursor in shuffle play.
pub const SHUFFLE_PLAY_HISTORY: usize = 5;

#[derive(Debug, Clone)]
struct ActiveTransfer {
    serial: u64,
    entry_id: QueueEntryId,
    item_id: String,
    cancel: CancellationToken,
}

struct CoordinatorState {
    queue: PlayQueue,
    player: PlayerStateMachine,
    transfers: HashMap<QueueKind, ActiveTransfer>,
    /// Cancelled transfers whose task has not reported back yet.
    draining: HashMap<u64, ActiveTransfer>,
    /// Items whose files are being deleted.
    deleting: HashSet<String>,
    next_serial: u64,
    shuffle_play: bool,
    position: Duration,
    volume: f32,
}

/// Side effects collected under the lock and applied after it is released.
enum Effect {
    Transition(StateChange),
    QueueChanged {
        event: QueueEvent,
        /// Foreground item ids, present when the foreground list changed.
        playlist: Option<Vec<String>>,
    },
    Cancel(ActiveTransfer),
    Play {
        entry: QueueEntry,
        index: usize,
        position: Duration,
    },
    Pause,
    Resume,
    Stop,
    Seek {
        index: usize,
        position: Duration,
    },
    Volume(f32),
}

impl CoordinatorState {
    fn change(&self, transition: Transition) -> StateChange {
        StateChange {
            previous: transition.previous,
            state: transition.state,
            entry: self.queue.current().cloned(),
        }
    }

    fn transition(&mut self, next: PlayerState, fx: &mut Vec<Effect>) -> Result<()> {
        let transition = self.player.transition(next)?;
        fx.push(Effect::Transition(self.change(transition)));
        Ok(())
    }

    /// Re-enter `Started` for the entry under the cursor.
    fn start_current(&mut self, position: Duration, fx: &mut Vec<Effect>) {
        let Some(index) = self.queue.cursor() else {
            return;
        };
        let Some(entry) = self.queue.current().cloned() else {
            return;
        };
        self.position = position;
        for transition in self.player.restart() {
            fx.push(Effect::Transition(self.change(transition)));
        }
        fx.push(Effect::Play {
            entry,
            index,
            position,
        });
    }

    fn stop_player(&mut self, fx: &mut Vec<Effect>) {
        if let Some(transition) = self.player.stop() {
            fx.push(Effect::Transition(self.change(transition)));
            fx.push(Effect::Stop);
        }
    }

    /// Cancel a live transfer. Its entry goes back to `Queued` and its item
    /// stays busy until the task finishes.
    fn retire(&mut self, transfer: ActiveTransfer) -> Effect {
        let entry = self.queue.get(transfer.entry_id).map(|e| e.state);
        if entry == Some(DownloadState::Downloading) {
            self.queue.set_state(transfer.entry_id, DownloadState::Queued);
        }
        self.draining.insert(transfer.serial, transfer.clone());
        Effect::Cancel(transfer)
    }

    fn is_live(&self, serial: u64) -> bool {
        self.transfers.values().any(|t| t.serial == serial)
    }

    /// Items that must not start a new transfer.
    fn busy_items(&self) -> HashSet<String> {
        self.transfers
            .values()
            .chain(self.draining.values())
            .map(|t| t.item_id.clone())
            .chain(self.deleting.iter().cloned())
            .collect()
    }

    fn take_transfer_for(&mut self, entry_id: QueueEntryId) -> Option<ActiveTransfer> {
        let kind = self
            .transfers
            .iter()
            .find(|(_, t)| t.entry_id == entry_id)
            .map(|(kind, _)| *kind)?;
        self.transfers.remove(&kind)
    }

    fn queue_changed(&self, foreground: bool) -> Effect {
        Effect::QueueChanged {
            event: QueueEvent::Changed {
                revision: self.queue.revision(),
                foreground_len: self.queue.len(QueueKind::Foreground),
                background_len: self.queue.len(QueueKind::Background),
                current_index: self.queue.cursor(),
            },
            playlist: foreground.then(|| {
                self.queue
                    .entries(QueueKind::Foreground)
                    .iter()
                    .map(|e| e.item.id.clone())
                    .collect()
            }),
        }
    }

    /// Mark `id` failed. When it is the entry being played, move on to the
    /// next queued entry or stop.
    fn fail_entry(&mut self, id: QueueEntryId, fx: &mut Vec<Effect>) {
        self.queue.set_state(id, DownloadState::Failed);
        let is_current = self.queue.current().map(|e| e.id) == Some(id);
        if !is_current || self.player.state() != PlayerState::Started {
            return;
        }
        match self.queue.next_queued_after_cursor() {
            Some(next) => {
                info!(next, "Current entry failed, advancing");
                self.queue.set_cursor(next);
                self.start_current(Duration::ZERO, fx);
            }
            None => {
                info!("Current entry failed and nothing is queued, stopping");
                self.stop_player(fx);
            }
        }
    }
}

// ============================================================================
// QueueCoordinator
// ============================================================================

pub struct QueueCoordinator {
    this: Weak<QueueCoordinator>,
    state: Mutex<CoordinatorState>,
    source: Arc<dyn MediaSource>,
    fs: Arc<dyn FileSystemAccess>,
    player: Arc<dyn LocalPlayer>,
    jukebox: Option<JukeboxBridge>,
    events: EventBus,
    listeners: RwLock<Vec<Arc<dyn PlayerStateListener>>>,
    random: RwLock<Option<Arc<dyn RandomSongSource>>>,
    /// Held by a transfer for its whole run and by file operations on the
    /// same item.
    file_locks: KeyedMutex<String>,
    config: CoordinatorConfig,
}

impl QueueCoordinator {
    pub fn new(
        source: Arc<dyn MediaSource>,
        fs: Arc<dyn FileSystemAccess>,
        player: Arc<dyn LocalPlayer>,
        jukebox: Option<JukeboxBridge>,
        events: EventBus,
        config: CoordinatorConfig,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(PlaybackError::Config)?;
        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(CoordinatorState {
                queue: PlayQueue::new(),
                player: PlayerStateMachine::new(),
                transfers: HashMap::new(),
                draining: HashMap::new(),
                deleting: HashSet::new(),
                next_serial: 0,
                shuffle_play: false,
                position: Duration::ZERO,
                volume: 1.0,
            }),
            source,
            fs,
            player,
            jukebox,
            events,
            listeners: RwLock::new(Vec::new()),
            random: RwLock::new(None),
            file_locks: KeyedMutex::new(),
            config,
        }))
    }

    pub fn add_listener(&self, listener: Arc<dyn PlayerStateListener>) {
        self.listeners.write().push(listener);
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Source of songs for shuffle play.
    pub fn set_random_source(&self, source: Arc<dyn RandomSongSource>) {
        *self.random.write() = Some(source);
    }

    // ------------------------------------------------------------------------
    // Queue mutation
    // ------------------------------------------------------------------------

    /// Add `items` to the queue of `kind`.
    ///
    /// `Replace` clears that queue first, cancelling its transfer and, for the
    /// foreground queue, stopping the player. With `start_playback` the
    /// cursor moves to the first new foreground entry and playback restarts
    /// there; the flag is ignored for the background queue. `Next` inserts
    /// right after the current entry.
    ///
    /// Replacing the foreground queue turns shuffle play off.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn enqueue(
        &self,
        items: Vec<MediaItem>,
        mode: EnqueueMode,
        kind: QueueKind,
        start_playback: bool,
        shuffle: bool,
    ) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if mode == EnqueueMode::Replace {
                if let Some(transfer) = st.transfers.remove(&kind) {
                    let cancel = st.retire(transfer);
                    fx.push(cancel);
                }
                if kind == QueueKind::Foreground {
                    st.stop_player(&mut fx);
                    st.shuffle_play = false;
                }
            }
            let added = items.len();
            let first = if shuffle {
                st.queue
                    .enqueue(items, mode, kind, Some(&mut rand::thread_rng()))
            } else {
                st.queue.enqueue::<ThreadRng>(items, mode, kind, None)
            };
            if start_playback && kind == QueueKind::Foreground && added > 0 {
                st.queue.set_cursor(first);
                st.start_current(Duration::ZERO, &mut fx);
            }
            debug!(first, added, "Enqueued");
            fx.push(st.queue_changed(kind == QueueKind::Foreground));
            fx
        };
        self.apply(effects).await?;
        self.schedule();
        Ok(())
    }

    /// Remove one entry, cancelling its transfer.
    ///
    /// Removing the current entry while playing continues with the entry that
    /// took its place; removing the last entry stops the player.
    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn remove(&self, entry_id: QueueEntryId) -> Result<QueueEntry> {
        let (effects, entry) = {
            let mut st = self.state.lock();
            let removed = st
                .queue
                .remove(entry_id)
                .ok_or(PlaybackError::EntryNotFound(entry_id))?;
            let mut fx = Vec::new();
            if let Some(transfer) = st.take_transfer_for(entry_id) {
                let cancel = st.retire(transfer);
                fx.push(cancel);
            }
            let foreground = removed.entry.kind == QueueKind::Foreground;
            if removed.was_current {
                let len = st.queue.len(QueueKind::Foreground);
                let ran_off_end = removed.index >= len;
                match st.player.state() {
                    PlayerState::Started if !ran_off_end => {
                        st.start_current(Duration::ZERO, &mut fx)
                    }
                    _ => st.stop_player(&mut fx),
                }
            } else if foreground && st.queue.cursor().is_none() {
                st.stop_player(&mut fx);
            }
            fx.push(st.queue_changed(foreground));
            (fx, removed.entry)
        };
        self.apply(effects).await?;
        self.schedule();
        Ok(entry)
    }

    /// Empty one queue. Clearing the foreground queue stops the player.
    #[instrument(skip(self))]
    pub async fn clear(&self, kind: QueueKind) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if let Some(transfer) = st.transfers.remove(&kind) {
                let cancel = st.retire(transfer);
                fx.push(cancel);
            }
            if kind == QueueKind::Foreground {
                st.stop_player(&mut fx);
            }
            st.queue.clear(kind);
            fx.push(st.queue_changed(kind == QueueKind::Foreground));
            fx
        };
        self.apply(effects).await
    }

    /// Drop foreground entries whose download is not complete. The current
    /// entry always stays.
    pub async fn clear_incomplete(&self) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            let dropped = st
                .queue
                .retain_foreground(|e| e.state == DownloadState::Complete);
            for entry in &dropped {
                if let Some(transfer) = st.take_transfer_for(entry.id) {
                    let cancel = st.retire(transfer);
                    fx.push(cancel);
                }
            }
            debug!(dropped = dropped.len(), "Cleared incomplete entries");
            fx.push(st.queue_changed(true));
            fx
        };
        self.apply(effects).await?;
        self.schedule();
        Ok(())
    }

    /// Delete the local files of an entry, saved or not. The entry stays
    /// queued and will download again.
    ///
    /// A running transfer of the item is cancelled and the files are removed
    /// once it has stopped writing.
    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn delete(&self, entry_id: QueueEntryId) -> Result<()> {
        let (effects, item) = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if let Some(transfer) = st.take_transfer_for(entry_id) {
                let cancel = st.retire(transfer);
                fx.push(cancel);
            }
            let entry = st
                .queue
                .get_mut(entry_id)
                .ok_or(PlaybackError::EntryNotFound(entry_id))?;
            entry.bytes_downloaded = 0;
            entry.pinned = false;
            let item = entry.item.clone();
            st.queue.set_state(entry_id, DownloadState::Queued);
            st.deleting.insert(item.id.clone());
            fx.push(st.queue_changed(false));
            (fx, item)
        };
        let applied = self.apply(effects).await;
        let deleted = {
            let _guard = self.file_locks.lock(item.id.clone()).await;
            DownloadFile::for_item(&self.config.media_dir, &item)
                .delete(self.fs.as_ref())
                .await
        };
        self.state.lock().deleting.remove(&item.id);
        applied?;
        deleted?;
        info!(item_id = %item.id, "Deleted local files");
        self.schedule();
        Ok(())
    }

    /// Keep the download of an entry after it finishes. A complete file is
    /// moved to its saved name now; otherwise when the transfer completes.
    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn pin(&self, entry_id: QueueEntryId) -> Result<()> {
        self.set_pinned(entry_id, true).await
    }

    /// Turn a saved download back into a cached one.
    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn unpin(&self, entry_id: QueueEntryId) -> Result<()> {
        self.set_pinned(entry_id, false).await
    }

    async fn set_pinned(&self, entry_id: QueueEntryId, pinned: bool) -> Result<()> {
        let (effects, item) = {
            let mut st = self.state.lock();
            let entry = st
                .queue
                .get_mut(entry_id)
                .ok_or(PlaybackError::EntryNotFound(entry_id))?;
            entry.pinned = pinned;
            let item = entry.item.clone();
            (vec![st.queue_changed(false)], item)
        };
        self.apply(effects).await?;

        let _guard = self.file_locks.lock(item.id.clone()).await;
        let file = DownloadFile::for_item(&self.config.media_dir, &item);
        let moved = if pinned {
            file.pin(self.fs.as_ref()).await?
        } else {
            file.unpin(self.fs.as_ref()).await?
        };
        debug!(item_id = %item.id, pinned, moved, "Updated pin");
        Ok(())
    }

    /// Shuffle the foreground queue; the current entry moves to the front.
    pub async fn shuffle(&self) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            st.queue.shuffle(&mut rand::thread_rng());
            vec![st.queue_changed(true)]
        };
        self.apply(effects).await
    }

    /// Rebuild the foreground queue from a saved session.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn restore(
        &self,
        items: Vec<MediaItem>,
        index: usize,
        position: Duration,
        auto_play: bool,
    ) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if let Some(transfer) = st.transfers.remove(&QueueKind::Foreground) {
                let cancel = st.retire(transfer);
                fx.push(cancel);
            }
            st.stop_player(&mut fx);
            st.queue.enqueue::<ThreadRng>(
                items,
                EnqueueMode::Replace,
                QueueKind::Foreground,
                None,
            );
            if st.queue.set_cursor(index) {
                st.position = position;
                if auto_play {
                    st.start_current(position, &mut fx);
                }
            }
            fx.push(st.queue_changed(true));
            fx
        };
        self.apply(effects).await?;
        self.schedule();
        Ok(())
    }

    pub fn repeat(&self) -> RepeatMode {
        self.state.lock().queue.repeat()
    }

    pub fn set_repeat(&self, repeat: RepeatMode) {
        self.state.lock().queue.set_repeat(repeat);
    }

    // ------------------------------------------------------------------------
    // Player control
    // ------------------------------------------------------------------------

    /// Move the cursor one step. Returns the new cursor, or `None` when the
    /// queue is at an end with repeat off.
    #[instrument(skip(self))]
    pub async fn skip(&self, direction: SkipDirection) -> Result<Option<usize>> {
        let (effects, target) = {
            let mut st = self.state.lock();
            let Some(target) = st.queue.skip_target(direction) else {
                return Ok(None);
            };
            let mut fx = Vec::new();
            st.queue.set_cursor(target);
            st.start_current(Duration::ZERO, &mut fx);
            fx.push(st.queue_changed(false));
            (fx, target)
        };
        self.apply(effects).await?;
        self.schedule();
        self.keep_shuffle_play_filled().await;
        Ok(self.current_index().or(Some(target)))
    }

    /// Start playing the foreground entry at `index`.
    #[instrument(skip(self))]
    pub async fn play(&self, index: usize) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let len = st.queue.len(QueueKind::Foreground);
            if !st.queue.set_cursor(index) {
                return Err(PlaybackError::IndexOutOfRange { index, len });
            }
            let mut fx = Vec::new();
            st.start_current(Duration::ZERO, &mut fx);
            fx.push(st.queue_changed(false));
            fx
        };
        self.apply(effects).await?;
        self.schedule();
        self.keep_shuffle_play_filled().await;
        Ok(())
    }

    /// `Started → Paused`; no-op from any other state.
    pub async fn pause(&self) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if st.player.state() == PlayerState::Started {
                st.transition(PlayerState::Paused, &mut fx)?;
                fx.push(Effect::Pause);
            }
            fx
        };
        self.apply(effects).await
    }

    /// `Paused → Started`; no-op from any other state.
    pub async fn resume(&self) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if st.player.state() == PlayerState::Paused {
                st.transition(PlayerState::Started, &mut fx)?;
                fx.push(Effect::Resume);
            }
            fx
        };
        self.apply(effects).await
    }

    pub async fn stop(&self) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            st.stop_player(&mut fx);
            fx
        };
        self.apply(effects).await
    }

    /// Pause when playing, resume when paused, otherwise start the current
    /// entry (or the first one).
    pub async fn toggle_play_pause(&self) -> Result<()> {
        let (state, cursor, empty) = {
            let st = self.state.lock();
            (
                st.player.state(),
                st.queue.cursor(),
                st.queue.len(QueueKind::Foreground) == 0,
            )
        };
        match state {
            PlayerState::Started => self.pause().await,
            PlayerState::Paused => self.resume().await,
            _ if empty => Ok(()),
            _ => self.play(cursor.unwrap_or(0)).await,
        }
    }

    pub async fn seek(&self, position: Duration) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            st.position = position;
            match st.queue.cursor() {
                Some(index) if st.player.state().is_active() => {
                    vec![Effect::Seek { index, position }]
                }
                _ => Vec::new(),
            }
        };
        self.apply(effects).await
    }

    /// Set the local volume, clamped to `[0, 1]`. In jukebox mode this sets
    /// the server gain instead.
    pub async fn set_volume(&self, volume: f32) -> Result<f32> {
        let volume = volume.clamp(0.0, 1.0);
        self.state.lock().volume = volume;
        self.apply(vec![Effect::Volume(volume)]).await?;
        Ok(volume)
    }

    /// The player has consumed the whole stream of the current entry.
    #[instrument(skip(self))]
    pub async fn on_stream_completed(&self) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            let mut fx = Vec::new();
            if st.player.state() != PlayerState::Started {
                return Ok(());
            }
            st.transition(PlayerState::Completed, &mut fx)?;
            match st.queue.skip_target(SkipDirection::Next) {
                Some(next) => {
                    st.queue.set_cursor(next);
                    st.position = Duration::ZERO;
                    st.transition(PlayerState::Started, &mut fx)?;
                    if let Some(entry) = st.queue.current().cloned() {
                        fx.push(Effect::Play {
                            entry,
                            index: next,
                            position: Duration::ZERO,
                        });
                    }
                }
                None => {
                    st.transition(PlayerState::Stopped, &mut fx)?;
                    fx.push(Effect::Stop);
                }
            }
            fx.push(st.queue_changed(false));
            fx
        };
        self.apply(effects).await?;
        self.schedule();
        self.keep_shuffle_play_filled().await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Shuffle play
    // ------------------------------------------------------------------------

    pub fn is_shuffle_play_enabled(&self) -> bool {
        self.state.lock().shuffle_play
    }

    /// Turn shuffle play on or off.
    ///
    /// Turning it on replaces the foreground queue with random songs from the
    /// source set by [`QueueCoordinator::set_random_source`] and starts
    /// playing them. While it is on, moving the cursor tops the queue up to
    /// [`SHUFFLE_PLAY_UPCOMING`] entries ahead and drops all but
    /// [`SHUFFLE_PLAY_HISTORY`] played ones.
    #[instrument(skip(self))]
    pub async fn set_shuffle_play_enabled(&self, enabled: bool) -> Result<()> {
        if !enabled {
            self.state.lock().shuffle_play = false;
            return Ok(());
        }
        if self.random.read().is_none() {
            return Err(PlaybackError::FeatureUnsupported(
                "Shuffle play needs a random song source".to_string(),
            ));
        }
        self.clear(QueueKind::Foreground).await?;
        self.state.lock().shuffle_play = true;
        self.refill_shuffle_play().await
    }

    async fn keep_shuffle_play_filled(&self) {
        if let Err(e) = self.refill_shuffle_play().await {
            warn!(error = %e, "Topping up shuffle play failed");
        }
    }

    async fn refill_shuffle_play(&self) -> Result<()> {
        let (effects, wanted, was_empty) = {
            let mut st = self.state.lock();
            if !st.shuffle_play {
                return Ok(());
            }
            let mut fx = Vec::new();
            let played = st.queue.cursor().unwrap_or(0);
            if played > SHUFFLE_PLAY_HISTORY {
                let stale: Vec<QueueEntryId> = st.queue.entries(QueueKind::Foreground)
                    [..played - SHUFFLE_PLAY_HISTORY]
                    .iter()
                    .map(|e| e.id)
                    .collect();
                for id in stale {
                    st.queue.remove(id);
                    if let Some(transfer) = st.take_transfer_for(id) {
                        let cancel = st.retire(transfer);
                        fx.push(cancel);
                    }
                }
                fx.push(st.queue_changed(true));
            }
            let len = st.queue.len(QueueKind::Foreground);
            let upcoming = match st.queue.cursor() {
                Some(cursor) => len - cursor - 1,
                None => len,
            };
            (fx, SHUFFLE_PLAY_UPCOMING.saturating_sub(upcoming), len == 0)
        };
        self.apply(effects).await?;
        if wanted == 0 {
            return Ok(());
        }

        let source = self.random.read().clone().ok_or_else(|| {
            PlaybackError::FeatureUnsupported("Shuffle play needs a random song source".to_string())
        })?;
        let songs = source
            .random_songs(wanted, &CancellationToken::new())
            .await?;
        debug!(wanted, got = songs.len(), "Topping up shuffle play");
        self.enqueue(songs, EnqueueMode::Append, QueueKind::Foreground, was_empty, false)
            .await
    }

    // ------------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------------

    /// Start transfers for the next queued entries.
    ///
    /// At most one foreground and one background transfer run at a time, and
    /// an item already being fetched by one queue is not picked by the other.
    /// Foreground downloads pause while jukebox mode is on.
    pub fn download_next(&self) -> Vec<JoinHandle<()>> {
        let Some(this) = self.this.upgrade() else {
            return Vec::new();
        };
        let jukebox = self.is_jukebox_enabled();
        let jobs = {
            let mut st = self.state.lock();
            let mut jobs = Vec::new();
            for kind in [QueueKind::Foreground, QueueKind::Background] {
                if st.transfers.contains_key(&kind) {
                    continue;
                }
                if kind == QueueKind::Foreground && jukebox {
                    continue;
                }
                if kind == QueueKind::Background
                    && !self.config.playback.continuous_prefetch
                    && st.transfers.contains_key(&QueueKind::Foreground)
                {
                    continue;
                }
                let busy = st.busy_items();
                let Some(id) = st.queue.next_download(kind, &busy) else {
                    continue;
                };
                st.queue.set_state(id, DownloadState::Downloading);
                let Some(entry) = st.queue.get(id).cloned() else {
                    continue;
                };
                let transfer = ActiveTransfer {
                    serial: st.next_serial,
                    entry_id: id,
                    item_id: entry.item.id.clone(),
                    cancel: CancellationToken::new(),
                };
                st.next_serial += 1;
                st.transfers.insert(kind, transfer.clone());
                jobs.push((entry, kind, transfer));
            }
            jobs
        };

        jobs.into_iter()
            .map(|(entry, kind, transfer)| {
                let this = Arc::clone(&this);
                core_async::task::spawn(async move {
                    this.run_transfer(entry, kind, transfer.serial, transfer.cancel)
                        .await
                })
            })
            .collect()
    }

    /// The entry whose transfer is running, foreground first.
    pub fn current_downloading(&self) -> Option<QueueEntry> {
        let st = self.state.lock();
        let entry = [QueueKind::Foreground, QueueKind::Background]
            .into_iter()
            .filter_map(|kind| st.transfers.get(&kind))
            .find_map(|t| st.queue.get(t.entry_id).cloned());
        entry
    }

    /// Mark an entry failed, advancing playback when it was being played.
    pub async fn mark_failed(&self, entry_id: QueueEntryId) -> Result<()> {
        let effects = {
            let mut st = self.state.lock();
            if st.queue.get(entry_id).is_none() {
                return Err(PlaybackError::EntryNotFound(entry_id));
            }
            let mut fx = Vec::new();
            if let Some(transfer) = st.take_transfer_for(entry_id) {
                let cancel = st.retire(transfer);
                fx.push(cancel);
            }
            st.fail_entry(entry_id, &mut fx);
            fx.push(st.queue_changed(false));
            fx
        };
        self.apply(effects).await?;
        self.schedule();
        Ok(())
    }

    async fn run_transfer(
        self: Arc<Self>,
        entry: QueueEntry,
        kind: QueueKind,
        serial: u64,
        cancel: CancellationToken,
    ) {
        let _guard = self.file_locks.lock(entry.item.id.clone()).await;
        let file = DownloadFile::for_item(&self.config.media_dir, &entry.item);
        let offset = file.resume_offset(self.fs.as_ref()).await;
        self.emit(CoreEvent::Download(DownloadEvent::Started {
            entry_id: entry.id.to_string(),
            item_id: entry.item.id.clone(),
            queue: kind.as_str().to_string(),
            offset,
        }));

        let id = entry.id;
        let on_progress =
            |written: u64, total: Option<u64>| self.record_progress(serial, id, written, total);
        let outcome = download::transfer(
            self.source.as_ref(),
            self.fs.as_ref(),
            &entry.item,
            &file,
            &cancel,
            self.config.copy_buffer_bytes,
            &on_progress,
        )
        .await;

        let pinned = self.entry(id).is_some_and(|e| e.pinned);
        if outcome.is_ok() && pinned {
            if let Err(e) = file.pin(self.fs.as_ref()).await {
                warn!(item_id = %entry.item.id, error = %e, "Saving download failed");
            }
        }
        self.finish_transfer(entry, kind, serial, outcome).await;
    }

    fn record_progress(&self, serial: u64, id: QueueEntryId, written: u64, total: Option<u64>) {
        let mut st = self.state.lock();
        if !st.is_live(serial) {
            return;
        }
        if let Some(entry) = st.queue.get_mut(id) {
            entry.bytes_downloaded = written;
            if total.is_some() {
                entry.total_bytes = total;
            }
        }
    }

    /// Fold a transfer outcome back into the queue. Outcomes of retired
    /// transfers only produce a `Cancelled` event.
    async fn finish_transfer(
        &self,
        entry: QueueEntry,
        kind: QueueKind,
        serial: u64,
        outcome: Result<Downloaded>,
    ) {
        let entry_id = entry.id.to_string();
        let item_id = entry.item.id.clone();
        let (effects, event) = {
            let mut st = self.state.lock();
            if st.transfers.get(&kind).map(|t| t.serial) == Some(serial) {
                st.transfers.remove(&kind);
            } else {
                st.draining.remove(&serial);
                drop(st);
                debug!(item_id = %item_id, serial, "Dropping outcome of a retired transfer");
                self.emit(CoreEvent::Download(DownloadEvent::Cancelled { entry_id, item_id }));
                self.schedule();
                return;
            }
            let mut fx = Vec::new();
            let event = match &outcome {
                Ok(done) => {
                    if let Some(e) = st.queue.get_mut(entry.id) {
                        e.bytes_downloaded = done.bytes;
                        e.total_bytes = Some(done.bytes);
                    }
                    st.queue.set_state(entry.id, DownloadState::Complete);
                    if kind == QueueKind::Background && self.config.playback.bounded_background_queue
                    {
                        st.queue.remove(entry.id);
                    }
                    info!(item_id = %item_id, bytes = done.bytes, "Download finished");
                    DownloadEvent::Completed {
                        entry_id,
                        item_id,
                        bytes: done.bytes,
                    }
                }
                Err(e) if e.is_cancelled() => {
                    if st.queue.get(entry.id).map(|e| e.state) == Some(DownloadState::Downloading) {
                        st.queue.set_state(entry.id, DownloadState::Queued);
                    }
                    debug!(item_id = %item_id, "Download cancelled");
                    DownloadEvent::Cancelled { entry_id, item_id }
                }
                Err(e) => {
                    warn!(item_id = %item_id, error = %e, "Download failed");
                    if st.queue.get(entry.id).is_some() {
                        st.fail_entry(entry.id, &mut fx);
                    }
                    DownloadEvent::Failed {
                        entry_id,
                        item_id,
                        message: e.user_message(),
                    }
                }
            };
            fx.push(st.queue_changed(false));
            (fx, event)
        };
        self.emit(CoreEvent::Download(event));
        if let Err(e) = self.apply(effects).await {
            warn!(error = %e, "Applying download outcome failed");
        }
        self.schedule();
    }

    fn schedule(&self) {
        if self.config.auto_download {
            self.download_next();
        }
    }

    // ------------------------------------------------------------------------
    // Jukebox
    // ------------------------------------------------------------------------

    pub fn is_jukebox_enabled(&self) -> bool {
        self.jukebox.as_ref().is_some_and(JukeboxBridge::is_enabled)
    }

    /// Hand playback to the server or take it back.
    ///
    /// Enabling fails with [`PlaybackError::FeatureUnsupported`] on servers
    /// that are too old or unlicensed, and the local player keeps going.
    #[instrument(skip(self))]
    pub async fn set_jukebox_enabled(&self, enabled: bool) -> Result<()> {
        let bridge = self.jukebox.as_ref().ok_or_else(|| {
            PlaybackError::FeatureUnsupported("Jukebox is not available".to_string())
        })?;
        if bridge.is_enabled() == enabled {
            return Ok(());
        }
        let (ids, cursor, state, stored_position) = {
            let st = self.state.lock();
            let ids: Vec<String> = st
                .queue
                .entries(QueueKind::Foreground)
                .iter()
                .map(|e| e.item.id.clone())
                .collect();
            (ids, st.queue.cursor(), st.player.state(), st.position)
        };

        if enabled {
            if let Err(e) = bridge.enable().await {
                self.emit(CoreEvent::Jukebox(JukeboxEvent::Error {
                    message: e.user_message(),
                }));
                return Err(e);
            }
            let position = if state.is_active() {
                self.player.position().await.unwrap_or(stored_position)
            } else {
                stored_position
            };
            if let Err(e) = self.player.stop().await {
                warn!(error = %e, "Stopping local player failed");
            }
            let retired = {
                let mut st = self.state.lock();
                let transfer = st.transfers.remove(&QueueKind::Foreground);
                transfer.map(|t| st.retire(t))
            };
            if let Some(cancel) = retired {
                self.apply(vec![cancel]).await?;
            }
            self.emit(CoreEvent::Jukebox(JukeboxEvent::Enabled));
            bridge.set_playlist(&ids).await?;
            if let (Some(index), PlayerState::Started) = (cursor, state) {
                bridge.play(index, position).await?;
            }
        } else {
            if let Err(e) = bridge.disable().await {
                warn!(error = %e, "Stopping jukebox failed");
            }
            self.emit(CoreEvent::Jukebox(JukeboxEvent::Disabled));
            let current = self.state.lock().queue.current().cloned();
            if let (Some(entry), PlayerState::Started) = (current, state) {
                let source = self.playback_source(entry).await;
                self.player.play(source, stored_position).await?;
            }
            self.schedule();
        }
        Ok(())
    }

    /// Step the server gain by one notch.
    pub async fn adjust_jukebox_volume(&self, up: bool) -> Result<f32> {
        match self.jukebox.as_ref() {
            Some(bridge) if bridge.is_enabled() => bridge.adjust_volume(up).await,
            _ => Err(PlaybackError::FeatureUnsupported(
                "Jukebox mode is off".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn player_state(&self) -> PlayerState {
        self.state.lock().player.state()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.state.lock().queue.cursor()
    }

    pub fn current_entry(&self) -> Option<QueueEntry> {
        self.state.lock().queue.current().cloned()
    }

    pub fn entries(&self, kind: QueueKind) -> Vec<QueueEntry> {
        self.state.lock().queue.entries(kind).to_vec()
    }

    pub fn entry(&self, id: QueueEntryId) -> Option<QueueEntry> {
        self.state.lock().queue.get(id).cloned()
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().queue.revision()
    }

    pub fn total_duration(&self) -> Duration {
        self.state.lock().queue.total_duration()
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    /// Snapshot for remote-control receivers.
    pub async fn remote_control_status(&self) -> RemoteControlStatus {
        let (entry, index, len, state, stored) = {
            let st = self.state.lock();
            (
                st.queue.current().cloned(),
                st.queue.cursor(),
                st.queue.len(QueueKind::Foreground),
                st.player.state(),
                st.position,
            )
        };
        let position = if state.is_active() && !self.is_jukebox_enabled() {
            self.player.position().await.unwrap_or(stored)
        } else {
            stored
        };
        RemoteControlStatus::new(entry.as_ref(), index, len, state, position)
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    fn emit(&self, event: CoreEvent) {
        // No subscribers is not an error.
        let _ = self.events.emit(event);
    }

    async fn playback_source(&self, entry: QueueEntry) -> PlaybackSource {
        let file = DownloadFile::for_item(&self.config.media_dir, &entry.item);
        let finished = file.finished(self.fs.as_ref()).await.map(Path::to_path_buf);
        PlaybackSource {
            entry_id: entry.id,
            complete: finished.is_some(),
            path: finished.unwrap_or(file.partial),
            item: entry.item,
        }
    }

    /// Apply effects in order. Every effect runs; the first failure is
    /// returned.
    async fn apply(&self, effects: Vec<Effect>) -> Result<()> {
        let mut first_error = None;
        for effect in effects {
            let jukebox = self.jukebox.as_ref().filter(|b| b.is_enabled());
            let outcome = match effect {
                Effect::Transition(change) => {
                    self.notify(&change);
                    Ok(())
                }
                Effect::QueueChanged { event, playlist } => {
                    self.emit(CoreEvent::Queue(event));
                    match (jukebox, playlist) {
                        (Some(bridge), Some(ids)) => bridge.set_playlist(&ids).await,
                        _ => Ok(()),
                    }
                }
                Effect::Cancel(transfer) => {
                    debug!(item_id = %transfer.item_id, "Cancelling transfer");
                    transfer.cancel.cancel();
                    Ok(())
                }
                Effect::Play {
                    entry,
                    index,
                    position,
                } => match jukebox {
                    Some(bridge) => bridge.play(index, position).await,
                    None => {
                        let source = self.playback_source(entry).await;
                        self.player.play(source, position).await
                    }
                },
                Effect::Pause => match jukebox {
                    Some(bridge) => bridge.stop().await,
                    None => self.player.pause().await,
                },
                Effect::Resume => match jukebox {
                    Some(bridge) => bridge.start().await,
                    None => self.player.resume().await,
                },
                Effect::Stop => match jukebox {
                    Some(bridge) => bridge.stop().await,
                    None => self.player.stop().await,
                },
                Effect::Seek { index, position } => match jukebox {
                    Some(bridge) => bridge.play(index, position).await,
                    None => self.player.seek(position).await,
                },
                Effect::Volume(volume) => match jukebox {
                    Some(bridge) => bridge.set_gain(volume).await.map(|_| ()),
                    None => self.player.set_volume(volume).await,
                },
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Playback command failed");
                if jukebox.is_some() {
                    self.emit(CoreEvent::Jukebox(JukeboxEvent::Error {
                        message: e.user_message(),
                    }));
                }
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn notify(&self, change: &StateChange) {
        debug!(previous = %change.previous, state = %change.state, "Player state changed");
        for listener in self.listeners.read().iter() {
            listener.on_state_changed(change);
        }
        self.emit(CoreEvent::Playback(PlaybackEvent::StateChanged {
            previous: change.previous.as_str().to_string(),
            state: change.state.as_str().to_string(),
            item_id: change.entry.as_ref().map(|e| e.item.id.clone()),
        }));
    }
}

impl std::fmt::Debug for QueueCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("QueueCoordinator")
            .field("foreground", &st.queue.len(QueueKind::Foreground))
            .field("background", &st.queue.len(QueueKind::Background))
            .field("cursor", &st.queue.cursor())
            .field("state", &st.player.state())
            .finish()
    }
}
