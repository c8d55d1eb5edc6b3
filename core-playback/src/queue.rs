//! # Play Queue
//!
//! The coordinator's data: a foreground ("now playing") list, a background
//! prefetch list, and a cursor into the foreground list.
//!
//! Every method here is synchronous and keeps the cursor valid: it is either
//! `None` or an index below the foreground length. The coordinator calls
//! these methods while holding its single state lock.

use core_remote::models::MediaItem;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadState {
    Queued,
    Downloading,
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
    Foreground,
    Background,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Foreground => "foreground",
            QueueKind::Background => "background",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueMode {
    Replace,
    Append,
    /// Insert right after the current entry ("play next"). Appends when
    /// nothing is current and for the background queue.
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirection {
    Next,
    Previous,
}

/// A media item plus the coordinator-owned state around it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub item: MediaItem,
    pub kind: QueueKind,
    pub state: DownloadState,
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// Saved downloads are kept; unpinned ones are cache.
    pub pinned: bool,
}

impl QueueEntry {
    pub fn new(item: MediaItem, kind: QueueKind) -> Self {
        Self {
            id: QueueEntryId::new(),
            total_bytes: item.size,
            item,
            kind,
            state: DownloadState::Queued,
            bytes_downloaded: 0,
            pinned: false,
        }
    }

    /// Downloaded fraction in `[0, 1]` when the size is known.
    pub fn progress(&self) -> Option<f32> {
        if self.state == DownloadState::Complete {
            return Some(1.0);
        }
        match self.total_bytes {
            Some(total) if total > 0 => Some((self.bytes_downloaded as f32 / total as f32).min(1.0)),
            _ => None,
        }
    }
}

// ============================================================================
// PlayQueue
// ============================================================================

#[derive(Debug, Default)]
pub struct PlayQueue {
    foreground: Vec<QueueEntry>,
    background: Vec<QueueEntry>,
    cursor: Option<usize>,
    repeat: RepeatMode,
    revision: u64,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, kind: QueueKind) -> &[QueueEntry] {
        match kind {
            QueueKind::Foreground => &self.foreground,
            QueueKind::Background => &self.background,
        }
    }

    fn entries_mut(&mut self, kind: QueueKind) -> &mut Vec<QueueEntry> {
        match kind {
            QueueKind::Foreground => &mut self.foreground,
            QueueKind::Background => &mut self.background,
        }
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.cursor.and_then(|i| self.foreground.get(i))
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn len(&self, kind: QueueKind) -> usize {
        self.entries(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_empty() && self.background.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        let seconds: u64 = self
            .foreground
            .iter()
            .filter_map(|e| e.item.duration)
            .map(u64::from)
            .sum();
        Duration::from_secs(seconds)
    }

    /// Locate an entry in either list.
    pub fn find(&self, id: QueueEntryId) -> Option<(QueueKind, usize)> {
        [QueueKind::Foreground, QueueKind::Background]
            .into_iter()
            .find_map(|kind| {
                self.entries(kind)
                    .iter()
                    .position(|e| e.id == id)
                    .map(|index| (kind, index))
            })
    }

    pub fn get(&self, id: QueueEntryId) -> Option<&QueueEntry> {
        self.find(id).map(|(kind, index)| &self.entries(kind)[index])
    }

    pub fn get_mut(&mut self, id: QueueEntryId) -> Option<&mut QueueEntry> {
        let (kind, index) = self.find(id)?;
        self.entries_mut(kind).get_mut(index)
    }

    pub fn set_state(&mut self, id: QueueEntryId, state: DownloadState) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.state = state;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Add items; returns the index of the first new entry. Inserting after
    /// the cursor leaves the cursor on the same entry.
    pub fn enqueue<R: Rng + ?Sized>(
        &mut self,
        items: Vec<MediaItem>,
        mode: EnqueueMode,
        kind: QueueKind,
        shuffle: Option<&mut R>,
    ) -> usize {
        if mode == EnqueueMode::Replace {
            self.clear(kind);
        }
        let mut added: Vec<QueueEntry> = items
            .into_iter()
            .map(|item| QueueEntry::new(item, kind))
            .collect();
        if let Some(rng) = shuffle {
            added.shuffle(rng);
        }
        let at = match (mode, kind, self.cursor) {
            (EnqueueMode::Next, QueueKind::Foreground, Some(c)) => c + 1,
            _ => self.len(kind),
        };
        self.entries_mut(kind).splice(at..at, added);
        self.touch();
        at
    }

    pub fn clear(&mut self, kind: QueueKind) -> Vec<QueueEntry> {
        let removed = std::mem::take(self.entries_mut(kind));
        if kind == QueueKind::Foreground {
            self.cursor = None;
        }
        self.touch();
        removed
    }

    /// Remove one entry. When it was current, the entry that slides into its
    /// place becomes current; removing the last entry moves the cursor back
    /// to the new last entry.
    pub fn remove(&mut self, id: QueueEntryId) -> Option<Removed> {
        let (kind, index) = self.find(id)?;
        let entry = self.entries_mut(kind).remove(index);
        let mut was_current = false;
        if kind == QueueKind::Foreground {
            let len = self.foreground.len();
            self.cursor = match self.cursor {
                _ if len == 0 => None,
                Some(c) if index < c => Some(c - 1),
                Some(c) if index == c => {
                    was_current = true;
                    Some(c.min(len - 1))
                }
                other => other,
            };
        }
        self.touch();
        Some(Removed {
            entry,
            index,
            was_current,
        })
    }

    /// Keep only entries matching `keep`, preserving the current entry.
    pub fn retain_foreground<F>(&mut self, mut keep: F) -> Vec<QueueEntry>
    where
        F: FnMut(&QueueEntry) -> bool,
    {
        let current = self.current().map(|e| e.id);
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.foreground)
            .into_iter()
            .partition(|e| Some(e.id) == current || keep(e));
        self.foreground = kept;
        self.cursor = current.and_then(|id| self.foreground.iter().position(|e| e.id == id));
        self.touch();
        dropped
    }

    pub fn set_cursor(&mut self, index: usize) -> bool {
        if index >= self.foreground.len() {
            return false;
        }
        self.cursor = Some(index);
        self.touch();
        true
    }

    /// Where `skip` would move the cursor, or `None` to stay put.
    pub fn skip_target(&self, direction: SkipDirection) -> Option<usize> {
        let len = self.foreground.len();
        if len == 0 {
            return None;
        }
        let Some(current) = self.cursor else {
            return Some(0);
        };
        match (self.repeat, direction) {
            (RepeatMode::Single, _) => Some(current),
            (_, SkipDirection::Next) if current + 1 < len => Some(current + 1),
            (RepeatMode::All, SkipDirection::Next) => Some(0),
            (_, SkipDirection::Previous) if current > 0 => Some(current - 1),
            (RepeatMode::All, SkipDirection::Previous) => Some(len - 1),
            (RepeatMode::Off, _) => None,
        }
    }

    /// Next `Queued` foreground entry after the cursor, wrapping only when
    /// repeat is `All`.
    pub fn next_queued_after_cursor(&self) -> Option<usize> {
        let len = self.foreground.len();
        let start = self.cursor.map_or(0, |c| c + 1);
        let forward = start..len;
        let wrapped = 0..start.min(len);
        let queued = |i: &usize| self.foreground[*i].state == DownloadState::Queued;
        match self.repeat {
            RepeatMode::All => forward
                .chain(wrapped)
                .filter(|i| Some(*i) != self.cursor)
                .find(queued),
            _ => forward.into_iter().find(queued),
        }
    }

    /// Next entry to download from `kind`, skipping entries whose item is in
    /// `busy_items`. Foreground entries are ranked by distance from the
    /// cursor, forward first on ties.
    pub fn next_download(&self, kind: QueueKind, busy_items: &HashSet<String>) -> Option<QueueEntryId> {
        let eligible = |e: &QueueEntry| {
            e.state == DownloadState::Queued && !busy_items.contains(&e.item.id)
        };
        match kind {
            QueueKind::Background => self.background.iter().find(|e| eligible(e)).map(|e| e.id),
            QueueKind::Foreground => {
                let anchor = self.cursor.unwrap_or(0);
                self.foreground
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| eligible(e))
                    .min_by_key(|(i, _)| (i.abs_diff(anchor), *i < anchor))
                    .map(|(_, e)| e.id)
            }
        }
    }

    /// Shuffle the foreground list, keeping the current entry first.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        match self.cursor {
            Some(c) if c < self.foreground.len() => {
                let current = self.foreground.remove(c);
                self.foreground.shuffle(rng);
                self.foreground.insert(0, current);
                self.cursor = Some(0);
            }
            _ => self.foreground.shuffle(rng),
        }
        self.touch();
    }
}

/// What [`PlayQueue::remove`] took out.
#[derive(Debug, Clone)]
pub struct Removed {
    pub entry: QueueEntry,
    pub index: usize,
    pub was_current: bool,
}
