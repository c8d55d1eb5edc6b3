//! # Event Bus System
//!
//! Broadcasts typed notifications from the protocol client and the playback
//! coordinator to whoever is listening (UI, remote-control receivers, logs).
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain, wrapped by [`CoreEvent`]
//! - **EventBus**: cloneable publisher over `tokio::sync::broadcast`
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────────┐
//! │ Request Executor ├────────>│           ├────────────>│ UI             │
//! └──────────────────┘         │ EventBus  │             └────────────────┘
//! ┌──────────────────┐  emit   │ (broadcast│  subscribe  ┌────────────────┐
//! │ Queue Coordinator├────────>│  channel) ├────────────>│ Remote control │
//! └──────────────────┘         └───────────┘             └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, QueueEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut queue_only = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Queue(_)));
//!
//! bus.emit(CoreEvent::Queue(QueueEvent::Changed {
//!     revision: 1,
//!     foreground_len: 3,
//!     background_len: 0,
//!     current_index: Some(0),
//! }))
//! .ok();
//!
//! assert!(queue_only.recv().await.is_ok());
//! # }
//! ```

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Network(NetworkEvent),
    Download(DownloadEvent),
    Queue(QueueEvent),
    Playback(PlaybackEvent),
    Jukebox(JukeboxEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Network(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Queue(_) => "Queue changed",
            CoreEvent::Playback(_) => "Player state changed",
            CoreEvent::Jukebox(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Network(NetworkEvent::Exhausted { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Jukebox(JukeboxEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Network(NetworkEvent::Retrying { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Playback(_) | CoreEvent::Jukebox(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Network Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NetworkEvent {
    /// An attempt failed and another one is about to start.
    Retrying {
        endpoint: String,
        /// Retry number, starting at 1.
        attempt: u32,
        /// Retries allowed after the first attempt.
        max_retries: u32,
        message: String,
    },
    /// Every attempt failed.
    Exhausted { endpoint: String, attempts: u32 },
}

impl NetworkEvent {
    fn description(&self) -> &str {
        match self {
            NetworkEvent::Retrying { .. } => "Retrying request",
            NetworkEvent::Exhausted { .. } => "Request failed after all attempts",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    Started {
        entry_id: String,
        item_id: String,
        /// `foreground` or `background`.
        queue: String,
        /// Byte offset the transfer resumes from.
        offset: u64,
    },
    Completed {
        entry_id: String,
        item_id: String,
        bytes: u64,
    },
    /// Carries a summarized message suitable for showing to the user.
    Failed {
        entry_id: String,
        item_id: String,
        message: String,
    },
    Cancelled { entry_id: String, item_id: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Cancelled { .. } => "Download cancelled",
        }
    }
}

// ============================================================================
// Queue / Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    Changed {
        revision: u64,
        foreground_len: usize,
        background_len: usize,
        current_index: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    StateChanged {
        previous: String,
        state: String,
        item_id: Option<String>,
    },
}

// ============================================================================
// Jukebox Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum JukeboxEvent {
    Enabled,
    Disabled,
    Error { message: String },
}

impl JukeboxEvent {
    fn description(&self) -> &str {
        match self {
            JukeboxEvent::Enabled => "Jukebox mode enabled",
            JukeboxEvent::Disabled => "Jukebox mode disabled",
            JukeboxEvent::Error { .. } => "Jukebox command failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender, so every component can hold its own
/// handle. Slow subscribers receive `RecvError::Lagged` instead of blocking
/// publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Publishers usually ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map(|f| f(event)).unwrap_or(true)
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
