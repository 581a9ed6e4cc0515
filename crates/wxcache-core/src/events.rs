//! Progress events for fetch operations.
//!
//! Every step start and finish, per-file sync decision and operation outcome
//! is published on a broadcast channel. Subscribing is optional; events sent
//! with no subscriber are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a month file was not downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SkipReason {
    /// Cached copy already covers the whole month.
    Complete,
    /// Checked on the server within the recheck interval.
    RecentlyChecked,
    /// Server copy has not changed since it was cached.
    NotModified,
}

/// Events emitted while fetching.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum FetchEvent {
    /// A fetch operation was accepted.
    Started { station: String, request_id: u32 },
    /// A queued step began.
    StepStarted { station: String, step: String },
    /// A queued step finished and queued `follow_ups` more.
    StepFinished {
        station: String,
        step: String,
        follow_ups: usize,
    },
    /// A month file was written to the cache.
    FileCached {
        station: String,
        url: String,
        inserted: usize,
        replaced: bool,
    },
    /// A month file needed no download.
    FileSkipped {
        station: String,
        url: String,
        reason: SkipReason,
    },
    /// The requested range holds no data on the server.
    RangeEmpty { station: String },
    /// The operation produced its result.
    Completed { station: String, rows: usize },
    /// The operation failed.
    Failed { station: String, error: String },
    /// The operation was cancelled.
    Cancelled { station: String },
}

/// Sender for fetch events.
pub type EventSender = broadcast::Sender<FetchEvent>;

/// Receiver for fetch events.
pub type EventReceiver = broadcast::Receiver<FetchEvent>;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: FetchEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
