//! Event types for the jukebox event system
//!
//! Events are observational only: they report what the playback service did.
//! Nothing that mutates the queue is driven by them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of the playback cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    /// Polling the queue for the next entry
    Idle,
    /// An entry has been taken off the queue
    Dequeued,
    /// Preview assets rendered and loaded into the player
    Staging,
    /// Waiting for a start trigger, the timeout, or a manual unpause
    AwaitingStart,
    /// Media playing; waiting for the player to go idle
    Playing,
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "Idle"),
            PlaybackPhase::Dequeued => write!(f, "Dequeued"),
            PlaybackPhase::Staging => write!(f, "Staging"),
            PlaybackPhase::AwaitingStart => write!(f, "AwaitingStart"),
            PlaybackPhase::Playing => write!(f, "Playing"),
        }
    }
}

/// Which branch of the start gate won
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartTrigger {
    /// Authorized start request from the notification channel
    Requested { user_id: String },
    /// Gate timed out
    Timeout,
    /// Player was unpaused directly
    Unpaused,
}

/// Jukebox event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeboxEvent {
    /// Playback cycle moved to a new phase
    PhaseChanged {
        phase: PlaybackPhase,
        timestamp: DateTime<Utc>,
    },

    /// Entry taken off the queue for playback
    EntryDequeued {
        entry_id: i64,
        slug: String,
        timestamp: DateTime<Utc>,
    },

    /// Start gate resolved and playback resumed
    PlaybackStarted {
        entry_id: i64,
        trigger: StartTrigger,
        timestamp: DateTime<Utc>,
    },

    /// Player reported idle after playback
    PlaybackFinished {
        entry_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Player process went away
    PlayerExited { timestamp: DateTime<Utc> },
}

/// Broadcast bus for [`JukeboxEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JukeboxEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JukeboxEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
