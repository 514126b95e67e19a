//! Rotation lifecycle events
//!
//! Rotation runs in the background with no caller to report to, so its
//! outcomes are published on a broadcast channel. Publishing never blocks:
//! without subscribers events are dropped, and slow subscribers lag.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// Event emitted by the scheduler, recovery and manual rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RotationEvent {
    /// Role rotated
    Rotated {
        /// Rotated role
        role: String,
        /// New last-rotation time
        rotated_at: DateTime<Utc>,
        /// Next scheduled rotation
        next_rotation: DateTime<Utc>,
    },

    /// Rotation attempt failed and was rescheduled
    RotationFailed {
        /// Affected role
        role: String,
        /// Consecutive failures so far
        attempt: u32,
        /// Failure message
        error: String,
        /// When the retry is scheduled
        next_retry: DateTime<Utc>,
    },

    /// Consecutive failures reached the retry budget; retries continue at max backoff
    RetriesExhausted {
        /// Affected role
        role: String,
        /// Consecutive failures
        attempts: u32,
        /// Last failure message
        error: String,
    },

    /// In-flight rotation found at startup was completed
    Recovered {
        /// Recovered role
        role: String,
        /// WAL record that was re-applied
        wal_id: String,
        /// New last-rotation time
        rotated_at: DateTime<Utc>,
    },

    /// WAL record dropped without being applied
    WalDiscarded {
        /// Role named by the record
        role: String,
        /// Dropped record
        wal_id: String,
        /// Why it no longer applies
        reason: String,
    },

    /// Role excluded from automatic rotation until re-created or repaired
    Quarantined {
        /// Affected role
        role: String,
        /// What made it unrecoverable
        reason: String,
    },
}

impl RotationEvent {
    /// Role the event is about
    pub fn role(&self) -> &str {
        match self {
            Self::Rotated { role, .. }
            | Self::RotationFailed { role, .. }
            | Self::RetriesExhausted { role, .. }
            | Self::Recovered { role, .. }
            | Self::WalDiscarded { role, .. }
            | Self::Quarantined { role, .. } => role,
        }
    }
}

/// Broadcast channel for [`RotationEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RotationEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscriber; sees events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to current subscribers
    pub fn publish(&self, event: RotationEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
