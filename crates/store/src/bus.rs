//! In-process change bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`StorageBus`] fans a [`StorageEvent`] out to every client view opened
//! on the same [`SessionOrigin`](crate::store::SessionOrigin), the way a
//! browser delivers `storage` events to the other tabs of an origin.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use quest_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StorageEvent
// ---------------------------------------------------------------------------

/// Notification that a key in the shared store changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEvent {
    /// The key that changed, e.g. `"currentReportId"`.
    pub key: String,

    /// New value, `None` when the key was removed.
    pub new_value: Option<JobId>,

    /// Origin-wide write order. Higher wins.
    pub seq: u64,

    /// The client view that performed the write.
    pub source: Uuid,

    /// When the write happened (UTC).
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// StorageBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 64;

/// Fan-out bus for store writes, plus the origin-wide write sequence.
pub struct StorageBus {
    sender: broadcast::Sender<StorageEvent>,
    seq: AtomicU64,
}

impl StorageBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Views that fall more than `capacity` events behind observe a
    /// `RecvError::Lagged` and re-hydrate from the durable backend.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            seq: AtomicU64::new(0),
        }
    }

    /// Reserve the next write sequence number.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Build and publish an event for a write that already holds `seq`.
    pub fn publish(&self, key: &str, new_value: Option<JobId>, seq: u64, source: Uuid) {
        let event = StorageEvent {
            key: key.to_string(),
            new_value,
            seq,
            source,
            timestamp: Utc::now(),
        };
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to every write published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }
}

impl Default for StorageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
