/// Version-stamped change broadcast and conflict detection
///
/// Conflicts are detected, never merged: a stale incoming change is reported
/// and dropped, and the caller decides what to do about it.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{BoardId, ChangeType, Operation, PeerId, Result, VersionClock};

/// Wire envelope for an element change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationEvent {
    #[serde(rename = "type")]
    pub change: ChangeType,
    pub peer_id: PeerId,
    pub board_id: BoardId,
    pub payload: Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Sender's own scalar counter at send time
    pub version: u64,
}

impl CollaborationEvent {
    /// Decodes the payload as an operation, when the sender sent one.
    pub fn operation(&self) -> Result<Operation> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// What happened to an incoming change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// Our own message came back
    Echo,

    /// Version at or below what we already know; discarded
    Conflict { known_version: u64 },

    /// Newer than anything seen; hand to the document store
    Accepted,
}

/// Stamps outgoing changes and screens incoming ones
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    peer_id: PeerId,
    clock: VersionClock,
}

impl ConflictDetector {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            clock: VersionClock::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.clock.current()
    }

    /// Ticks the clock by exactly one and wraps the payload.
    pub fn stamp(&mut self, board_id: BoardId, change: ChangeType, payload: Value) -> CollaborationEvent {
        let version = self.clock.tick();
        CollaborationEvent {
            change,
            peer_id: self.peer_id,
            board_id,
            payload,
            timestamp: chrono::Utc::now(),
            version,
        }
    }

    pub fn receive(&mut self, event: &CollaborationEvent) -> Reception {
        if event.peer_id == self.peer_id {
            debug!("suppressing echo of version {}", event.version);
            return Reception::Echo;
        }

        let known_version = self.clock.current();
        if self.clock.is_stale(event.version) {
            warn!(
                "possible divergence: {} change from {} at version {} (known {})",
                event.change.as_str(),
                event.peer_id,
                event.version,
                known_version
            );
            return Reception::Conflict { known_version };
        }

        self.clock.observe(event.version);
        Reception::Accepted
    }

    pub fn reset(&mut self) {
        self.clock = VersionClock::new();
    }
}
