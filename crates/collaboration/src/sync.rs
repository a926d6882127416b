/// Real-time transport boundary
/// The hosting backend provides pub/sub channels with presence; the engine only sees these traits
use board::ElementId;
use serde::{Deserialize, Serialize};

use crate::{BoardId, CollaborationEvent, PeerId, PresenceState, Result};

/// Broadcast-only messages exchanged on a board channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    Cursor {
        peer_id: PeerId,
        x: f64,
        y: f64,
    },

    LockChange {
        peer_id: PeerId,
        element_id: ElementId,
        locked: bool,
    },

    ElementChange {
        event: CollaborationEvent,
    },
}

impl BroadcastMessage {
    pub fn sender(&self) -> PeerId {
        match self {
            BroadcastMessage::Cursor { peer_id, .. }
            | BroadcastMessage::LockChange { peer_id, .. } => *peer_id,
            BroadcastMessage::ElementChange { event } => event.peer_id,
        }
    }
}

/// Everything a channel can deliver to its subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Subscription confirmed; presence may now be tracked
    Subscribed,

    /// Full tracked presence state of the channel
    PresenceSync(Vec<PresenceState>),

    PresenceJoin(Vec<PresenceState>),

    PresenceLeave(Vec<PresenceState>),

    Broadcast(BroadcastMessage),

    /// Membership lost; the channel is unusable
    Closed,
}

/// One board subscription
pub trait Channel: Send {
    fn track(&mut self, presence: &PresenceState) -> Result<()>;

    fn untrack(&mut self) -> Result<()>;

    fn send(&mut self, message: &BroadcastMessage) -> Result<()>;

    /// Next pending event, without blocking.
    fn try_recv(&mut self) -> Option<ChannelEvent>;

    fn close(&mut self) -> Result<()>;
}

/// Opens board channels keyed by the subscriber's presence key
pub trait Transport {
    fn join_channel(&mut self, board_id: BoardId, presence_key: PeerId) -> Result<Box<dyn Channel>>;
}
