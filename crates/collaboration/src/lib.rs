/// Collaborative synchronization and versioned history for boards
/// Presence, element leases, version-stamped change broadcast and branching undo/redo
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod config;
pub use config::*;

mod operations;
pub use operations::*;

mod presence;
pub use presence::*;

mod lease;
pub use lease::*;

mod conflict;
pub use conflict::*;

mod sync;
pub use sync::*;

mod hub;
pub use hub::*;

mod history;
pub use history::*;

mod listeners;
pub use listeners::*;

mod session;
pub use session::*;

mod apply;
pub use apply::*;

pub use board::{
    Bounds, DocumentStore, Element, ElementId, ElementKind, ElementPatch, MemoryBoard, Point,
};

#[derive(Debug, Error)]
pub enum CollaborationError {
    #[error("not joined to a board")]
    NotJoined,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("branch not found: {0}")]
    BranchNotFound(BranchId),

    #[error("history state not found: {0}")]
    StateNotFound(StateId),

    #[error("invalid operation: {0}")]
    InvalidOp(String),

    #[error("board error: {0}")]
    Board(#[from] board::BoardError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for CollaborationError {
    fn from(e: serde_json::Error) -> Self {
        CollaborationError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollaborationError>;

/// One connected client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub uuid::Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Board a session collaborates on; one channel per board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(pub uuid::Uuid);

impl BoardId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for BoardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scalar per-session version counter.
///
/// Local broadcasts tick it by one; accepted remote events raise it to the
/// sender's version. It is not a vector clock: concurrent edits from
/// different peers can look stale purely because of counter interleaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct VersionClock(pub u64);

impl VersionClock {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn current(&self) -> u64 {
        self.0
    }

    pub fn tick(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    pub fn observe(&mut self, version: u64) {
        self.0 = self.0.max(version);
    }

    pub fn is_stale(&self, version: u64) -> bool {
        version <= self.0
    }
}
