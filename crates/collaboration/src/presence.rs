/// Peer presence tracking for collaborative boards
/// Who is connected, what they have selected, and where their cursor is
use board::{ElementId, Point};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::{BoardId, CursorThrottleConfig, PeerId};

/// Colour assigned to a peer for cursor/selection highlighting
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerColor(pub String);

impl PeerColor {
    /// Picks a palette entry from the peer id's bits, so a peer keeps its
    /// colour across reconnects.
    pub fn for_peer(peer_id: &PeerId, palette: &[String]) -> Self {
        if palette.is_empty() {
            return Self("#808080".to_string());
        }
        let index = (peer_id.0.as_u128() % palette.len() as u128) as usize;
        Self(palette[index].clone())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

/// Presence record a peer tracks on the channel. Late joiners receive it
/// through a full presence sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub peer_id: PeerId,
    pub name: String,
    #[serde(default)]
    pub cursor: Option<Point>,
    #[serde(default)]
    pub selection: Vec<ElementId>,
    pub online_at: chrono::DateTime<chrono::Utc>,
}

impl PresenceState {
    pub fn new(peer_id: PeerId, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
            cursor: None,
            selection: Vec::new(),
            online_at: chrono::Utc::now(),
        }
    }
}

/// A remote (or local) peer as seen by this session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorPresence {
    pub peer_id: PeerId,
    pub board_id: BoardId,
    pub cursor: Option<Point>,
    pub selection: BTreeSet<ElementId>,
    pub color: PeerColor,
    pub name: String,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl CollaboratorPresence {
    pub fn from_state(state: &PresenceState, board_id: BoardId, palette: &[String]) -> Self {
        Self {
            peer_id: state.peer_id,
            board_id,
            cursor: state.cursor,
            selection: state.selection.iter().copied().collect(),
            color: PeerColor::for_peer(&state.peer_id, palette),
            name: state.name.clone(),
            last_seen: chrono::Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = chrono::Utc::now();
    }

    pub fn is_idle(&self, idle_after: Duration) -> bool {
        let elapsed = chrono::Utc::now() - self.last_seen;
        elapsed
            .to_std()
            .map(|elapsed| elapsed > idle_after)
            .unwrap_or(false)
    }
}

/// Presence map for one board
#[derive(Debug, Clone, Default)]
pub struct PresenceManager {
    peers: HashMap<PeerId, CollaboratorPresence>,
    cursors: HashMap<PeerId, Point>,
}

impl PresenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a tracked presence. The color stays whatever the
    /// first observation assigned.
    pub fn upsert(&mut self, state: &PresenceState, board_id: BoardId, palette: &[String]) {
        match self.peers.get_mut(&state.peer_id) {
            Some(existing) => {
                existing.name = state.name.clone();
                existing.selection = state.selection.iter().copied().collect();
                if state.cursor.is_some() {
                    existing.cursor = state.cursor;
                }
                existing.touch();
            }
            None => {
                self.peers.insert(
                    state.peer_id,
                    CollaboratorPresence::from_state(state, board_id, palette),
                );
            }
        }
    }

    /// Replace the whole map with a full sync. Returns peers that dropped out.
    pub fn sync(
        &mut self,
        states: &[PresenceState],
        board_id: BoardId,
        palette: &[String],
    ) -> Vec<PeerId> {
        let present: BTreeSet<PeerId> = states.iter().map(|s| s.peer_id).collect();
        let gone: Vec<PeerId> = self
            .peers
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in &gone {
            self.remove(id);
        }
        for state in states {
            self.upsert(state, board_id, palette);
        }
        gone
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<CollaboratorPresence> {
        self.cursors.remove(peer_id);
        self.peers.remove(peer_id)
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&CollaboratorPresence> {
        self.peers.get(peer_id)
    }

    /// Transient cursor update; never part of tracked presence.
    pub fn update_cursor(&mut self, peer_id: PeerId, position: Point) {
        self.cursors.insert(peer_id, position);
        if let Some(presence) = self.peers.get_mut(&peer_id) {
            presence.cursor = Some(position);
            presence.touch();
        }
    }

    pub fn cursor(&self, peer_id: &PeerId) -> Option<Point> {
        self.cursors.get(peer_id).copied()
    }

    pub fn cursors(&self) -> &HashMap<PeerId, Point> {
        &self.cursors
    }

    /// All peers, sorted by name for stable presentation
    pub fn all(&self) -> Vec<&CollaboratorPresence> {
        let mut peers: Vec<&CollaboratorPresence> = self.peers.values().collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name).then(a.peer_id.cmp(&b.peer_id)));
        peers
    }

    pub fn active(&self, idle_after: Duration) -> Vec<&CollaboratorPresence> {
        self.all()
            .into_iter()
            .filter(|p| !p.is_idle(idle_after))
            .collect()
    }

    pub fn selecting(&self, element_id: &ElementId) -> Vec<&CollaboratorPresence> {
        self.all()
            .into_iter()
            .filter(|p| p.selection.contains(element_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.cursors.clear();
    }
}

/// Drops cursor sends that come too soon or move too little.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    min_interval: Duration,
    min_distance: f64,
    last_sent: Option<(Instant, Point)>,
}

impl CursorThrottle {
    pub fn new(config: &CursorThrottleConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            min_distance: config.min_distance_px,
            last_sent: None,
        }
    }

    /// Returns true and remembers the send if the position should go out.
    pub fn admit(&mut self, now: Instant, position: Point) -> bool {
        if let Some((at, last)) = self.last_sent {
            if now.saturating_duration_since(at) < self.min_interval {
                return false;
            }
            if last.distance_to(&position) < self.min_distance {
                return false;
            }
        }
        self.last_sent = Some((now, position));
        true
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
