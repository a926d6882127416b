/// Per-board collaboration session
///
/// Owns one channel membership at a time together with the presence map,
/// lease table and conflict detector for that board. Instantiate one session
/// per board a client edits and hand it to whoever needs it.
use board::{ElementId, Point};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    BoardId, BroadcastMessage, Channel, ChannelEvent, ChangeType, CollaborationError,
    CollaborationEvent, CollaboratorPresence, ConflictDetector, CursorThrottle, EngineConfig,
    LeaseChange, LeaseTable, ListenerRegistry, Operation, PeerId, PresenceManager,
    PresenceState, Reception, Result, Subscription, Transport,
};

/// Identity this session presents to the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPeer {
    pub id: PeerId,
    pub name: String,
}

impl LocalPeer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PeerId::new(),
            name: name.into(),
        }
    }
}

/// Callbacks for presentation layers and the document store
pub trait SessionObserver: Send + Sync {
    /// Remote collaborators after any presence change, sorted by name
    fn on_presence_change(&self, _collaborators: &[CollaboratorPresence]) {}

    fn on_cursor(&self, _peer_id: PeerId, _position: Point) {}

    /// `owner` is `None` when the lease was released
    fn on_lock_change(&self, _element_id: ElementId, _owner: Option<PeerId>) {}

    /// A remote change arrived at or below the known version and was dropped
    fn on_conflict(&self, _event: &CollaborationEvent, _known_version: u64) {}

    fn on_remote_change(&self, _event: &CollaborationEvent) {}

    fn on_connection_change(&self, _connected: bool) {}
}

struct Membership {
    board_id: BoardId,
    channel: Box<dyn Channel>,
    subscribed: bool,
    online_at: chrono::DateTime<chrono::Utc>,
}

pub struct CollaborationSession<T: Transport> {
    config: EngineConfig,
    local: LocalPeer,
    transport: T,
    membership: Option<Membership>,
    presence: PresenceManager,
    leases: LeaseTable,
    detector: ConflictDetector,
    throttle: CursorThrottle,
    selection: Vec<ElementId>,
    listeners: ListenerRegistry<dyn SessionObserver>,
}

impl<T: Transport> CollaborationSession<T> {
    pub fn new(config: EngineConfig, local: LocalPeer, transport: T) -> Self {
        Self {
            throttle: CursorThrottle::new(&config.cursor),
            detector: ConflictDetector::new(local.id),
            config,
            local,
            transport,
            membership: None,
            presence: PresenceManager::new(),
            leases: LeaseTable::new(),
            selection: Vec::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn local_peer(&self) -> &LocalPeer {
        &self.local
    }

    pub fn peer_id(&self) -> PeerId {
        self.local.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn board_id(&self) -> Option<BoardId> {
        self.membership.as_ref().map(|m| m.board_id)
    }

    pub fn is_joined(&self) -> bool {
        self.membership.is_some()
    }

    /// Subscribed and tracking presence
    pub fn is_connected(&self) -> bool {
        self.membership.as_ref().is_some_and(|m| m.subscribed)
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> Subscription {
        self.listeners.subscribe(observer)
    }

    /// Joins a board, leaving the current one first. Initial presence is
    /// tracked once the transport confirms the subscription.
    pub fn join(&mut self, board_id: BoardId) -> Result<()> {
        if self.membership.is_some() {
            self.leave()?;
        }

        let channel = self.transport.join_channel(board_id, self.local.id)?;
        self.membership = Some(Membership {
            board_id,
            channel,
            subscribed: false,
            online_at: chrono::Utc::now(),
        });
        self.detector.reset();
        info!("{} joining board {}", self.local.name, board_id);

        self.pump()?;
        Ok(())
    }

    /// Untracks presence, closes the channel and clears all board state.
    pub fn leave(&mut self) -> Result<()> {
        let Some(mut membership) = self.membership.take() else {
            return Ok(());
        };

        if membership.subscribed {
            if let Err(e) = membership.channel.untrack() {
                warn!("untrack failed while leaving {}: {}", membership.board_id, e);
            }
        }
        let closed = membership.channel.close();
        info!("{} left board {}", self.local.name, membership.board_id);

        self.clear_board_state();
        self.selection.clear();
        self.listeners.notify(|l| l.on_connection_change(false));
        closed
    }

    /// Leaves the board and drops every observer.
    pub fn shutdown(&mut self) -> Result<()> {
        let result = self.leave();
        self.listeners.clear();
        result
    }

    /// Drains pending channel events. Returns how many were handled.
    pub fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let Some(membership) = self.membership.as_mut() else {
                break;
            };
            let Some(event) = membership.channel.try_recv() else {
                break;
            };
            self.handle_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Push entry point for transports that deliver events themselves.
    /// Events arriving while not joined are ignored.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Result<()> {
        let Some(board_id) = self.board_id() else {
            debug!("ignoring channel event while not joined");
            return Ok(());
        };

        match event {
            ChannelEvent::Subscribed => {
                let state = self.presence_state();
                if let Some(membership) = self.membership.as_mut() {
                    membership.subscribed = true;
                    membership.channel.track(&state)?;
                }
                info!("{} subscribed to board {}", self.local.name, board_id);
                self.listeners.notify(|l| l.on_connection_change(true));
            }
            ChannelEvent::PresenceSync(states) => {
                let remote: Vec<PresenceState> = states
                    .into_iter()
                    .filter(|s| s.peer_id != self.local.id)
                    .collect();
                let departed = self.presence.sync(&remote, board_id, &self.config.palette);
                self.release_departed(&departed);
                self.notify_presence();
            }
            ChannelEvent::PresenceJoin(states) => {
                for state in states.iter().filter(|s| s.peer_id != self.local.id) {
                    debug!("{} joined board {}", state.name, board_id);
                    self.presence.upsert(state, board_id, &self.config.palette);
                }
                self.notify_presence();
            }
            ChannelEvent::PresenceLeave(states) => {
                let departed: Vec<PeerId> = states
                    .iter()
                    .map(|s| s.peer_id)
                    .filter(|id| *id != self.local.id)
                    .collect();
                for peer_id in &departed {
                    self.presence.remove(peer_id);
                }
                self.release_departed(&departed);
                self.notify_presence();
            }
            ChannelEvent::Broadcast(message) => self.handle_broadcast(message),
            ChannelEvent::Closed => {
                warn!("{} lost membership of board {}", self.local.name, board_id);
                self.membership = None;
                self.clear_board_state();
                self.listeners.notify(|l| l.on_connection_change(false));
            }
        }
        Ok(())
    }

    fn handle_broadcast(&mut self, message: BroadcastMessage) {
        match message {
            BroadcastMessage::Cursor { peer_id, x, y } => {
                if peer_id == self.local.id {
                    return;
                }
                let position = Point::new(x, y);
                self.presence.update_cursor(peer_id, position);
                self.listeners.notify(|l| l.on_cursor(peer_id, position));
            }
            BroadcastMessage::LockChange {
                peer_id,
                element_id,
                locked,
            } => {
                if peer_id == self.local.id {
                    return;
                }
                match self.leases.apply_remote(element_id, peer_id, locked) {
                    Some(LeaseChange::Granted { element_id, owner }) => {
                        self.listeners
                            .notify(|l| l.on_lock_change(element_id, Some(owner)));
                    }
                    Some(LeaseChange::Released { element_id }) => {
                        self.listeners.notify(|l| l.on_lock_change(element_id, None));
                    }
                    None => debug!("ignoring release of {} from non-owner {}", element_id, peer_id),
                }
            }
            BroadcastMessage::ElementChange { event } => match self.detector.receive(&event) {
                Reception::Echo => {}
                Reception::Conflict { known_version } => {
                    self.listeners
                        .notify(|l| l.on_conflict(&event, known_version));
                }
                Reception::Accepted => {
                    debug!(
                        "accepted {} change from {} at version {}",
                        event.change.as_str(),
                        event.peer_id,
                        event.version
                    );
                    self.listeners.notify(|l| l.on_remote_change(&event));
                }
            },
        }
    }

    /// Broadcasts the cursor position unless the throttle drops it.
    /// Returns whether it was sent.
    pub fn update_cursor(&mut self, position: Point) -> Result<bool> {
        self.update_cursor_at(Instant::now(), position)
    }

    pub fn update_cursor_at(&mut self, now: Instant, position: Point) -> Result<bool> {
        if self.membership.is_none() {
            return Err(CollaborationError::NotJoined);
        }
        if !self.throttle.admit(now, position) {
            debug!("throttled cursor update to ({}, {})", position.x, position.y);
            return Ok(false);
        }
        self.send(&BroadcastMessage::Cursor {
            peer_id: self.local.id,
            x: position.x,
            y: position.y,
        })?;
        Ok(true)
    }

    /// Updates the tracked presence so late joiners see the selection.
    pub fn update_selection(&mut self, selection: Vec<ElementId>) -> Result<()> {
        if self.membership.is_none() {
            return Err(CollaborationError::NotJoined);
        }
        self.selection = selection;
        let state = self.presence_state();
        match self.membership.as_mut() {
            Some(membership) if membership.subscribed => membership.channel.track(&state),
            _ => Ok(()),
        }
    }

    /// Records the lease locally and announces it. Two peers racing for the
    /// same element can both succeed; see `LeaseTable`.
    pub fn acquire_lock(&mut self, element_id: ElementId) -> bool {
        if self.membership.is_none() {
            return false;
        }
        if !self.leases.acquire(element_id, self.local.id) {
            return false;
        }
        self.announce_lock(element_id, true);
        let owner = self.local.id;
        self.listeners
            .notify(|l| l.on_lock_change(element_id, Some(owner)));
        true
    }

    /// No-op unless this peer is the recorded owner.
    pub fn release_lock(&mut self, element_id: ElementId) -> bool {
        if !self.leases.release(&element_id, &self.local.id) {
            return false;
        }
        self.announce_lock(element_id, false);
        self.listeners.notify(|l| l.on_lock_change(element_id, None));
        true
    }

    fn announce_lock(&mut self, element_id: ElementId, locked: bool) {
        let message = BroadcastMessage::LockChange {
            peer_id: self.local.id,
            element_id,
            locked,
        };
        if let Err(e) = self.send(&message) {
            warn!("lock change for {} not sent: {}", element_id, e);
        }
    }

    /// Held by someone other than this peer
    pub fn is_element_locked(&self, element_id: &ElementId) -> bool {
        self.leases.is_locked_for(element_id, &self.local.id)
    }

    pub fn lock_owner(&self, element_id: &ElementId) -> Option<PeerId> {
        self.leases.owner(element_id)
    }

    pub fn locks_held_by(&self, peer_id: &PeerId) -> Vec<ElementId> {
        self.leases.held_by(peer_id)
    }

    /// Stamps the payload with the next version and sends it.
    pub fn broadcast_element_change(
        &mut self,
        change: ChangeType,
        payload: Value,
    ) -> Result<CollaborationEvent> {
        let board_id = self.board_id().ok_or(CollaborationError::NotJoined)?;
        let event = self.detector.stamp(board_id, change, payload);
        self.send(&BroadcastMessage::ElementChange {
            event: event.clone(),
        })?;
        Ok(event)
    }

    pub fn broadcast_operation(&mut self, op: &Operation) -> Result<CollaborationEvent> {
        let payload = serde_json::to_value(op)?;
        self.broadcast_element_change(op.change_type(), payload)
    }

    pub fn version(&self) -> u64 {
        self.detector.version()
    }

    pub fn collaborators(&self) -> Vec<&CollaboratorPresence> {
        self.presence.all()
    }

    pub fn active_collaborators(&self) -> Vec<&CollaboratorPresence> {
        self.presence
            .active(Duration::from_secs(self.config.presence.idle_after_secs))
    }

    pub fn collaborators_selecting(&self, element_id: &ElementId) -> Vec<&CollaboratorPresence> {
        self.presence.selecting(element_id)
    }

    pub fn collaborator(&self, peer_id: &PeerId) -> Option<&CollaboratorPresence> {
        self.presence.get(peer_id)
    }

    pub fn cursors(&self) -> &HashMap<PeerId, Point> {
        self.presence.cursors()
    }

    pub fn selection(&self) -> &[ElementId] {
        &self.selection
    }

    fn send(&mut self, message: &BroadcastMessage) -> Result<()> {
        let membership = self
            .membership
            .as_mut()
            .ok_or(CollaborationError::NotJoined)?;
        membership.channel.send(message)
    }

    fn presence_state(&self) -> PresenceState {
        let mut state = PresenceState::new(self.local.id, self.local.name.clone());
        state.selection = self.selection.clone();
        if let Some(membership) = &self.membership {
            state.online_at = membership.online_at;
        }
        state
    }

    fn release_departed(&mut self, departed: &[PeerId]) {
        for peer_id in departed {
            for element_id in self.leases.release_all(peer_id) {
                debug!("released {} held by departed {}", element_id, peer_id);
                self.listeners.notify(|l| l.on_lock_change(element_id, None));
            }
        }
    }

    fn notify_presence(&self) {
        let collaborators: Vec<CollaboratorPresence> =
            self.presence.all().into_iter().cloned().collect();
        self.listeners
            .notify(|l| l.on_presence_change(&collaborators));
    }

    fn clear_board_state(&mut self) {
        self.presence.clear();
        self.leases.clear();
        self.throttle.reset();
    }
}

impl<T: Transport> Drop for CollaborationSession<T> {
    fn drop(&mut self) {
        if let Err(e) = self.leave() {
            warn!("leave on drop failed for {}: {}", self.local.name, e);
        }
    }
}
