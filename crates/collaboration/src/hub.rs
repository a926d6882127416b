/// In-process pub/sub hub implementing the transport boundary
/// Every frame is serialized to JSON, mirroring what crosses a real socket
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    BoardId, BroadcastMessage, Channel, ChannelEvent, CollaborationError, PeerId, PresenceState,
    Result, Transport,
};

type Frame = String;

struct Member {
    tx: mpsc::UnboundedSender<Frame>,
    presence: Option<PresenceState>,
    generation: u64,
}

impl Member {
    fn deliver(&self, frame: &str) {
        if self.tx.send(frame.to_string()).is_err() {
            debug!("dropping frame for a member whose receiver is gone");
        }
    }
}

#[derive(Default)]
struct HubState {
    boards: HashMap<BoardId, HashMap<PeerId, Member>>,
    generations: u64,
}

impl HubState {
    fn members(&self, board_id: &BoardId) -> impl Iterator<Item = (&PeerId, &Member)> {
        self.boards.get(board_id).into_iter().flatten()
    }

    fn presences(&self, board_id: &BoardId) -> Vec<PresenceState> {
        let mut states: Vec<PresenceState> = self
            .members(board_id)
            .filter_map(|(_, m)| m.presence.clone())
            .collect();
        states.sort_by_key(|s| s.peer_id);
        states
    }

    fn fan_out(&self, board_id: &BoardId, event: &ChannelEvent) -> Result<()> {
        let frame = serde_json::to_string(event)?;
        for (_, member) in self.members(board_id) {
            member.deliver(&frame);
        }
        Ok(())
    }

    /// Presence changed: the delta, then the full state, to everyone.
    fn announce(&self, board_id: &BoardId, delta: ChannelEvent) -> Result<()> {
        self.fan_out(board_id, &delta)?;
        self.fan_out(board_id, &ChannelEvent::PresenceSync(self.presences(board_id)))
    }

    fn remove_member(&mut self, board_id: &BoardId, peer_id: &PeerId) -> Option<Member> {
        let board = self.boards.get_mut(board_id)?;
        let member = board.remove(peer_id);
        if board.is_empty() {
            self.boards.remove(board_id);
        }
        member
    }
}

/// Shared in-memory transport. Clones talk to the same hub.
#[derive(Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
    echo_broadcasts: bool,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also deliver broadcasts back to their sender.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo_broadcasts = echo;
        self
    }

    pub fn member_count(&self, board_id: &BoardId) -> usize {
        self.state.lock().members(board_id).count()
    }

    pub fn presences(&self, board_id: &BoardId) -> Vec<PresenceState> {
        self.state.lock().presences(board_id)
    }

    /// Simulates the transport dropping a peer: it receives `Closed`, the
    /// rest of the board sees it leave.
    pub fn disconnect(&self, board_id: &BoardId, peer_id: &PeerId) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(member) = state.remove_member(board_id, peer_id) else {
            return Ok(false);
        };
        member.deliver(&serde_json::to_string(&ChannelEvent::Closed)?);
        if let Some(presence) = member.presence {
            state.announce(board_id, ChannelEvent::PresenceLeave(vec![presence]))?;
        }
        info!("hub dropped {} from board {}", peer_id, board_id);
        Ok(true)
    }
}

impl Transport for LocalHub {
    fn join_channel(&mut self, board_id: BoardId, presence_key: PeerId) -> Result<Box<dyn Channel>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        state.generations += 1;
        let generation = state.generations;
        let member = Member {
            tx,
            presence: None,
            generation,
        };
        member.deliver(&serde_json::to_string(&ChannelEvent::Subscribed)?);
        member.deliver(&serde_json::to_string(&ChannelEvent::PresenceSync(
            state.presences(&board_id),
        ))?);

        if let Some(previous) = state
            .boards
            .entry(board_id)
            .or_default()
            .insert(presence_key, member)
        {
            previous.deliver(&serde_json::to_string(&ChannelEvent::Closed)?);
        }

        Ok(Box::new(LocalChannel {
            state: self.state.clone(),
            board_id,
            peer_id: presence_key,
            rx,
            generation,
            echo_broadcasts: self.echo_broadcasts,
            closed: false,
        }))
    }
}

/// Subscriber end of a [`LocalHub`] board
pub struct LocalChannel {
    state: Arc<Mutex<HubState>>,
    board_id: BoardId,
    peer_id: PeerId,
    rx: mpsc::UnboundedReceiver<Frame>,
    generation: u64,
    echo_broadcasts: bool,
    closed: bool,
}

impl LocalChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CollaborationError::Transport("channel closed".to_string()));
        }
        Ok(())
    }

    /// A rejoin under the same key replaces this channel's membership.
    fn member_mut<'a>(&self, state: &'a mut HubState) -> Result<&'a mut Member> {
        state
            .boards
            .get_mut(&self.board_id)
            .and_then(|board| board.get_mut(&self.peer_id))
            .filter(|member| member.generation == self.generation)
            .ok_or_else(|| CollaborationError::Transport("not a channel member".to_string()))
    }
}

impl Channel for LocalChannel {
    fn track(&mut self, presence: &PresenceState) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        self.member_mut(&mut state)?.presence = Some(presence.clone());
        state.announce(&self.board_id, ChannelEvent::PresenceJoin(vec![presence.clone()]))
    }

    fn untrack(&mut self) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let removed = self.member_mut(&mut state)?.presence.take();
        match removed {
            Some(presence) => {
                state.announce(&self.board_id, ChannelEvent::PresenceLeave(vec![presence]))
            }
            None => Ok(()),
        }
    }

    fn send(&mut self, message: &BroadcastMessage) -> Result<()> {
        self.ensure_open()?;
        let frame = serde_json::to_string(&ChannelEvent::Broadcast(message.clone()))?;
        let state = self.state.lock();
        for (peer_id, member) in state.members(&self.board_id) {
            if *peer_id == self.peer_id && !self.echo_broadcasts {
                continue;
            }
            member.deliver(&frame);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let frame = self.rx.try_recv().ok()?;
            match serde_json::from_str(&frame) {
                Ok(event) => return Some(event),
                Err(e) => warn!("discarding undecodable frame: {}", e),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.state.lock();
        if self.member_mut(&mut state).is_err() {
            return Ok(());
        }
        if let Some(member) = state.remove_member(&self.board_id, &self.peer_id) {
            if let Some(presence) = member.presence {
                state.announce(&self.board_id, ChannelEvent::PresenceLeave(vec![presence]))?;
            }
        }
        Ok(())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close channel for {}: {}", self.peer_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use board::ElementId;

    fn drain(channel: &mut Box<dyn Channel>) -> Vec<ChannelEvent> {
        std::iter::from_fn(|| channel.try_recv()).collect()
    }

    #[test]
    fn subscription_is_confirmed_first() {
        let mut hub = LocalHub::new();
        let mut channel = hub.join_channel(BoardId::new(), PeerId::new()).unwrap();
        let events = drain(&mut channel);
        assert_eq!(events[0], ChannelEvent::Subscribed);
        assert_eq!(events[1], ChannelEvent::PresenceSync(vec![]));
    }

    #[test]
    fn track_announces_join_and_sync_to_everyone() {
        let mut hub = LocalHub::new();
        let board = BoardId::new();
        let (alice, bob) = (PeerId::new(), PeerId::new());
        let mut a = hub.join_channel(board, alice).unwrap();
        let mut b = hub.join_channel(board, bob).unwrap();
        drain(&mut a);
        drain(&mut b);

        let presence = PresenceState::new(alice, "Alice");
        a.track(&presence).unwrap();

        let seen = drain(&mut b);
        assert_eq!(seen[0], ChannelEvent::PresenceJoin(vec![presence.clone()]));
        assert_eq!(seen[1], ChannelEvent::PresenceSync(vec![presence]));
        assert_eq!(drain(&mut a).len(), 2);
    }

    #[test]
    fn broadcasts_skip_sender_unless_echoing() {
        let board = BoardId::new();
        let (alice, bob) = (PeerId::new(), PeerId::new());
        let msg = BroadcastMessage::LockChange {
            peer_id: alice,
            element_id: ElementId::new(),
            locked: true,
        };

        let mut hub = LocalHub::new();
        let mut a = hub.join_channel(board, alice).unwrap();
        let mut b = hub.join_channel(board, bob).unwrap();
        drain(&mut a);
        drain(&mut b);
        a.send(&msg).unwrap();
        assert!(drain(&mut a).is_empty());
        assert_eq!(drain(&mut b), vec![ChannelEvent::Broadcast(msg.clone())]);

        let mut echo_hub = LocalHub::new().with_echo(true);
        let mut a = echo_hub.join_channel(board, alice).unwrap();
        drain(&mut a);
        a.send(&msg).unwrap();
        assert_eq!(drain(&mut a), vec![ChannelEvent::Broadcast(msg)]);
    }

    #[test]
    fn disconnect_closes_peer_and_tells_others() {
        let mut hub = LocalHub::new();
        let board = BoardId::new();
        let (alice, bob) = (PeerId::new(), PeerId::new());
        let mut a = hub.join_channel(board, alice).unwrap();
        let mut b = hub.join_channel(board, bob).unwrap();
        let presence = PresenceState::new(alice, "Alice");
        a.track(&presence).unwrap();
        drain(&mut a);
        drain(&mut b);

        assert!(hub.disconnect(&board, &alice).unwrap());
        assert_eq!(drain(&mut a), vec![ChannelEvent::Closed]);
        assert_eq!(
            drain(&mut b),
            vec![
                ChannelEvent::PresenceLeave(vec![presence]),
                ChannelEvent::PresenceSync(vec![]),
            ]
        );
        assert_eq!(hub.member_count(&board), 1);
        assert!(!hub.disconnect(&board, &alice).unwrap());
    }

    #[test]
    fn close_is_idempotent_and_rejects_further_sends() {
        let mut hub = LocalHub::new();
        let board = BoardId::new();
        let mut channel = hub.join_channel(board, PeerId::new()).unwrap();
        channel.close().unwrap();
        channel.close().unwrap();
        assert_eq!(hub.member_count(&board), 0);
        assert!(channel.untrack().is_err());
    }
}
