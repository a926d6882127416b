//! Scripted multi-peer editing session over the in-process hub

use anyhow::{bail, Result};
use collaboration::{
    BoardId, Bounds, CollaborationEvent, CollaborationSession, Element, ElementId, ElementKind,
    EngineConfig, HistoryEngine, LocalHub, LocalPeer, MemoryBoard, Operation, PeerId,
    RemoteApplier, SessionObserver, Subscription,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub board_id: BoardId,
    pub peers: Vec<PeerReport>,
    pub history: HistoryReport,
    pub lock_race: LockRaceReport,

    /// The survivor could take every lease the disconnected peer held
    pub cascade_released: bool,
}

#[derive(Debug, Serialize)]
pub struct PeerReport {
    pub name: String,
    pub peer_id: PeerId,
    pub elements: usize,
    pub version: u64,
    pub conflicts: usize,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryReport {
    pub depth: usize,
    pub redo_depth: usize,
    pub branches: usize,
}

#[derive(Debug, Serialize)]
pub struct LockRaceReport {
    pub first_acquired: bool,
    pub second_acquired: bool,
    pub owner_seen_by_first: Option<PeerId>,
    pub owner_seen_by_second: Option<PeerId>,
}

#[derive(Default)]
struct ConflictCounter(AtomicUsize);

impl SessionObserver for ConflictCounter {
    fn on_conflict(&self, event: &CollaborationEvent, known_version: u64) {
        debug!(
            "conflict from {} at {} (known {})",
            event.peer_id, event.version, known_version
        );
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

struct SimPeer {
    session: CollaborationSession<LocalHub>,
    store: Arc<Mutex<MemoryBoard>>,
    conflicts: Arc<ConflictCounter>,
    _subscriptions: Vec<Subscription>,
}

impl SimPeer {
    fn join(config: &EngineConfig, hub: &LocalHub, board_id: BoardId, name: String) -> Result<Self> {
        let mut session = CollaborationSession::new(config.clone(), LocalPeer::new(name), hub.clone());
        let store = Arc::new(Mutex::new(MemoryBoard::new()));
        let conflicts = Arc::new(ConflictCounter::default());
        let subscriptions = vec![
            session.subscribe(Arc::new(RemoteApplier::new(store.clone()))),
            session.subscribe(conflicts.clone()),
        ];
        session.join(board_id)?;
        Ok(Self {
            session,
            store,
            conflicts,
            _subscriptions: subscriptions,
        })
    }

    /// Applies locally, records for undo and broadcasts.
    fn edit(&mut self, op: Operation, history: Option<&mut HistoryEngine>) -> Result<()> {
        op.apply(&mut *self.store.lock())?;
        self.session.broadcast_operation(&op)?;
        if let Some(history) = history {
            history.record_operation(op);
        }
        Ok(())
    }

    fn replay(&mut self, ops: Vec<Operation>) -> Result<()> {
        for op in ops {
            self.edit(op, None)?;
        }
        Ok(())
    }

    fn report(&self) -> PeerReport {
        PeerReport {
            name: self.session.local_peer().name.clone(),
            peer_id: self.session.peer_id(),
            elements: self.store.lock().len(),
            version: self.session.version(),
            conflicts: self.conflicts.0.load(Ordering::Relaxed),
            connected: self.session.is_connected(),
        }
    }
}

fn pump_all(peers: &mut [SimPeer]) -> Result<()> {
    for peer in peers.iter_mut() {
        peer.session.pump()?;
    }
    Ok(())
}

pub fn run(config: &EngineConfig, peer_count: usize) -> Result<SimulationReport> {
    if peer_count < 2 {
        bail!("the simulation needs at least 2 peers, got {}", peer_count);
    }
    config.validate()?;

    let hub = LocalHub::new();
    let board_id = BoardId::new();
    let mut peers = (1..=peer_count)
        .map(|i| SimPeer::join(config, &hub, board_id, format!("peer-{}", i)))
        .collect::<Result<Vec<_>>>()?;
    pump_all(&mut peers)?;

    let author = peers[0].session.peer_id();
    let mut history = HistoryEngine::new(&config.history);

    info!("authoring on board {}", board_id);
    let shapes = [
        Element::new(ElementKind::Rectangle, Bounds::new(0.0, 0.0, 160.0, 90.0)),
        Element::new(
            ElementKind::StickyNote {
                content: "ship it".to_string(),
            },
            Bounds::new(200.0, 0.0, 120.0, 120.0),
        ),
        Element::new(ElementKind::Ellipse, Bounds::new(0.0, 150.0, 80.0, 80.0)),
    ];
    let ids: Vec<ElementId> = shapes.iter().map(|e| e.id).collect();
    for shape in shapes {
        peers[0].edit(Operation::insert(shape, author), Some(&mut history))?;
    }

    let nudge = Operation::capture_move(&*peers[0].store.lock(), ids[..2].to_vec(), 25.0, 10.0, author)?;
    nudge.apply(&mut *peers[0].store.lock())?;
    peers[0].session.broadcast_operation(&nudge)?;
    history.record_operation_group(vec![nudge], Some("nudge".to_string()));

    let resize = Operation::capture_resize(
        &*peers[0].store.lock(),
        ids[2],
        Bounds::new(0.0, 150.0, 120.0, 120.0),
        author,
    )?;
    peers[0].edit(resize, Some(&mut history))?;

    let undo = history.undo();
    peers[0].replay(undo)?;
    let redo = history.redo();
    peers[0].replay(redo)?;
    history.create_branch("review");
    pump_all(&mut peers)?;

    info!("concurrent edits on {}", ids[0]);
    let fill_red = Operation::capture_update(
        &*peers[0].store.lock(),
        ids[0],
        Some("style.fill"),
        json!("#E57373"),
        author,
    )?;
    peers[0].edit(fill_red, Some(&mut history))?;
    let second = peers[1].session.peer_id();
    let fill_blue = Operation::capture_update(
        &*peers[1].store.lock(),
        ids[0],
        Some("style.fill"),
        json!("#64B5F6"),
        second,
    )?;
    peers[1].edit(fill_blue, None)?;
    pump_all(&mut peers)?;

    info!("lock race on {}", ids[1]);
    let first_acquired = peers[0].session.acquire_lock(ids[1]);
    let second_acquired = peers[1].session.acquire_lock(ids[1]);
    pump_all(&mut peers)?;
    let lock_race = LockRaceReport {
        first_acquired,
        second_acquired,
        owner_seen_by_first: peers[0].session.lock_owner(&ids[1]),
        owner_seen_by_second: peers[1].session.lock_owner(&ids[1]),
    };

    info!("dropping {} from the board", author);
    peers[0].session.acquire_lock(ids[2]);
    pump_all(&mut peers)?;
    hub.disconnect(&board_id, &author)?;
    pump_all(&mut peers)?;
    let cascade_released = peers[1].session.acquire_lock(ids[2]);

    let branch = history.current_branch();
    Ok(SimulationReport {
        board_id,
        peers: peers.iter().map(SimPeer::report).collect(),
        history: HistoryReport {
            depth: branch.past().len(),
            redo_depth: branch.future().len(),
            branches: history.branches().len(),
        },
        lock_race,
        cascade_released,
    })
}
