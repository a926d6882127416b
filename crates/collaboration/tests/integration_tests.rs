/// Multi-peer scenarios over the in-process hub
/// Presence, leases, version-stamped changes and history driving a live board
use collaboration::*;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
    conflicts: Mutex<Vec<u64>>,
    accepted: Mutex<Vec<u64>>,
    locks: Mutex<Vec<(ElementId, Option<PeerId>)>>,
    cursors: Mutex<Vec<(PeerId, Point)>>,
    connection: Mutex<Vec<bool>>,
}

impl SessionObserver for Recorder {
    fn on_cursor(&self, peer_id: PeerId, position: Point) {
        self.cursors.lock().push((peer_id, position));
    }

    fn on_lock_change(&self, element_id: ElementId, owner: Option<PeerId>) {
        self.locks.lock().push((element_id, owner));
    }

    fn on_conflict(&self, _event: &CollaborationEvent, known_version: u64) {
        self.conflicts.lock().push(known_version);
    }

    fn on_remote_change(&self, event: &CollaborationEvent) {
        self.accepted.lock().push(event.version);
    }

    fn on_connection_change(&self, connected: bool) {
        self.connection.lock().push(connected);
    }
}

fn joined(hub: &LocalHub, board: BoardId, name: &str) -> CollaborationSession<LocalHub> {
    let mut session =
        CollaborationSession::new(EngineConfig::default(), LocalPeer::new(name), hub.clone());
    session.join(board).unwrap();
    session
}

fn rectangle(x: f64, y: f64) -> Element {
    Element::new(ElementKind::Rectangle, Bounds::new(x, y, 100.0, 60.0))
}

#[test]
fn test_version_increases_by_one_per_broadcast() {
    let hub = LocalHub::new();
    let mut alice = joined(&hub, BoardId::new(), "Alice");

    let versions: Vec<u64> = (0..5)
        .map(|_| {
            alice
                .broadcast_element_change(ChangeType::Updated, serde_json::json!({}))
                .unwrap()
                .version
        })
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
    assert_eq!(alice.version(), 5);
}

#[test]
fn test_presence_is_visible_to_late_joiners() {
    let hub = LocalHub::new();
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let selected = ElementId::new();
    alice.update_selection(vec![selected]).unwrap();

    let mut bob = joined(&hub, board, "Bob");
    alice.pump().unwrap();

    let seen = bob.collaborator(&alice.peer_id()).unwrap();
    assert_eq!(seen.name, "Alice");
    assert!(seen.selection.contains(&selected));
    assert_eq!(bob.collaborators_selecting(&selected).len(), 1);
    assert_eq!(alice.collaborators()[0].name, "Bob");
    assert_eq!(
        seen.color,
        PeerColor::for_peer(&alice.peer_id(), &EngineConfig::default().palette)
    );
}

#[test]
fn test_cursor_is_broadcast_but_not_tracked() {
    let hub = LocalHub::new();
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let mut bob = joined(&hub, board, "Bob");
    alice.pump().unwrap();
    let recorder = Arc::new(Recorder::default());
    let _sub = bob.subscribe(recorder.clone());

    assert!(alice.update_cursor(Point::new(12.0, 30.0)).unwrap());
    bob.pump().unwrap();

    assert_eq!(bob.cursors().get(&alice.peer_id()), Some(&Point::new(12.0, 30.0)));
    assert_eq!(*recorder.cursors.lock(), vec![(alice.peer_id(), Point::new(12.0, 30.0))]);
    assert!(hub.presences(&board).iter().all(|p| p.cursor.is_none()));
    assert!(alice.cursors().is_empty());
}

#[test]
fn test_lease_mutual_exclusion() {
    let hub = LocalHub::new();
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let mut bob = joined(&hub, board, "Bob");
    alice.pump().unwrap();
    let recorder = Arc::new(Recorder::default());
    let _sub = bob.subscribe(recorder.clone());

    let element = ElementId::new();
    assert!(alice.acquire_lock(element));
    assert!(alice.acquire_lock(element));
    assert!(!alice.is_element_locked(&element));
    bob.pump().unwrap();

    assert!(bob.is_element_locked(&element));
    assert!(!bob.acquire_lock(element));
    assert!(!bob.release_lock(element));
    assert_eq!(bob.lock_owner(&element), Some(alice.peer_id()));
    assert_eq!(bob.locks_held_by(&alice.peer_id()), vec![element]);
    assert_eq!(
        recorder.locks.lock().first(),
        Some(&(element, Some(alice.peer_id())))
    );

    assert!(alice.release_lock(element));
    bob.pump().unwrap();
    assert!(!bob.is_element_locked(&element));
    assert!(bob.acquire_lock(element));
}

#[test]
fn test_disconnect_cascades_lease_release() {
    let hub = LocalHub::new();
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let mut bob = joined(&hub, board, "Bob");
    alice.pump().unwrap();
    let (a, b) = (ElementId::new(), ElementId::new());
    assert!(alice.acquire_lock(a));
    assert!(alice.acquire_lock(b));
    bob.pump().unwrap();
    assert!(!bob.acquire_lock(a));

    let alice_events = Arc::new(Recorder::default());
    let bob_events = Arc::new(Recorder::default());
    let _a = alice.subscribe(alice_events.clone());
    let _b = bob.subscribe(bob_events.clone());

    assert!(hub.disconnect(&board, &alice.peer_id()).unwrap());
    bob.pump().unwrap();
    alice.pump().unwrap();

    let released: Vec<ElementId> = bob_events
        .locks
        .lock()
        .iter()
        .filter(|(_, owner)| owner.is_none())
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(released.len(), 2);
    assert!(bob.collaborators().is_empty());
    assert!(bob.acquire_lock(a));
    assert!(bob.acquire_lock(b));

    assert!(!alice.is_joined());
    assert_eq!(alice.lock_owner(&a), None);
    assert_eq!(*alice_events.connection.lock(), vec![false]);
}

#[test]
fn test_stale_version_is_flagged_not_applied() {
    let hub = LocalHub::new();
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let mut bob = joined(&hub, board, "Bob");
    alice.pump().unwrap();

    let alice_store = Arc::new(Mutex::new(MemoryBoard::new()));
    let recorder = Arc::new(Recorder::default());
    let _r = alice.subscribe(recorder.clone());
    let _s = alice.subscribe(Arc::new(RemoteApplier::new(alice_store.clone())));

    let e1 = Operation::insert(rectangle(0.0, 0.0), alice.peer_id());
    assert_eq!(alice.broadcast_operation(&e1).unwrap().version, 1);

    let remote = rectangle(50.0, 50.0);
    let remote_id = remote.id;
    let from_bob = Operation::insert(remote, bob.peer_id());
    assert_eq!(bob.broadcast_operation(&from_bob).unwrap().version, 1);

    alice.pump().unwrap();
    assert_eq!(*recorder.conflicts.lock(), vec![1]);
    assert!(recorder.accepted.lock().is_empty());
    assert!(alice_store.lock().element(&remote_id).is_none());
    assert_eq!(alice.version(), 1);

    bob.broadcast_operation(&from_bob).unwrap();
    alice.pump().unwrap();
    assert_eq!(*recorder.accepted.lock(), vec![2]);
    assert_eq!(alice.version(), 2);
    assert!(alice_store.lock().element(&remote_id).is_some());
}

#[test]
fn test_echoes_are_suppressed() {
    let hub = LocalHub::new().with_echo(true);
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let recorder = Arc::new(Recorder::default());
    let _sub = alice.subscribe(recorder.clone());

    alice
        .broadcast_element_change(ChangeType::Created, serde_json::json!({}))
        .unwrap();
    alice.update_cursor(Point::new(1.0, 1.0)).unwrap();
    alice.pump().unwrap();

    assert!(recorder.conflicts.lock().is_empty());
    assert!(recorder.accepted.lock().is_empty());
    assert!(recorder.cursors.lock().is_empty());
}

fn edit(
    op: Operation,
    store: &mut MemoryBoard,
    session: &mut CollaborationSession<LocalHub>,
    history: &mut HistoryEngine,
) {
    op.apply(store).unwrap();
    session.broadcast_operation(&op).unwrap();
    history.record_operation(op);
}

#[test]
fn test_local_history_drives_remote_board() {
    let hub = LocalHub::new();
    let board = BoardId::new();
    let mut alice = joined(&hub, board, "Alice");
    let mut bob = joined(&hub, board, "Bob");
    alice.pump().unwrap();

    let bob_store = Arc::new(Mutex::new(MemoryBoard::new()));
    let _s = bob.subscribe(Arc::new(RemoteApplier::new(bob_store.clone())));

    let mut alice_store = MemoryBoard::new();
    let mut history = HistoryEngine::new(&alice.config().history);
    let element = rectangle(10.0, 10.0);
    let id = element.id;

    let insert = Operation::insert(element, alice.peer_id());
    edit(insert, &mut alice_store, &mut alice, &mut history);
    let moved = Operation::capture_move(&alice_store, vec![id], 40.0, -5.0, alice.peer_id()).unwrap();
    edit(moved, &mut alice_store, &mut alice, &mut history);
    let resized = Operation::capture_resize(
        &alice_store,
        id,
        Bounds::new(50.0, 5.0, 200.0, 120.0),
        alice.peer_id(),
    )
    .unwrap();
    edit(resized, &mut alice_store, &mut alice, &mut history);

    bob.pump().unwrap();
    assert_eq!(bob_store.lock().element(&id), alice_store.element(&id));
    assert_eq!(alice_store.element(&id).unwrap().bounds.width, 200.0);

    for _ in 0..2 {
        for op in history.undo() {
            op.apply(&mut alice_store).unwrap();
            alice.broadcast_operation(&op).unwrap();
        }
    }
    bob.pump().unwrap();

    let restored = alice_store.element(&id).unwrap().bounds;
    assert_eq!(restored, Bounds::new(10.0, 10.0, 100.0, 60.0));
    assert_eq!(bob_store.lock().element(&id).unwrap().bounds, restored);
    assert_eq!(history.current_branch().future().len(), 2);
}

#[test]
fn test_go_to_state_replays_onto_store() {
    let peer = PeerId::new();
    let mut store = MemoryBoard::new();
    let mut history = HistoryEngine::default();

    let mut checkpoints = Vec::new();
    for i in 0..4 {
        let op = Operation::insert(rectangle(i as f64 * 10.0, 0.0), peer);
        op.apply(&mut store).unwrap();
        checkpoints.push(history.record_operation(op));
    }

    let ops = history.go_to_state(checkpoints[0]).unwrap();
    apply_all(&ops, &mut store).unwrap();
    assert_eq!(store.len(), 1);

    let ops = history.go_to_state(checkpoints[2]).unwrap();
    apply_all(&ops, &mut store).unwrap();
    assert_eq!(store.len(), 3);
    assert!(history.can_undo() && history.can_redo());
}

#[test]
fn test_merge_replays_branch_onto_store() {
    let peer = PeerId::new();
    let mut store = MemoryBoard::new();
    let mut history = HistoryEngine::default();
    let main = history.current_branch().id;

    let base = Operation::insert(rectangle(0.0, 0.0), peer);
    base.apply(&mut store).unwrap();
    history.record_operation(base);

    let sketch = history.create_branch("sketch");
    history.switch_branch(sketch).unwrap();
    let extra = Operation::insert(rectangle(200.0, 0.0), peer);
    extra.apply(&mut store).unwrap();
    history.record_operation(extra.clone());

    extra.inverse().apply(&mut store).unwrap();
    history.switch_branch(main).unwrap();
    assert_eq!(store.len(), 1);

    let ops = history.merge_branch(sketch).unwrap();
    apply_all(&ops, &mut store).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(history.current_branch().past().len(), 2);
    assert_eq!(history.branch(&sketch).unwrap().past().len(), 2);
}

#[test]
fn test_merge_after_undoing_shared_state() {
    let peer = PeerId::new();
    let mut store = MemoryBoard::new();
    let mut history = HistoryEngine::default();
    let main = history.current_branch().id;

    let base = Operation::insert(rectangle(0.0, 0.0), peer);
    let id = base.target.ids()[0];
    base.apply(&mut store).unwrap();
    history.record_operation(base);

    let styled = history.create_branch("styled");
    history.switch_branch(styled).unwrap();
    let fill =
        Operation::capture_update(&store, id, Some("style.fill"), serde_json::json!("#4DB6AC"), peer)
            .unwrap();
    fill.apply(&mut store).unwrap();
    history.record_operation(fill.clone());
    fill.inverse().apply(&mut store).unwrap();

    history.switch_branch(main).unwrap();
    apply_all(&history.undo(), &mut store).unwrap();
    assert!(store.is_empty());

    let ops = history.merge_branch(styled).unwrap();
    apply_all(&ops, &mut store).unwrap();
    assert_eq!(store.element(&id).unwrap().style["fill"], "#4DB6AC");
    assert_eq!(history.current_branch().past().len(), 2);

    // Undoing the merge walks the board back to empty
    apply_all(&history.undo(), &mut store).unwrap();
    assert!(store.element(&id).unwrap().style.is_null());
    apply_all(&history.undo(), &mut store).unwrap();
    assert!(store.is_empty());
}
