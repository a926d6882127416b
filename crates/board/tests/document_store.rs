use board::*;
use serde_json::json;

/// Runs the boundary contract against any store.
fn exercise(store: &mut impl DocumentStore) {
    let note = Element::new(
        ElementKind::StickyNote {
            content: "todo".to_string(),
        },
        Bounds::new(0.0, 0.0, 120.0, 120.0),
    );
    let id = note.id;
    store.insert_element(note.clone()).unwrap();
    assert!(matches!(
        store.insert_element(note),
        Err(BoardError::ElementExists(_))
    ));

    store
        .update_element(&id, &ElementPatch::field("style.fill", json!("#FFEE58")))
        .unwrap();
    store
        .update_element(&id, &ElementPatch::field("bounds.width", json!(240.0)))
        .unwrap();
    store.move_elements(&[id], 10.0, 20.0).unwrap();

    let current = store.element(&id).unwrap();
    assert_eq!(current.style["fill"], "#FFEE58");
    assert_eq!(current.bounds, Bounds::new(10.0, 20.0, 240.0, 120.0));

    let removed = store.delete_element(&id).unwrap();
    assert_eq!(removed.bounds.width, 240.0);
    assert!(store.element(&id).is_none());
    assert!(matches!(
        store.delete_element(&id),
        Err(BoardError::ElementNotFound(_))
    ));
}

#[test]
fn test_memory_board_honours_store_contract() {
    let mut board = MemoryBoard::new();
    exercise(&mut board);
    assert!(board.is_empty());
}

#[test]
fn test_whole_element_replacement_round_trips_through_json() {
    let mut board = MemoryBoard::new();
    let line = Element::new(
        ElementKind::Line {
            points: vec![Point::new(0.0, 0.0), Point::new(40.0, 40.0)],
            arrow: true,
        },
        Bounds::new(0.0, 0.0, 40.0, 40.0),
    );
    let id = line.id;
    board.insert_element(line.clone()).unwrap();

    let mut moved = line;
    moved.translate(5.0, 5.0);
    board
        .update_element(&id, &ElementPatch::replace(serde_json::to_value(&moved).unwrap()))
        .unwrap();

    assert_eq!(board.element(&id), Some(&moved));
}
