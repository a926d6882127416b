/// Invertible board operations
/// The unit of both remote broadcast and local undo history
use board::{read_path, BoardError, Bounds, DocumentStore, Element, ElementId, ElementPatch, Point};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::{PeerId, Result};

/// Unique operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Elements an operation applies to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Element(ElementId),
    /// Ordered, for batched moves
    Elements(Vec<ElementId>),
}

impl Target {
    pub fn ids(&self) -> &[ElementId] {
        match self {
            Target::Element(id) => std::slice::from_ref(id),
            Target::Elements(ids) => ids,
        }
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.ids().contains(id)
    }
}

/// Board operation that can be broadcast and recorded in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,

    /// When the operation was created (author's clock)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub author_id: PeerId,

    pub target: Target,

    pub kind: OperationKind,
}

/// Kind-specific payload. Each kind carries enough state to build its inverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Insert {
        element: Element,
    },
    Delete {
        previous_state: Element,
    },
    /// A `None` side means the field is absent and is removed when applied
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "board::present")]
        before: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "board::present")]
        after: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Move {
        before: Point,
        after: Point,
    },
    Resize {
        before: Bounds,
        after: Bounds,
    },
}

/// Broadcast change category, one per operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
    Moved,
    Resized,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
            ChangeType::Moved => "moved",
            ChangeType::Resized => "resized",
        }
    }
}

impl Operation {
    fn stamped(author_id: PeerId, target: Target, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            timestamp: chrono::Utc::now(),
            author_id,
            target,
            kind,
        }
    }

    pub fn insert(element: Element, author_id: PeerId) -> Self {
        Self::stamped(
            author_id,
            Target::Element(element.id),
            OperationKind::Insert { element },
        )
    }

    pub fn delete(previous_state: Element, author_id: PeerId) -> Self {
        Self::stamped(
            author_id,
            Target::Element(previous_state.id),
            OperationKind::Delete { previous_state },
        )
    }

    pub fn update(
        id: ElementId,
        before: Option<Value>,
        after: Option<Value>,
        path: Option<String>,
        author_id: PeerId,
    ) -> Self {
        Self::stamped(
            author_id,
            Target::Element(id),
            OperationKind::Update {
                before,
                after,
                path,
            },
        )
    }

    pub fn move_elements(ids: Vec<ElementId>, before: Point, after: Point, author_id: PeerId) -> Self {
        let target = match ids.as_slice() {
            [single] => Target::Element(*single),
            _ => Target::Elements(ids),
        };
        Self::stamped(author_id, target, OperationKind::Move { before, after })
    }

    pub fn resize(id: ElementId, before: Bounds, after: Bounds, author_id: PeerId) -> Self {
        Self::stamped(
            author_id,
            Target::Element(id),
            OperationKind::Resize { before, after },
        )
    }

    /// Snapshots the element so the deletion can be undone.
    pub fn capture_delete(
        store: &impl DocumentStore,
        id: ElementId,
        author_id: PeerId,
    ) -> Result<Self> {
        let element = store
            .element(&id)
            .ok_or(BoardError::ElementNotFound(id))?
            .clone();
        Ok(Self::delete(element, author_id))
    }

    /// Reads the current value at `path` (or the whole element) as `before`.
    /// A path under a null or missing parent is recorded against that parent,
    /// so the inverse restores it instead of leaving an empty object behind.
    pub fn capture_update(
        store: &impl DocumentStore,
        id: ElementId,
        path: Option<&str>,
        after: Value,
        author_id: PeerId,
    ) -> Result<Self> {
        let element = store.element(&id).ok_or(BoardError::ElementNotFound(id))?;
        let (path, before, after) = match path {
            Some(path) => anchor_update(element, path, after)?,
            None => (None, Some(serde_json::to_value(element)?), after),
        };
        Ok(Self::update(id, before, Some(after), path, author_id))
    }

    /// Uses the first element's origin as the geometric reference.
    pub fn capture_move(
        store: &impl DocumentStore,
        ids: Vec<ElementId>,
        dx: f64,
        dy: f64,
        author_id: PeerId,
    ) -> Result<Self> {
        let first = ids
            .first()
            .ok_or_else(|| crate::CollaborationError::InvalidOp("move without targets".to_string()))?;
        let before = store
            .element(first)
            .ok_or(BoardError::ElementNotFound(*first))?
            .bounds
            .origin();
        Ok(Self::move_elements(ids, before, before.offset(dx, dy), author_id))
    }

    pub fn capture_resize(
        store: &impl DocumentStore,
        id: ElementId,
        after: Bounds,
        author_id: PeerId,
    ) -> Result<Self> {
        let before = store
            .element(&id)
            .ok_or(BoardError::ElementNotFound(id))?
            .bounds;
        Ok(Self::resize(id, before, after, author_id))
    }

    pub fn change_type(&self) -> ChangeType {
        match self.kind {
            OperationKind::Insert { .. } => ChangeType::Created,
            OperationKind::Delete { .. } => ChangeType::Deleted,
            OperationKind::Update { .. } => ChangeType::Updated,
            OperationKind::Move { .. } => ChangeType::Moved,
            OperationKind::Resize { .. } => ChangeType::Resized,
        }
    }

    /// The operation that undoes this one. Applying the inverse of the
    /// inverse reproduces the original change.
    pub fn inverse(&self) -> Operation {
        let kind = match &self.kind {
            OperationKind::Insert { element } => OperationKind::Delete {
                previous_state: element.clone(),
            },
            OperationKind::Delete { previous_state } => OperationKind::Insert {
                element: previous_state.clone(),
            },
            OperationKind::Update {
                before,
                after,
                path,
            } => OperationKind::Update {
                before: after.clone(),
                after: before.clone(),
                path: path.clone(),
            },
            OperationKind::Move { before, after } => OperationKind::Move {
                before: *after,
                after: *before,
            },
            OperationKind::Resize { before, after } => OperationKind::Resize {
                before: *after,
                after: *before,
            },
        };
        Operation::stamped(self.author_id, self.target.clone(), kind)
    }

    /// Forwards the change to the document store.
    pub fn apply(&self, store: &mut impl DocumentStore) -> Result<()> {
        match &self.kind {
            OperationKind::Insert { element } => store.insert_element(element.clone())?,
            OperationKind::Delete { .. } => {
                for id in self.target.ids() {
                    store.delete_element(id)?;
                }
            }
            OperationKind::Update { after, path, .. } => {
                let patch = ElementPatch {
                    path: path.clone(),
                    value: after.clone(),
                };
                for id in self.target.ids() {
                    store.update_element(id, &patch)?;
                }
            }
            OperationKind::Move { before, after } => {
                store.move_elements(self.target.ids(), after.x - before.x, after.y - before.y)?;
            }
            OperationKind::Resize { after, .. } => {
                let patch = ElementPatch::field("bounds", serde_json::to_value(after)?);
                for id in self.target.ids() {
                    store.update_element(id, &patch)?;
                }
            }
        }
        Ok(())
    }
}

fn anchor_update(
    element: &Element,
    path: &str,
    after: Value,
) -> Result<(Option<String>, Option<Value>, Value)> {
    let segments: Vec<&str> = path.split('.').collect();
    for depth in 1..segments.len() {
        let prefix = segments[..depth].join(".");
        match read_path(element, &prefix)? {
            Some(value) if !value.is_null() => continue,
            existing => {
                let nested = segments[depth..].iter().rev().fold(after, |inner, key| {
                    let mut object = serde_json::Map::new();
                    object.insert(key.to_string(), inner);
                    Value::Object(object)
                });
                return Ok((Some(prefix), existing, nested));
            }
        }
    }
    Ok((Some(path.to_string()), read_path(element, path)?, after))
}

/// Applies operations in order, stopping at the first failure.
pub fn apply_all(ops: &[Operation], store: &mut impl DocumentStore) -> Result<()> {
    for op in ops {
        op.apply(store)?;
    }
    Ok(())
}
