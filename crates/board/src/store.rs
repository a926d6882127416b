use serde_json::Value;
use std::collections::HashMap;

use crate::{BoardError, Element, ElementId, ElementPatch, Result};

/// Live element storage the collaboration engine reads from and writes into.
pub trait DocumentStore {
    fn insert_element(&mut self, element: Element) -> Result<()>;

    fn update_element(&mut self, id: &ElementId, patch: &ElementPatch) -> Result<()>;

    /// Removes the element and hands back its last snapshot.
    fn delete_element(&mut self, id: &ElementId) -> Result<Element>;

    fn move_elements(&mut self, ids: &[ElementId], dx: f64, dy: f64) -> Result<()>;

    fn element(&self, id: &ElementId) -> Option<&Element>;
}

/// In-memory board keyed by element id.
#[derive(Debug, Clone, Default)]
pub struct MemoryBoard {
    elements: HashMap<ElementId, Element>,
    order: Vec<ElementId>,
}

impl MemoryBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    /// Elements in paint order: z-index first, then insertion order.
    pub fn elements(&self) -> Vec<&Element> {
        let mut ordered: Vec<&Element> = self
            .order
            .iter()
            .filter_map(|id| self.elements.get(id))
            .collect();
        ordered.sort_by_key(|e| e.z_index);
        ordered
    }
}

impl DocumentStore for MemoryBoard {
    fn insert_element(&mut self, element: Element) -> Result<()> {
        if self.elements.contains_key(&element.id) {
            return Err(BoardError::ElementExists(element.id));
        }
        self.order.push(element.id);
        self.elements.insert(element.id, element);
        Ok(())
    }

    fn update_element(&mut self, id: &ElementId, patch: &ElementPatch) -> Result<()> {
        let entry = self
            .elements
            .get_mut(id)
            .ok_or(BoardError::ElementNotFound(*id))?;
        let updated = apply_patch(entry, patch)?;
        *entry = updated;
        Ok(())
    }

    fn delete_element(&mut self, id: &ElementId) -> Result<Element> {
        let element = self
            .elements
            .remove(id)
            .ok_or(BoardError::ElementNotFound(*id))?;
        self.order.retain(|other| other != id);
        Ok(element)
    }

    fn move_elements(&mut self, ids: &[ElementId], dx: f64, dy: f64) -> Result<()> {
        if let Some(missing) = ids.iter().find(|id| !self.elements.contains_key(id)) {
            return Err(BoardError::ElementNotFound(*missing));
        }
        for id in ids {
            if let Some(element) = self.elements.get_mut(id) {
                element.translate(dx, dy);
            }
        }
        Ok(())
    }

    fn element(&self, id: &ElementId) -> Option<&Element> {
        self.elements.get(id)
    }
}

/// Reads the value at a dotted path inside an element, if present.
pub fn read_path(element: &Element, path: &str) -> Result<Option<Value>> {
    let value = serde_json::to_value(element)?;
    Ok(value.pointer(&to_pointer(path)).cloned())
}

/// Produces the patched copy of `element`; the original is left untouched
/// when the patch does not fit.
pub fn apply_patch(element: &Element, patch: &ElementPatch) -> Result<Element> {
    let id = element.id;
    let invalid = |reason: String| BoardError::InvalidPatch { id, reason };

    let patched = match (patch.path.as_deref(), &patch.value) {
        (None, Some(value)) => value.clone(),
        (None, None) => return Err(invalid("a whole element cannot be unset".to_string())),
        (Some(path), value) => {
            let mut root = serde_json::to_value(element)?;
            let (parent_path, key) = match path.rsplit_once('.') {
                Some((parent, key)) => (to_pointer(parent), key),
                None => (String::new(), path),
            };
            match (root.pointer_mut(&parent_path), value) {
                (Some(parent), Some(value)) => {
                    if parent.is_null() {
                        *parent = Value::Object(Default::default());
                    }
                    let object = parent
                        .as_object_mut()
                        .ok_or_else(|| invalid(format!("'{}' is not inside an object", path)))?;
                    object.insert(key.to_string(), value.clone());
                }
                (Some(parent), None) => {
                    if let Some(object) = parent.as_object_mut() {
                        object.remove(key);
                    }
                }
                (None, Some(_)) => return Err(invalid(format!("no field at '{}'", path))),
                // Nothing to remove under a missing parent
                (None, None) => {}
            }
            root
        }
    };

    let updated: Element =
        serde_json::from_value(patched).map_err(|e| invalid(e.to_string()))?;
    if updated.id != id {
        return Err(invalid("patch may not change the element id".to_string()));
    }
    Ok(updated)
}

fn to_pointer(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    path.split('.').fold(String::new(), |mut pointer, segment| {
        pointer.push('/');
        pointer.push_str(&segment.replace('~', "~0").replace('/', "~1"));
        pointer
    })
}
