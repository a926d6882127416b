/// Advisory element leases
///
/// Grants are recorded locally before the lock-change broadcast reaches other
/// peers, so two peers racing for the same element can each believe they own
/// it. The table only guarantees one recorded owner per element locally.
use board::ElementId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::PeerId;

/// Outcome of applying a remote lock-change message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseChange {
    Granted {
        element_id: ElementId,
        owner: PeerId,
    },
    Released {
        element_id: ElementId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct LeaseTable {
    owners: HashMap<ElementId, PeerId>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeeds when the element is free or already held by `peer`.
    pub fn acquire(&mut self, element_id: ElementId, peer: PeerId) -> bool {
        match self.owners.get(&element_id) {
            Some(owner) if *owner != peer => false,
            _ => {
                self.owners.insert(element_id, peer);
                true
            }
        }
    }

    /// Only the recorded owner can release.
    pub fn release(&mut self, element_id: &ElementId, peer: &PeerId) -> bool {
        if self.owners.get(element_id) == Some(peer) {
            self.owners.remove(element_id);
            true
        } else {
            false
        }
    }

    pub fn owner(&self, element_id: &ElementId) -> Option<PeerId> {
        self.owners.get(element_id).copied()
    }

    pub fn is_locked_for(&self, element_id: &ElementId, viewer: &PeerId) -> bool {
        matches!(self.owners.get(element_id), Some(owner) if owner != viewer)
    }

    pub fn held_by(&self, peer: &PeerId) -> Vec<ElementId> {
        let mut held: Vec<ElementId> = self
            .owners
            .iter()
            .filter(|(_, owner)| *owner == peer)
            .map(|(element, _)| *element)
            .collect();
        held.sort();
        held
    }

    /// Drops every lease owned by a departed peer.
    pub fn release_all(&mut self, peer: &PeerId) -> Vec<ElementId> {
        let released = self.held_by(peer);
        for element_id in &released {
            self.owners.remove(element_id);
        }
        released
    }

    /// Records a grant or release announced by another peer. A remote grant
    /// replaces whatever owner was recorded; a remote release only clears a
    /// lease the sender actually holds here.
    pub fn apply_remote(
        &mut self,
        element_id: ElementId,
        sender: PeerId,
        locked: bool,
    ) -> Option<LeaseChange> {
        if locked {
            if let Some(previous) = self.owners.insert(element_id, sender) {
                if previous != sender {
                    warn!(
                        "lease on {} moved from {} to {} by remote grant",
                        element_id, previous, sender
                    );
                }
            }
            Some(LeaseChange::Granted {
                element_id,
                owner: sender,
            })
        } else if self.release(&element_id, &sender) {
            Some(LeaseChange::Released { element_id })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive_and_reentrant() {
        let mut table = LeaseTable::new();
        let element = ElementId::new();
        let (p1, p2) = (PeerId::new(), PeerId::new());

        assert!(table.acquire(element, p1));
        assert!(table.acquire(element, p1));
        assert!(!table.acquire(element, p2));
        assert!(table.is_locked_for(&element, &p2));
        assert!(!table.is_locked_for(&element, &p1));
    }

    #[test]
    fn release_requires_owner() {
        let mut table = LeaseTable::new();
        let element = ElementId::new();
        let (p1, p2) = (PeerId::new(), PeerId::new());

        table.acquire(element, p1);
        assert!(!table.release(&element, &p2));
        assert_eq!(table.owner(&element), Some(p1));
        assert!(table.release(&element, &p1));
        assert!(table.is_empty());
    }

    #[test]
    fn release_all_cascades_only_owner_leases() {
        let mut table = LeaseTable::new();
        let (a, b, c) = (ElementId::new(), ElementId::new(), ElementId::new());
        let (p1, p2) = (PeerId::new(), PeerId::new());
        table.acquire(a, p1);
        table.acquire(b, p1);
        table.acquire(c, p2);

        let mut released = table.release_all(&p1);
        released.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(released, expected);
        assert!(table.acquire(a, p2));
        assert_eq!(table.held_by(&p2).len(), 2);
    }

    #[test]
    fn remote_release_from_non_owner_is_ignored() {
        let mut table = LeaseTable::new();
        let element = ElementId::new();
        let (p1, p2) = (PeerId::new(), PeerId::new());

        assert_eq!(
            table.apply_remote(element, p1, true),
            Some(LeaseChange::Granted {
                element_id: element,
                owner: p1
            })
        );
        assert_eq!(table.apply_remote(element, p2, false), None);
        assert_eq!(table.owner(&element), Some(p1));
        assert_eq!(
            table.apply_remote(element, p1, false),
            Some(LeaseChange::Released { element_id: element })
        );
    }
}
