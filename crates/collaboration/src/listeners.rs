/// Multi-subscriber observer registry
/// Presentation layers subscribe independently and keep a disposer to leave
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Slots<L: ?Sized> {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<L>)>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: ListenerId) -> bool;
}

impl<L: ?Sized + Send + Sync> Detach for Mutex<Slots<L>> {
    fn detach(&self, id: ListenerId) -> bool {
        let mut slots = self.lock();
        let before = slots.listeners.len();
        slots.listeners.retain(|(other, _)| *other != id);
        slots.listeners.len() != before
    }
}

pub struct ListenerRegistry<L: ?Sized> {
    slots: Arc<Mutex<Slots<L>>>,
}

impl<L: ?Sized + Send + Sync + 'static> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: Arc<L>) -> Subscription {
        let mut slots = self.slots.lock();
        slots.next_id += 1;
        let id = ListenerId(slots.next_id);
        slots.listeners.push((id, listener));

        let slots: Arc<dyn Detach> = self.slots.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&slots),
        }
    }

    /// Calls `f` for every listener in subscription order. The list is
    /// snapshotted first, so listeners may subscribe or unsubscribe from
    /// inside the callback.
    pub fn notify(&self, mut f: impl FnMut(&L)) {
        let snapshot: Vec<Arc<L>> = self
            .slots
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in snapshot {
            f(listener.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().listeners.clear();
    }
}

impl<L: ?Sized + Send + Sync + 'static> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disposer returned by `subscribe`
#[must_use = "dropping the subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Returns false if it was already gone or the
    /// registry no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.detach(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Counter: Send + Sync {
        fn bump(&self);
    }

    #[derive(Default)]
    struct Hits(Mutex<u32>);

    impl Counter for Hits {
        fn bump(&self) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn every_subscriber_is_notified() {
        let registry: ListenerRegistry<dyn Counter> = ListenerRegistry::new();
        let first = Arc::new(Hits::default());
        let second = Arc::new(Hits::default());
        let _a = registry.subscribe(first.clone());
        let _b = registry.subscribe(second.clone());

        registry.notify(|l| l.bump());
        assert_eq!(*first.0.lock(), 1);
        assert_eq!(*second.0.lock(), 1);
    }

    #[test]
    fn unsubscribe_detaches_only_that_listener() {
        let registry: ListenerRegistry<dyn Counter> = ListenerRegistry::new();
        let kept = Arc::new(Hits::default());
        let dropped = Arc::new(Hits::default());
        let _keep = registry.subscribe(kept.clone());
        let leave = registry.subscribe(dropped.clone());

        assert!(leave.unsubscribe());
        registry.notify(|l| l.bump());
        assert_eq!(*kept.0.lock(), 1);
        assert_eq!(*dropped.0.lock(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_harmless() {
        let registry: ListenerRegistry<dyn Counter> = ListenerRegistry::new();
        let sub = registry.subscribe(Arc::new(Hits::default()));
        drop(registry);
        assert!(!sub.unsubscribe());
    }
}
