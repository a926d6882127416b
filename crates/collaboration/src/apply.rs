/// Feeds accepted remote changes into a document store
use board::DocumentStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{CollaborationEvent, SessionObserver};

/// Applies every accepted remote operation to the shared store. Remote
/// changes never enter local history.
pub struct RemoteApplier<S> {
    store: Arc<Mutex<S>>,
}

impl<S: DocumentStore + Send> RemoteApplier<S> {
    pub fn new(store: Arc<Mutex<S>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }
}

impl<S: DocumentStore + Send> SessionObserver for RemoteApplier<S> {
    fn on_remote_change(&self, event: &CollaborationEvent) {
        let op = match event.operation() {
            Ok(op) => op,
            Err(e) => {
                warn!(
                    "{} change from {} is not an operation: {}",
                    event.change.as_str(),
                    event.peer_id,
                    e
                );
                return;
            }
        };

        let mut store = self.store.lock();
        match op.apply(&mut *store) {
            Ok(()) => debug!("applied remote {} from {}", event.change.as_str(), event.peer_id),
            Err(e) => warn!("failed to apply remote {} from {}: {}", op.id, event.peer_id, e),
        }
    }
}
