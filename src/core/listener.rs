//! Registration / execution listeners.
//!
//! The list is copy-on-write: mutation swaps in a new `Arc<Vec<_>>` and
//! firing iterates a snapshot, so callbacks run with no lock held and may
//! add or remove listeners themselves.

use std::sync::Arc;

use parking_lot::RwLock;

use super::error::TreeAnomaly;

/// Observer of tree events.  Every callback defaults to a no-op.
///
/// Callbacks must not assume any tree lock is held.
pub trait ObjectTreeListener<T: ?Sized>: Send + Sync {
    fn object_registered(&self, _object: &Arc<T>) {}

    fn object_executed(&self, _object: &Arc<T>) {}

    fn anomaly(&self, _anomaly: &TreeAnomaly) {}
}

type Snapshot<T> = Arc<Vec<Arc<dyn ObjectTreeListener<T>>>>;

pub(crate) struct ListenerList<T: ?Sized> {
    listeners: RwLock<Snapshot<T>>,
}

impl<T: ?Sized> Default for ListenerList<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: ?Sized> ListenerList<T> {
    pub(crate) fn add(&self, listener: Arc<dyn ObjectTreeListener<T>>) {
        let mut current = self.listeners.write();
        let mut next: Vec<_> = current.iter().cloned().collect();
        next.push(listener);
        *current = Arc::new(next);
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn ObjectTreeListener<T>>) {
        let mut current = self.listeners.write();
        let mut next: Vec<_> = current.iter().cloned().collect();
        next.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        *current = Arc::new(next);
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        self.listeners.read().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}
