//! Recursion guard shared by node and unregistered-object execution.

use std::collections::HashSet;
use std::hash::Hash;

use parking_lot::Mutex;

/// RAII membership in a "currently executing" set.
///
/// Entering fails when the key is already present, whether it was pushed by
/// this thread further up the stack or by another thread.  The key is removed
/// again on drop, including while unwinding.
pub(crate) struct RecursionGuard<'a, K: Eq + Hash + Copy> {
    active: &'a Mutex<HashSet<K>>,
    key: K,
}

impl<'a, K: Eq + Hash + Copy> RecursionGuard<'a, K> {
    pub(crate) fn enter(active: &'a Mutex<HashSet<K>>, key: K) -> Option<Self> {
        if !active.lock().insert(key) {
            return None;
        }
        Some(Self { active, key })
    }
}

impl<K: Eq + Hash + Copy> Drop for RecursionGuard<'_, K> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}
