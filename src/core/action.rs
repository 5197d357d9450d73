//! Disposal callbacks applied to each node during teardown.

use std::sync::Arc;

/// Caller-supplied teardown logic.
///
/// Errors are reported as [`TreeAnomaly::ActionFailed`](super::error::TreeAnomaly)
/// and never stop the rest of the subtree from being torn down.
pub trait ObjectTreeAction<T: ?Sized> {
    /// Tear down one resource.  Runs children-first, after the resource has
    /// already been detached from the tree.
    fn execute(&self, object: &Arc<T>) -> anyhow::Result<()>;

    /// Called parent-first, before any of the resource's children are torn
    /// down.
    fn before_tree_execution(&self, _object: &Arc<T>) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T, F> ObjectTreeAction<T> for F
where
    T: ?Sized,
    F: Fn(&Arc<T>) -> anyhow::Result<()>,
{
    fn execute(&self, object: &Arc<T>) -> anyhow::Result<()> {
        self(object)
    }
}
