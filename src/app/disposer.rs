//! Application-facing disposal context.
//!
//! A [`Disposer`] owns one [`ObjectTree`] of `dyn Disposable` resources and
//! applies each resource's own [`Disposable::dispose`] during teardown.
//! Create one per application (or per test) and hand it out by `Arc`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::core::action::ObjectTreeAction;
use crate::core::error::TreeError;
use crate::core::listener::ObjectTreeListener;
use crate::core::tree::ObjectTree;

/// A resource with explicit teardown.
pub trait Disposable: Any + fmt::Debug + Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;

    /// Runs before any child of this resource is disposed.
    fn before_tree_dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runtime type named in leak reports.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

fn disposable_type_name(disposable: &(dyn Disposable + 'static)) -> &'static str {
    disposable.type_name()
}

/// Shorthand for the shared handle every disposer API takes.
pub type DisposableRef = Arc<dyn Disposable>;

/// Disposable with no teardown of its own, used to group children under a
/// common owner.
pub struct NamedDisposable {
    name: String,
}

impl fmt::Debug for NamedDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Disposable for NamedDisposable {
    fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct DisposeAction;

impl ObjectTreeAction<dyn Disposable> for DisposeAction {
    fn execute(&self, object: &DisposableRef) -> anyhow::Result<()> {
        object.dispose()
    }

    fn before_tree_execution(&self, object: &DisposableRef) -> anyhow::Result<()> {
        object.before_tree_dispose()
    }
}

pub struct Disposer {
    tree: ObjectTree<dyn Disposable>,
}

impl Default for Disposer {
    fn default() -> Self {
        Self::new(&TreeConfig::default())
    }
}

impl Disposer {
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            tree: ObjectTree::new(config.debug_mode).with_type_names(disposable_type_name),
        }
    }

    /// The underlying tree, for introspection and listeners.
    pub fn tree(&self) -> &ObjectTree<dyn Disposable> {
        &self.tree
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.tree.set_debug_mode(enabled);
    }

    pub fn is_debug_mode(&self) -> bool {
        self.tree.is_debug_mode()
    }

    pub fn new_disposable(&self, name: impl Into<String>) -> DisposableRef {
        Arc::new(NamedDisposable { name: name.into() })
    }

    /// `child` will be disposed no later than `parent`.
    pub fn register(&self, parent: &DisposableRef, child: &DisposableRef) {
        self.tree.register(parent, child);
    }

    /// Dispose `disposable` and everything registered under it.  Disposes
    /// it even when it was never registered.
    pub fn dispose(&self, disposable: &DisposableRef) {
        self.dispose_with(disposable, true);
    }

    /// Like [`dispose`](Self::dispose); returns `false` and does nothing for
    /// an unregistered `disposable` unless `process_unregistered` is set.
    pub fn dispose_with(&self, disposable: &DisposableRef, process_unregistered: bool) -> bool {
        self.tree
            .execute_all(disposable, true, &DisposeAction, process_unregistered)
    }

    /// Dispose only `disposable`; its children are left registered as roots.
    pub fn dispose_self_only(&self, disposable: &DisposableRef) -> bool {
        self.tree
            .execute_all(disposable, false, &DisposeAction, false)
    }

    /// Dispose `old` and register `new` under `old`'s parent.
    pub fn replace_child(&self, old: &DisposableRef, new: &DisposableRef) -> Result<(), TreeError> {
        self.tree
            .execute_child_and_replace(old, new, true, &DisposeAction)
    }

    pub fn is_registered(&self, disposable: &DisposableRef) -> bool {
        self.tree.contains_key(disposable)
    }

    /// Among `parent`'s direct children, the first `D` equal to `candidate`.
    pub fn find_registered<D>(&self, parent: &DisposableRef, candidate: &D) -> Option<DisposableRef>
    where
        D: Disposable + PartialEq,
    {
        self.tree.find_registered_by(parent, |child| {
            let child: &dyn Any = child;
            child.downcast_ref::<D>() == Some(candidate)
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn ObjectTreeListener<dyn Disposable>>) {
        self.tree.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ObjectTreeListener<dyn Disposable>>) {
        self.tree.remove_listener(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn assert_is_empty(&self, throw_on_leak: bool) -> Result<(), TreeError> {
        self.tree.assert_is_empty(throw_on_leak)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Handle {
        id: u32,
    }

    impl Disposable for Handle {
        fn dispose(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn named_disposable_groups_children() {
        let disposer = Disposer::default();
        let group = disposer.new_disposable("group");
        let a: DisposableRef = Arc::new(Handle { id: 1 });
        disposer.register(&group, &a);

        assert_eq!(format!("{group:?}"), "group");
        disposer.dispose(&group);
        assert!(!disposer.is_registered(&a));
        assert!(disposer.is_empty());
    }

    #[test]
    fn find_registered_matches_by_type_and_value() {
        let disposer = Disposer::default();
        let root = disposer.new_disposable("root");
        let h: DisposableRef = Arc::new(Handle { id: 2 });
        disposer.register(&root, &disposer.new_disposable("other"));
        disposer.register(&root, &h);

        let found = disposer.find_registered(&root, &Handle { id: 2 }).unwrap();
        assert!(Arc::ptr_eq(&found, &h));
        assert!(disposer.find_registered(&root, &Handle { id: 3 }).is_none());
    }

    #[test]
    fn dispose_with_skips_unregistered_when_asked() {
        struct Counted(AtomicUsize);
        impl fmt::Debug for Counted {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("counted")
            }
        }
        impl Disposable for Counted {
            fn dispose(&self) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let disposer = Disposer::default();
        let counted = Arc::new(Counted(AtomicUsize::new(0)));
        let handle: DisposableRef = counted.clone();

        assert!(!disposer.dispose_with(&handle, false));
        assert_eq!(counted.0.load(Ordering::SeqCst), 0);
        disposer.dispose(&handle);
        assert_eq!(counted.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn leak_names_the_concrete_type() {
        let disposer = Disposer::default();
        let leaked: DisposableRef = Arc::new(Handle { id: 4 });
        disposer.register(&leaked, &disposer.new_disposable("child"));

        match disposer.assert_is_empty(true) {
            Err(TreeError::LeakDetected { type_name, .. }) => {
                assert_eq!(type_name, std::any::type_name::<Handle>());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn debug_mode_follows_config() {
        let config = TreeConfig {
            debug_mode: true,
            ..TreeConfig::default()
        };
        let disposer = Disposer::new(&config);
        assert!(disposer.is_debug_mode());
        disposer.set_debug_mode(false);
        assert!(!disposer.tree().is_debug_mode());
    }
}
