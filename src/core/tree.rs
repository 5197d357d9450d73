//! The ownership forest.
//!
//! [`ObjectTree`] records which resource owns which, and tears whole subtrees
//! down on request.  Nodes live in a map keyed by [`NodeId`] and link to each
//! other by id, which keeps re-parenting and detaching to a few list edits
//! and makes borrowing trivial.
//!
//! All structural state sits behind one coarse lock.  Disposal actions and
//! listener callbacks always run with that lock released.

use std::any::type_name;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::action::ObjectTreeAction;
use super::error::{ActionPhase, TreeAnomaly, TreeError};
use super::guard::RecursionGuard;
use super::identity::ResourceKey;
use super::listener::{ListenerList, ObjectTreeListener};
use super::node::{AllocationTrace, NodeId, ObjectNode};

// ───────────────────────────────────────── locked state ──────

/// Everything guarded by the tree lock.
struct TreeState<T: ?Sized> {
    nodes: HashMap<NodeId, ObjectNode<T>>,
    /// resource identity → node.  A resource is here iff it is registered.
    index: HashMap<ResourceKey, NodeId>,
    /// Identities of registered resources with no parent.
    roots: HashSet<ResourceKey>,
}

impl<T: ?Sized> Default for TreeState<T> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            index: HashMap::new(),
            roots: HashSet::new(),
        }
    }
}

impl<T: ?Sized> TreeState<T> {
    fn node_of(&self, key: ResourceKey) -> Option<&ObjectNode<T>> {
        self.index.get(&key).and_then(|id| self.nodes.get(id))
    }

    fn insert(&mut self, node: ObjectNode<T>) -> NodeId {
        let id = node.id;
        let key = ResourceKey::of(&node.object);
        match node.parent {
            None => {
                self.roots.insert(key);
            }
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.push(id);
                }
            }
        }
        self.index.insert(key, id);
        self.nodes.insert(id, node);
        id
    }

    /// `true` if `candidate` is `start` or one of its ancestors.
    ///
    /// The walk is capped at the node count so a corrupted chain can't spin.
    fn is_in_ancestry(&self, candidate: NodeId, start: NodeId) -> bool {
        let mut current = Some(start);
        for _ in 0..=self.nodes.len() {
            match current {
                Some(id) if id == candidate => return true,
                Some(id) => current = self.nodes.get(&id).and_then(|n| n.parent),
                None => return false,
            }
        }
        false
    }

    /// Unlink `id` from its parent (or the root set) and hang it under
    /// `new_parent`.
    fn reparent(&mut self, id: NodeId, new_parent: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let key = ResourceKey::of(&node.object);
        let old_parent = node.parent.replace(new_parent);
        match old_parent {
            Some(old) => {
                if let Some(p) = self.nodes.get_mut(&old) {
                    p.children.retain(|&c| c != id);
                }
            }
            None => {
                self.roots.remove(&key);
            }
        }
        if let Some(p) = self.nodes.get_mut(&new_parent) {
            p.children.push(id);
        }
    }

    /// Take the children list of `id`, leaving it empty.
    fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get_mut(&id)
            .map(|n| std::mem::take(&mut n.children))
            .unwrap_or_default()
    }

    /// Remove `id` from every map.  Children still attached to it are
    /// promoted to roots and returned alongside the removed node.
    fn remove(&mut self, id: NodeId) -> Option<(ObjectNode<T>, Vec<Arc<T>>)> {
        let node = self.nodes.remove(&id)?;
        let key = ResourceKey::of(&node.object);
        if self.index.get(&key) == Some(&id) {
            self.index.remove(&key);
        }
        match node.parent {
            None => {
                self.roots.remove(&key);
            }
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.retain(|&c| c != id);
                }
            }
        }

        let mut promoted = Vec::with_capacity(node.children.len());
        for child in &node.children {
            if let Some(c) = self.nodes.get_mut(child) {
                c.parent = None;
                self.roots.insert(ResourceKey::of(&c.object));
                promoted.push(Arc::clone(&c.object));
            }
        }
        Some((node, promoted))
    }
}

/// One step of an iterative subtree teardown.
enum Teardown<'a, T: ?Sized> {
    /// Guard the node, run the pre-teardown hook and queue its children.
    Enter(NodeId),
    /// Every child is done: remove and execute the node.
    Finish {
        id: NodeId,
        object: Arc<T>,
        _guard: RecursionGuard<'a, NodeId>,
    },
}

// ───────────────────────────────────────── tree ──────────────

/// Identity-keyed ownership forest.
///
/// One tree is a long-lived context object; share it with `Arc` rather than
/// reaching for a global.
pub struct ObjectTree<T: ?Sized> {
    state: Mutex<TreeState<T>>,
    listeners: ListenerList<T>,
    /// Nodes currently being executed, by any thread.
    executing: Mutex<HashSet<NodeId>>,
    /// Unregistered objects currently being executed, by any thread.
    executing_unregistered: Mutex<HashSet<ResourceKey>>,
    modification: AtomicU64,
    debug_mode: AtomicBool,
    /// Names the runtime type of a resource in leak reports.
    type_name_of: fn(&T) -> &'static str,
}

fn static_type_name<T: ?Sized>(_: &T) -> &'static str {
    type_name::<T>()
}

impl<T: ?Sized> Default for ObjectTree<T> {
    fn default() -> Self {
        Self::new(false)
    }
}

impl<T: ?Sized> ObjectTree<T> {
    pub fn new(debug_mode: bool) -> Self {
        Self {
            state: Mutex::new(TreeState::default()),
            listeners: ListenerList::default(),
            executing: Mutex::new(HashSet::new()),
            executing_unregistered: Mutex::new(HashSet::new()),
            modification: AtomicU64::new(0),
            debug_mode: AtomicBool::new(debug_mode),
            type_name_of: static_type_name::<T>,
        }
    }

    /// Use `type_name_of` to name leaked resources.  Trees of trait objects
    /// otherwise only know the trait's name.
    pub fn with_type_names(mut self, type_name_of: fn(&T) -> &'static str) -> Self {
        self.type_name_of = type_name_of;
        self
    }

    /// Toggle allocation-trace capture for nodes created from now on.
    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    /// Latest modification stamp handed out (0 before the first node).
    pub fn modification(&self) -> u64 {
        self.modification.load(Ordering::SeqCst)
    }

    fn next_stamp(&self) -> NodeId {
        self.modification.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn capture_trace(&self) -> Option<Arc<AllocationTrace>> {
        self.is_debug_mode()
            .then(|| Arc::new(AllocationTrace::capture()))
    }

    pub fn add_listener(&self, listener: Arc<dyn ObjectTreeListener<T>>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ObjectTreeListener<T>>) {
        self.listeners.remove(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn contains_key(&self, object: &Arc<T>) -> bool {
        self.state.lock().index.contains_key(&ResourceKey::of(object))
    }

    /// `true` when no root is registered (and therefore nothing at all).
    pub fn is_empty(&self) -> bool {
        self.state.lock().roots.is_empty()
    }

    /// Number of registered resources.
    pub fn size(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Registered roots, oldest first.
    pub fn root_objects(&self) -> Vec<Arc<T>> {
        let state = self.state.lock();
        let mut roots: Vec<&ObjectNode<T>> = state
            .roots
            .iter()
            .filter_map(|key| state.node_of(*key))
            .collect();
        roots.sort_by_key(|n| n.id);
        roots.iter().map(|n| Arc::clone(&n.object)).collect()
    }

    /// Direct children of `parent` in registration order.  Empty when
    /// `parent` isn't registered.
    pub fn children_of(&self, parent: &Arc<T>) -> Vec<Arc<T>> {
        let state = self.state.lock();
        let Some(node) = state.node_of(ResourceKey::of(parent)) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .map(|n| Arc::clone(&n.object))
            .collect()
    }

    pub fn parent_of(&self, child: &Arc<T>) -> Option<Arc<T>> {
        let state = self.state.lock();
        let parent = state.node_of(ResourceKey::of(child))?.parent?;
        state.nodes.get(&parent).map(|n| Arc::clone(&n.object))
    }

    /// Stamp of the node currently holding `object`.
    pub fn stamp_of(&self, object: &Arc<T>) -> Option<NodeId> {
        self.state.lock().node_of(ResourceKey::of(object)).map(|n| n.id)
    }

    /// Allocation trace recorded when `object` was first registered, if
    /// debug mode was on at the time.
    pub fn trace_of(&self, object: &Arc<T>) -> Option<Arc<AllocationTrace>> {
        self.state
            .lock()
            .node_of(ResourceKey::of(object))
            .and_then(|n| n.trace.clone())
    }

    /// Among `parent`'s direct children, the first whose resource satisfies
    /// `matches`.
    pub fn find_registered_by<F>(&self, parent: &Arc<T>, mut matches: F) -> Option<Arc<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let state = self.state.lock();
        let node = state.node_of(ResourceKey::of(parent))?;
        node.children
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .find(|child| matches(child.object.as_ref()))
            .map(|child| Arc::clone(&child.object))
    }

    /// Among `parent`'s direct children, the first one equal to `candidate`
    /// by the resource's own `PartialEq`, not by identity.
    pub fn find_registered_object<U>(&self, parent: &Arc<T>, candidate: &U) -> Option<Arc<T>>
    where
        U: ?Sized,
        T: PartialEq<U>,
    {
        self.find_registered_by(parent, |child| child == candidate)
    }

    fn fire_registered(&self, object: &Arc<T>) {
        for listener in self.listeners.snapshot().iter() {
            listener.object_registered(object);
        }
    }

    fn fire_executed(&self, object: &Arc<T>) {
        for listener in self.listeners.snapshot().iter() {
            listener.object_executed(object);
        }
    }
}

impl<T: ?Sized + fmt::Debug> ObjectTree<T> {
    fn report(&self, anomaly: TreeAnomaly) {
        tracing::error!(%anomaly, "object tree anomaly");
        for listener in self.listeners.snapshot().iter() {
            listener.anomaly(&anomaly);
        }
    }

    fn report_action_error(&self, object: &Arc<T>, phase: ActionPhase, err: anyhow::Error) {
        self.report(TreeAnomaly::ActionFailed {
            object: format!("{object:?}"),
            phase,
            message: format!("{err:#}"),
        });
    }

    /// Make `parent` the owner of `child`.
    ///
    /// `parent` is registered as a root if it isn't known yet.  A `child`
    /// that is already registered elsewhere moves under `parent`.  A
    /// registration that would make `child` its own ancestor is reported as
    /// [`TreeAnomaly::Cycle`] and leaves `child` where it was.
    pub fn register(&self, parent: &Arc<T>, child: &Arc<T>) {
        let parent_key = ResourceKey::of(parent);
        let child_key = ResourceKey::of(child);
        if parent_key == child_key {
            self.report(TreeAnomaly::SelfRegistration {
                object: format!("{child:?}"),
            });
            return;
        }

        let attached = {
            let mut state = self.state.lock();
            let existing = state.index.get(&parent_key).copied();
            let parent_id = match existing {
                Some(id) => id,
                None => {
                    let node =
                        ObjectNode::new(self.next_stamp(), Arc::clone(parent), None, self.capture_trace());
                    state.insert(node)
                }
            };

            match state.index.get(&child_key).copied() {
                None => {
                    let node = ObjectNode::new(
                        self.next_stamp(),
                        Arc::clone(child),
                        Some(parent_id),
                        self.capture_trace(),
                    );
                    state.insert(node);
                    true
                }
                Some(child_id) if state.is_in_ancestry(child_id, parent_id) => false,
                Some(child_id) => {
                    state.reparent(child_id, parent_id);
                    true
                }
            }
        };

        if attached {
            tracing::debug!(?parent, ?child, "registered");
            self.fire_registered(child);
        } else {
            self.report(TreeAnomaly::Cycle {
                child: format!("{child:?}"),
                parent: format!("{parent:?}"),
            });
        }
    }

    /// Tear down `object`.
    ///
    /// Registered objects are executed children-first (when `dispose_tree`)
    /// and removed from the tree; returns `true`.  Unregistered objects get
    /// `action` applied once when `process_unregistered` is set (returns
    /// `true`), otherwise nothing happens and `false` is returned.
    pub fn execute_all<A>(
        &self,
        object: &Arc<T>,
        dispose_tree: bool,
        action: &A,
        process_unregistered: bool,
    ) -> bool
    where
        A: ObjectTreeAction<T> + ?Sized,
    {
        let key = ResourceKey::of(object);
        let node = self.state.lock().index.get(&key).copied();
        match node {
            Some(id) => {
                self.execute_node(id, dispose_tree, action);
                true
            }
            None if process_unregistered => {
                self.execute_unregistered(object, action);
                true
            }
            None => false,
        }
    }

    /// Execute `to_execute` and register `to_replace` in its place under the
    /// same parent.
    ///
    /// The tree lock is released between the two steps, so other threads may
    /// observe a moment where neither resource is attached.
    pub fn execute_child_and_replace<A>(
        &self,
        to_execute: &Arc<T>,
        to_replace: &Arc<T>,
        dispose_tree: bool,
        action: &A,
    ) -> Result<(), TreeError>
    where
        A: ObjectTreeAction<T> + ?Sized,
    {
        let (node_id, parent) = {
            let state = self.state.lock();
            let node = state
                .node_of(ResourceKey::of(to_execute))
                .ok_or_else(|| TreeError::NotRegistered {
                    object: format!("{to_execute:?}"),
                })?;
            let parent = node
                .parent
                .and_then(|p| state.nodes.get(&p))
                .ok_or_else(|| TreeError::NotAttached {
                    object: format!("{to_execute:?}"),
                })?;
            (node.id, Arc::clone(&parent.object))
        };

        self.execute_node(node_id, dispose_tree, action);
        self.register(&parent, to_replace);
        Ok(())
    }

    /// Tear down the node `id` and, with `dispose_tree`, its subtree.
    ///
    /// The walk keeps its own stack instead of recursing, so chain depth is
    /// bounded by memory rather than by the thread's stack.  Each entered node
    /// holds its recursion guard until it has been executed.
    fn execute_node<A>(&self, id: NodeId, dispose_tree: bool, action: &A)
    where
        A: ObjectTreeAction<T> + ?Sized,
    {
        let mut stack = vec![Teardown::Enter(id)];
        while let Some(step) = stack.pop() {
            match step {
                Teardown::Enter(id) => {
                    let Some(guard) = RecursionGuard::enter(&self.executing, id) else {
                        tracing::debug!(node = id, "already executing, skipped");
                        continue;
                    };
                    let Some(object) =
                        self.state.lock().nodes.get(&id).map(|n| Arc::clone(&n.object))
                    else {
                        continue;
                    };

                    if let Err(err) = action.before_tree_execution(&object) {
                        self.report_action_error(&object, ActionPhase::BeforeTreeExecution, err);
                    }

                    let children = if dispose_tree {
                        self.state.lock().take_children(id)
                    } else {
                        Vec::new()
                    };
                    stack.push(Teardown::Finish {
                        id,
                        object,
                        _guard: guard,
                    });
                    // Last registered ends up on top and runs first.
                    stack.extend(children.into_iter().map(Teardown::Enter));
                }
                Teardown::Finish { id, object, .. } => {
                    self.finish_node(id, &object, dispose_tree, action);
                }
            }
        }
    }

    /// Remove an entered node and run `action` on it.
    fn finish_node<A>(&self, id: NodeId, object: &Arc<T>, dispose_tree: bool, action: &A)
    where
        A: ObjectTreeAction<T> + ?Sized,
    {
        let Some((_, promoted)) = self.state.lock().remove(id) else {
            return;
        };
        if dispose_tree {
            for child in promoted {
                tracing::warn!(parent = ?object, ?child, "child registered during disposal");
                self.report(TreeAnomaly::LateChild {
                    parent: format!("{object:?}"),
                    child: format!("{child:?}"),
                });
            }
        } else if !promoted.is_empty() {
            tracing::debug!(?object, count = promoted.len(), "children promoted to roots");
        }

        if let Err(err) = action.execute(object) {
            self.report_action_error(object, ActionPhase::Execute, err);
        }
        tracing::debug!(?object, "executed");
        self.fire_executed(object);
    }

    fn execute_unregistered<A>(&self, object: &Arc<T>, action: &A)
    where
        A: ObjectTreeAction<T> + ?Sized,
    {
        let Some(_guard) = RecursionGuard::enter(&self.executing_unregistered, ResourceKey::of(object))
        else {
            return;
        };
        if let Err(err) = action.execute(object) {
            self.report_action_error(object, ActionPhase::Execute, err);
        }
    }

    /// Leak check.  Every still-registered root is a leak.
    ///
    /// With `throw_on_leak` the oldest leak comes back as
    /// [`TreeError::LeakDetected`]; otherwise each leak is logged at error
    /// level and `Ok(())` is returned.
    pub fn assert_is_empty(&self, throw_on_leak: bool) -> Result<(), TreeError> {
        let leaks: Vec<(Arc<T>, Option<Arc<AllocationTrace>>)> = {
            let state = self.state.lock();
            let mut nodes: Vec<&ObjectNode<T>> = state
                .roots
                .iter()
                .filter_map(|key| state.node_of(*key))
                .collect();
            nodes.sort_by_key(|n| n.id);
            nodes
                .into_iter()
                .map(|n| (Arc::clone(&n.object), n.trace.clone()))
                .collect()
        };

        let leaked = leaks.len();
        let mut reports = leaks.into_iter().map(|(object, trace)| TreeError::LeakDetected {
            object: format!("{object:?}"),
            type_name: (self.type_name_of)(object.as_ref()),
            leaked,
            trace,
        });

        if throw_on_leak {
            return match reports.next() {
                Some(err) => Err(err),
                None => Ok(()),
            };
        }
        for err in reports {
            tracing::error!("{err}");
        }
        Ok(())
    }

    /// Fail if any node still refers to `object`, as its own resource, as a
    /// parent or as a child.  Intended for tests after disposal.
    pub fn assert_no_reference_kept_in_tree(&self, object: &Arc<T>) -> Result<(), TreeError> {
        let key = ResourceKey::of(object);
        let state = self.state.lock();
        let kept = state.nodes.values().any(|node| {
            let refers = |id: &NodeId| {
                state
                    .nodes
                    .get(id)
                    .is_some_and(|n| ResourceKey::of(&n.object) == key)
            };
            ResourceKey::of(&node.object) == key
                || node.parent.as_ref().is_some_and(refers)
                || node.children.iter().any(refers)
        });
        if kept || state.roots.contains(&key) {
            return Err(TreeError::ReferenceKept {
                object: format!("{object:?}"),
            });
        }
        Ok(())
    }
}
