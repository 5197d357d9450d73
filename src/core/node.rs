//! Per-resource bookkeeping records and debug allocation traces.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Node identifier.  Equal to the modification stamp assigned when the node
/// was created, so ids are never reused within one tree.
pub type NodeId = u64;

// ───────────────────────────────────────── allocation trace ──

/// Where and when a resource was first registered.  Captured only while the
/// tree is in debug mode, since taking a backtrace is expensive.
#[derive(Debug)]
pub struct AllocationTrace {
    backtrace: Backtrace,
    captured_at: DateTime<Local>,
    thread: String,
}

impl AllocationTrace {
    pub fn capture() -> Self {
        let current = std::thread::current();
        Self {
            backtrace: Backtrace::force_capture(),
            captured_at: Local::now(),
            thread: current
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:?}", current.id())),
        }
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn thread(&self) -> &str {
        &self.thread
    }
}

impl fmt::Display for AllocationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "registered at {} on thread {}:",
            self.captured_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.thread
        )?;
        write!(f, "{}", self.backtrace)
    }
}

// ───────────────────────────────────────── node ──────────────

/// A single node of the ownership forest.
///
/// Links are ids into the tree's node map rather than pointers, the same way
/// an arena tree links its nodes, so re-parenting is a couple of list edits.
#[derive(Debug)]
pub(crate) struct ObjectNode<T: ?Sized> {
    pub(crate) id: NodeId,
    pub(crate) object: Arc<T>,
    pub(crate) parent: Option<NodeId>,
    /// Registration order; teardown walks it back to front.
    pub(crate) children: Vec<NodeId>,
    pub(crate) trace: Option<Arc<AllocationTrace>>,
}

impl<T: ?Sized> ObjectNode<T> {
    pub(crate) fn new(
        id: NodeId,
        object: Arc<T>,
        parent: Option<NodeId>,
        trace: Option<Arc<AllocationTrace>>,
    ) -> Self {
        Self {
            id,
            object,
            parent,
            children: Vec::new(),
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_records_thread_and_time() {
        let before = Local::now();
        let trace = std::thread::Builder::new()
            .name("registrar".into())
            .spawn(AllocationTrace::capture)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(trace.thread(), "registrar");
        assert!(trace.captured_at() >= before);
        assert!(trace.to_string().contains("registrar"));
    }

    #[test]
    fn fresh_node_has_no_children() {
        let node = ObjectNode::new(7, Arc::new("res"), Some(3), None);
        assert_eq!(node.id, 7);
        assert_eq!(*node.object, "res");
        assert_eq!(node.parent, Some(3));
        assert!(node.children.is_empty());
        assert!(node.trace.is_none());
    }
}
