//! Errors returned by the tree and diagnostics it reports.

use std::sync::Arc;

use thiserror::Error;

use super::node::AllocationTrace;

/// Caller-contract violations and leak failures.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("object {object} wasn't registered or is already disposed")]
    NotRegistered { object: String },

    #[error("object {object} is not connected to the tree: it has no parent")]
    NotAttached { object: String },

    #[error("object {object} is still referenced by the tree")]
    ReferenceKept { object: String },

    #[error(
        "memory leak detected: {object} of type {type_name} ({leaked} root(s) still registered){}",
        render_trace(.trace)
    )]
    LeakDetected {
        object: String,
        type_name: &'static str,
        leaked: usize,
        trace: Option<Arc<AllocationTrace>>,
    },
}

fn render_trace(trace: &Option<Arc<AllocationTrace>>) -> String {
    match trace {
        Some(trace) => format!("\nregistration trace, {trace}"),
        None => String::from("\n(enable debug mode to capture the registration trace)"),
    }
}

/// Which step of a disposal action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    BeforeTreeExecution,
    Execute,
}

/// Structural problems the tree recovers from but reports.
///
/// These never abort an operation.  They are logged at error level and handed
/// to every listener's [`anomaly`](super::listener::ObjectTreeListener::anomaly)
/// callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeAnomaly {
    #[error("{object} can't be registered as its own child")]
    SelfRegistration { object: String },

    #[error("{child} was already added as an ancestor of {parent}; registration ignored")]
    Cycle { child: String, parent: String },

    #[error("{child} was registered under {parent} while it was being disposed; promoted to root")]
    LateChild { parent: String, child: String },

    #[error("disposal action failed for {object} ({phase:?}): {message}")]
    ActionFailed {
        object: String,
        phase: ActionPhase,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leak_message_mentions_debug_mode_without_trace() {
        let err = TreeError::LeakDetected {
            object: "Service".into(),
            type_name: "demo::Service",
            leaked: 2,
            trace: None,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("memory leak detected: Service of type demo::Service (2 root(s)"));
        assert!(msg.contains("enable debug mode"));
    }

    #[test]
    fn leak_message_embeds_trace() {
        let err = TreeError::LeakDetected {
            object: "Service".into(),
            type_name: "demo::Service",
            leaked: 1,
            trace: Some(Arc::new(AllocationTrace::capture())),
        };
        assert!(err.to_string().contains("registration trace, registered at"));
    }
}
