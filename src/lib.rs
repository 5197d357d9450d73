//! Identity-keyed ownership tree.
//!
//! Register resources under owners with [`ObjectTree::register`]; tearing an
//! owner down with [`ObjectTree::execute_all`] tears down everything it owns,
//! children first, exactly once.  [`Disposer`] wraps a tree of
//! [`Disposable`] resources for the common case.
//!
//! Set `RUST_LOG=ownership_tree=debug` to see registrations and executions,
//! and turn on debug mode to capture allocation traces for leak reports.

pub mod app;
pub mod config;
pub mod core;

pub use crate::app::disposer::{Disposable, DisposableRef, Disposer, NamedDisposable};
pub use crate::config::TreeConfig;
pub use crate::core::action::ObjectTreeAction;
pub use crate::core::error::{ActionPhase, TreeAnomaly, TreeError};
pub use crate::core::identity::ResourceKey;
pub use crate::core::listener::ObjectTreeListener;
pub use crate::core::node::{AllocationTrace, NodeId};
pub use crate::core::tree::ObjectTree;
