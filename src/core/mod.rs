//! Core data structures: the ownership forest and its collaborators.
//!
//! Nothing in this module knows about configuration files or the CLI.
//! Every type is `Send + Sync` for `Send + Sync` resources so one tree can be
//! shared across worker threads.

pub mod action;
pub mod error;
mod guard;
pub mod identity;
pub mod listener;
pub mod node;
pub mod tree;
