//! Application layer: the disposal context and the background stress runtime.

pub mod disposer;
pub mod stress_runtime;
