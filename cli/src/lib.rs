//! Agent-side library: control connection, local forwarding, and
//! persisted configuration for the `tunnel` binary.

pub mod agent;
pub mod config;
pub mod error;
pub mod forward;
