//! # quickvm-engine
//!
//! Keeps front-ends in sync with the hypervisor and carries their commands
//! back to it.
//!
//! - [`registry`]: fan-out of state-change events to live subscribers.
//! - [`dispatcher`]: validation and execution of state-change commands.
//! - [`bulk`]: "all virtual machines" operations.
//! - [`manager`]: the engine host a front-end talks to.
//! - [`ipc`]: the engine as a background service on a local socket.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bulk;
pub mod dispatcher;
pub mod ipc;
pub mod manager;
pub mod registry;
