//! # quickvm-hypervisor
//!
//! The seam between the engine and the host's hypervisor management
//! interface.
//!
//! - [`hypervisor::Hypervisor`]: enumerate machines and request transitions
//!   with raw codes.
//! - [`source::StateSource`]: classified enumeration plus a polling feed of
//!   state transitions.
//! - [`simulated::SimulatedHypervisor`]: an in-memory host for development
//!   and tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod hypervisor;
pub mod simulated;
pub mod source;
