//! # quickvm-core
//!
//! Pure decision logic of the QuickVM engine. Nothing in this crate talks
//! to a hypervisor or holds state between calls.
//!
//! - [`classifier`]: raw `EnabledState` codes to classified states.
//! - [`actions`]: which commands are legal for a state, per machine and in bulk.
//! - [`outcome`]: method return codes to typed outcomes.
//! - [`summary`]: host overlay and notification text for front-ends.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod actions;
pub mod classifier;
pub mod outcome;
pub mod summary;
