//! # quickvm-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire QuickVM workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the vocabulary (machine identities, raw and
//! classified states, command outcomes) that every other crate speaks.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
