//! Shared utilities.
//!
//! Path resolution helpers used across the crate and test helpers.

pub mod paths;
