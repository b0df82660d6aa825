//! Integration tests for buildguard-lib.
//!
//! Each test drives one or more build contexts through the public API against
//! an isolated set of input, output and state directories.

mod context_tests;
