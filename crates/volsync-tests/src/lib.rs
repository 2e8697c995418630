//! Integration test support for the volsync workspace
//!
//! The tests themselves live in `tests/`; this crate holds the shared
//! fixtures for building and inspecting directory trees.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod test_utils;
