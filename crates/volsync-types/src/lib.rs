//! Core type system and error handling for volsync
//!
//! This crate provides the foundational types shared across the volsync
//! workspace:
//!
//! - **Paths**: the normalized [`RelPath`] every volume, scan and plan is
//!   keyed by
//! - **Entries**: [`Entry`] metadata records produced by scanning
//! - **Fingerprints**: the [`Fingerprint`] value types used for content
//!   equality decisions
//! - **Plans**: [`SyncAction`] and its ordering-relevant metadata
//! - **Errors**: one structured [`Error`] enum covering the whole fatal /
//!   per-entry taxonomy
//! - **Results**: the immutable [`SyncResult`] summary of a run
//!
//! # Examples
//!
//! ```rust
//! use volsync_types::{Entry, EntryKind, RelPath};
//! use std::time::SystemTime;
//!
//! let rel = RelPath::new("docs/readme.txt")?;
//! let entry = Entry::new(rel, EntryKind::File, 1024, SystemTime::now());
//! assert!(entry.is_file());
//! # Ok::<(), volsync_types::Error>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod observer;
pub mod options;
pub mod path;
pub mod result;

// Re-export commonly used types
pub use action::{ActionKind, ActionReason, SyncAction};
pub use config::{RetryConfig, TimeoutConfig};
pub use entry::{DirListing, Entry, EntryKind, MTIME_TOLERANCE};
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, FingerprintAlgo};
pub use observer::{NoopObserver, SyncObserver, SyncSide};
pub use options::{SyncMode, SyncOptions};
pub use path::RelPath;
pub use result::{ActionCounts, EntryFailure, RunState, SyncResult, SyncStatus};
