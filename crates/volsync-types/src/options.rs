//! Run configuration
//!
//! [`SyncOptions`] is immutable for a run. Defaults mimic rsync: nothing
//! destructive unless asked for.

use serde::{Deserialize, Serialize};

use crate::fingerprint::FingerprintAlgo;
use crate::path::RelPath;

/// How source paths map onto the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Target path equals the source-relative path; the source root's own
    /// name is never reproduced on the target.
    Merge,
    /// Target path equals `source_root_name/source_relative_path`; the
    /// target gains exactly one new top-level entry named after the
    /// source root.
    Nest,
}

impl SyncMode {
    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Nest => "nest",
        }
    }
}

/// Options for a single sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Remove target-only entries.
    pub delete: bool,
    /// Overwrite entries whose type differs from the source.
    pub force: bool,
    /// Auto-create missing parent directories.
    pub parents: bool,
    /// Compare content fingerprints even when size and mtime match.
    pub ignore_times: bool,
    /// Emit byte-level progress events.
    pub progress: bool,
    /// Log each applied action at info level.
    pub verbose: bool,
    /// Log itemized per-pair change detection.
    pub debug: bool,
    /// Restore source mtime and permission bits after content transfer.
    pub preserve_times: bool,
    /// Fingerprint algorithms to negotiate, in preference order.
    pub preferred_fingerprints: Vec<FingerprintAlgo>,
    /// Source-relative path prefixes to leave out of the sync.
    pub excludes: Vec<RelPath>,
    /// How many quick-check-ambiguous pairs to accumulate before resolving
    /// their fingerprints in one batch.
    pub max_deferred_fingerprints: usize,
}

impl SyncOptions {
    /// Options that make the target mirror the source exactly.
    pub fn mirror() -> Self {
        Self {
            delete: true,
            ..Self::default()
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: false,
            force: false,
            parents: false,
            ignore_times: false,
            progress: false,
            verbose: false,
            debug: false,
            preserve_times: true,
            preferred_fingerprints: FingerprintAlgo::DEFAULT_PREFERENCE.to_vec(),
            excludes: Vec::new(),
            max_deferred_fingerprints: 256,
        }
    }
}
