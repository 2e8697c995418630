//! Error taxonomy
//!
//! One structured error enum covers the whole engine. The split that
//! matters operationally is fatal vs per-entry: transport loss, an
//! unenumerable subtree or a planner invariant violation abort the run,
//! while single-entry failures are recorded and the run continues.

use serde::{Deserialize, Serialize};

use crate::entry::EntryKind;
use crate::fingerprint::FingerprintAlgo;
use crate::path::RelPath;

/// Result alias used across the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All error conditions produced by the sync engine and its volumes.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    /// The session or connection behind a volume failed. Always fatal.
    #[error("transport error on {volume}: {message}")]
    Transport {
        /// Display name of the affected volume.
        volume: String,
        /// Underlying failure description.
        message: String,
    },

    /// A subtree could not be enumerated, making any diff unsafe. Fatal.
    #[error("scan of '{rel}' failed: {message}")]
    Scan {
        /// Directory whose listing failed.
        rel: RelPath,
        /// Underlying failure description.
        message: String,
    },

    /// A single-entry I/O failure. Recorded, run continues.
    #[error("I/O error on '{rel}': {message}")]
    Io {
        /// Affected entry.
        rel: RelPath,
        /// Underlying failure description.
        message: String,
    },

    /// Permission denied for a single entry.
    #[error("permission denied: '{rel}'")]
    PermissionDenied {
        /// Affected entry.
        rel: RelPath,
    },

    /// An entry disappeared between scan and use.
    #[error("entry vanished during run: '{rel}'")]
    Vanished {
        /// Affected entry.
        rel: RelPath,
    },

    /// Source and target entry types differ and `force` is not set.
    /// The target is left untouched.
    #[error("type mismatch at '{rel}': source is a {source_kind} but target is a {target_kind} (delete the target or use the 'force' option)")]
    Conflict {
        /// Mapped target path of the pair.
        rel: RelPath,
        /// Entry type on the source side.
        source_kind: EntryKind,
        /// Entry type on the target side.
        target_kind: EntryKind,
    },

    /// A parent directory is missing and `parents` is not set.
    #[error("parent directory of '{rel}' does not exist (did you forget the 'parents' option?)")]
    ParentMissing {
        /// Entry whose parent is missing.
        rel: RelPath,
    },

    /// Internal planner invariant violation. Always fatal.
    #[error("planning invariant violated: {message}")]
    PlanningInvariant {
        /// Description of the violated invariant.
        message: String,
    },

    /// No fingerprint algorithm is supported by both volumes. Fatal.
    #[error("no common fingerprint algorithm (source supports {source_algos:?}, target supports {target:?})")]
    FingerprintNegotiation {
        /// Algorithms the source volume supports.
        source_algos: Vec<FingerprintAlgo>,
        /// Algorithms the target volume supports.
        target: Vec<FingerprintAlgo>,
    },

    /// Remote command output could not be parsed. Fatal, since it means
    /// the selected dialect does not match the remote host.
    #[error("unparseable remote transcript: {message}")]
    Transcript {
        /// Description of the parse failure.
        message: String,
    },

    /// An operation this volume cannot perform.
    #[error("operation not supported on {volume}: {operation}")]
    Unsupported {
        /// Display name of the volume.
        volume: String,
        /// The unsupported operation.
        operation: String,
    },

    /// A single remote operation timed out.
    #[error("operation timed out after {seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// The run was cancelled cooperatively.
    #[error("run cancelled")]
    Cancelled,

    /// A path that violates the relative-path invariants.
    #[error("invalid relative path '{path}': {reason}")]
    InvalidPath {
        /// The offending path as given.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl Error {
    /// Whether this error class aborts the run.
    ///
    /// Per-entry classes accumulate into the result instead; a timeout is
    /// per-entry here because the scanner wraps scan-phase timeouts into
    /// [`Error::Scan`] before they reach the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Scan { .. }
                | Self::PlanningInvariant { .. }
                | Self::FingerprintNegotiation { .. }
                | Self::Transcript { .. }
                | Self::Cancelled
        )
    }

    /// Build a transport error for a volume.
    pub fn transport(volume: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            volume: volume.into(),
            message: message.into(),
        }
    }

    /// Build a planner invariant error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::PlanningInvariant {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_classification() {
        assert!(Error::transport("sftp://host", "session lost").is_fatal());
        assert!(Error::invariant("duplicate key").is_fatal());
        assert!(!Error::Vanished {
            rel: RelPath::new("a").unwrap()
        }
        .is_fatal());
        assert!(!Error::Timeout { seconds: 30 }.is_fatal());
    }
}
