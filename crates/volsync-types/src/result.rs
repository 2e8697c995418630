//! Run state and results
//!
//! The per-run state machine is one-directional: once a run leaves a
//! state it never returns, and any fatal error moves straight to
//! `Aborted` while preserving the partial result for diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::action::{ActionKind, SyncAction};
use crate::entry::EntryKind;
use crate::error::Error;
use crate::options::SyncMode;
use crate::path::RelPath;

/// Phases of a sync run, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Nothing started yet.
    Idle,
    /// Enumerating the source tree.
    ScanningSource,
    /// Enumerating the target tree.
    ScanningTarget,
    /// Diffing and building the plan.
    Planning,
    /// Applying the plan.
    Executing,
    /// Completed normally.
    Done,
    /// A fatal error ended the run.
    Aborted,
    /// Cooperative cancellation ended the run.
    Cancelled,
}

impl RunState {
    /// Whether the run can move from `self` to `next`.
    pub fn can_transition(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Aborted | Self::Cancelled => true,
            Self::ScanningSource => self == Self::Idle,
            Self::ScanningTarget => self == Self::ScanningSource,
            Self::Planning => self == Self::ScanningTarget,
            Self::Executing => self == Self::Planning,
            Self::Done => self == Self::Executing,
            Self::Idle => false,
        }
    }

    /// Whether the run has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ScanningSource => "scanning source",
            Self::ScanningTarget => "scanning target",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Plan fully executed (individual entries may still have failed).
    Done,
    /// A fatal error cut the run short.
    Aborted,
    /// The run was cancelled between actions.
    Cancelled,
}

/// Per-kind counts of applied actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    /// Directories created.
    pub dirs_created: u64,
    /// Files and symlinks copied fresh.
    pub files_copied: u64,
    /// Files and symlinks updated in place.
    pub files_updated: u64,
    /// Files and symlinks deleted.
    pub files_deleted: u64,
    /// Directories deleted.
    pub dirs_deleted: u64,
    /// Pairs skipped as already synchronized.
    pub skipped: u64,
}

impl ActionCounts {
    /// Record one successfully applied action.
    pub fn record(&mut self, action: &SyncAction) {
        match action.kind {
            ActionKind::Mkdir => self.dirs_created += 1,
            ActionKind::Copy => self.files_copied += 1,
            ActionKind::Update => self.files_updated += 1,
            ActionKind::Delete => {
                if action.entry_kind == EntryKind::Dir {
                    self.dirs_deleted += 1;
                } else {
                    self.files_deleted += 1;
                }
            }
            ActionKind::Skip => self.skipped += 1,
        }
    }

    /// Total of everything that modified the target.
    pub fn total_changes(&self) -> u64 {
        self.dirs_created
            + self.files_copied
            + self.files_updated
            + self.files_deleted
            + self.dirs_deleted
    }

    /// Merge another set of counts into this one.
    pub fn merge(&mut self, other: &Self) {
        self.dirs_created += other.dirs_created;
        self.files_copied += other.files_copied;
        self.files_updated += other.files_updated;
        self.files_deleted += other.files_deleted;
        self.dirs_deleted += other.dirs_deleted;
        self.skipped += other.skipped;
    }
}

/// One recorded per-entry failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFailure {
    /// Entry the failure applies to.
    pub rel: RelPath,
    /// The action that was being attempted.
    pub action: ActionKind,
    /// The cause.
    pub error: Error,
}

impl EntryFailure {
    /// Create a new failure record.
    pub fn new(rel: RelPath, action: ActionKind, error: Error) -> Self {
        Self { rel, action, error }
    }
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.action, self.rel, self.error)
    }
}

/// The immutable summary of a finished (or aborted) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The mode the run used.
    pub mode: SyncMode,
    /// How the run ended.
    pub status: SyncStatus,
    /// Applied-action counts.
    pub counts: ActionCounts,
    /// File content bytes moved source to target.
    pub bytes_transferred: u64,
    /// Content fingerprints computed or fetched.
    pub fingerprints_computed: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Per-entry failures, in the order they occurred.
    pub errors: Vec<EntryFailure>,
}

impl SyncResult {
    /// Whether the run finished with no failures at all.
    pub fn is_clean(&self) -> bool {
        self.status == SyncStatus::Done && self.errors.is_empty()
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: dirs_created={} files_copied={} files_updated={} deleted={} skipped={} bytes={} errors={}",
            self.status,
            self.counts.dirs_created,
            self.counts.files_copied,
            self.counts.files_updated,
            self.counts.files_deleted + self.counts.dirs_deleted,
            self.counts.skipped,
            self.bytes_transferred,
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_directional() {
        assert!(RunState::Idle.can_transition(RunState::ScanningSource));
        assert!(RunState::ScanningSource.can_transition(RunState::ScanningTarget));
        assert!(RunState::Planning.can_transition(RunState::Executing));
        assert!(RunState::Executing.can_transition(RunState::Done));
        assert!(!RunState::Planning.can_transition(RunState::ScanningSource));
        assert!(!RunState::Done.can_transition(RunState::Executing));
    }

    #[test]
    fn abort_reachable_from_any_live_state() {
        for state in [
            RunState::Idle,
            RunState::ScanningSource,
            RunState::ScanningTarget,
            RunState::Planning,
            RunState::Executing,
        ] {
            assert!(state.can_transition(RunState::Aborted));
            assert!(state.can_transition(RunState::Cancelled));
        }
        assert!(!RunState::Cancelled.can_transition(RunState::Aborted));
    }

    #[test]
    fn counts_split_deletes_by_kind() {
        let mut counts = ActionCounts::default();
        counts.record(&SyncAction::delete(
            RelPath::new("d").unwrap(),
            EntryKind::Dir,
            crate::action::ActionReason::Extraneous,
        ));
        counts.record(&SyncAction::delete(
            RelPath::new("f").unwrap(),
            EntryKind::File,
            crate::action::ActionReason::Extraneous,
        ));
        assert_eq!(counts.dirs_deleted, 1);
        assert_eq!(counts.files_deleted, 1);
        assert_eq!(counts.total_changes(), 2);
    }
}
