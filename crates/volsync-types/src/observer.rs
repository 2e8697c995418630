//! Progress observation
//!
//! The engine reports structured events to a [`SyncObserver`]; rendering
//! (terminal progress bars, logs, GUIs) is entirely external. All methods
//! have empty default bodies so observers implement only what they need.

use crate::action::SyncAction;
use crate::entry::Entry;
use crate::path::RelPath;
use crate::result::{EntryFailure, RunState};

/// Which tree an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSide {
    /// The tree being read from.
    Source,
    /// The tree being written to.
    Target,
}

/// Receiver for structured sync progress events.
pub trait SyncObserver: Send + Sync {
    /// The run moved to a new state.
    fn state_changed(&self, _state: RunState) {}

    /// An entry was discovered during scanning.
    fn entry_scanned(&self, _side: SyncSide, _entry: &Entry) {}

    /// An action is about to be applied.
    fn action_started(&self, _action: &SyncAction) {}

    /// Bytes moved for a file currently being transferred.
    fn bytes_transferred(&self, _rel: &RelPath, _bytes: u64, _total: u64) {}

    /// An action completed successfully.
    fn action_finished(&self, _action: &SyncAction) {}

    /// An action failed non-fatally.
    fn action_failed(&self, _failure: &EntryFailure) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
