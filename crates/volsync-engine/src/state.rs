//! Run state tracking

use tracing::debug;

use volsync_types::{Error, Result, RunState, SyncObserver};

/// Enforces the one-directional run state machine and notifies the
/// observer on every transition.
pub(crate) struct StateTracker<'a> {
    state: RunState,
    observer: &'a dyn SyncObserver,
}

impl<'a> StateTracker<'a> {
    pub(crate) fn new(observer: &'a dyn SyncObserver) -> Self {
        Self {
            state: RunState::Idle,
            observer,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    /// Move to the next state. An illegal transition is a bug in the
    /// engine itself, reported as a planning invariant violation.
    pub(crate) fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::invariant(format!(
                "illegal run state transition {} -> {next}",
                self.state
            )));
        }
        debug!(from = %self.state, to = %next, "run state transition");
        self.state = next;
        self.observer.state_changed(next);
        Ok(())
    }
}
