//! Sync orchestrator
//!
//! Owns the options, drives scan → plan → execute, and aggregates the
//! immutable [`SyncResult`]. Fatal errors unwind immediately but carry
//! the partial result with them; cancellation is cooperative and marks
//! the run CANCELLED, distinct from DONE and ABORTED.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use volsync_scan::{scan_with_observer, ScanOptions, ScanReport};
use volsync_types::{
    ActionCounts, Entry, EntryFailure, Error, FingerprintAlgo, NoopObserver, RelPath, Result,
    RunState, SyncMode, SyncObserver, SyncOptions, SyncResult, SyncStatus, SyncSide,
};
use volsync_volume::{LocalVolume, VirtualVolume};

use crate::executor::execute;
use crate::planner::{plan, Plan, PlanInputs};
use crate::state::StateTracker;

/// A fatal error, carrying everything the run managed before it died.
#[derive(Debug, thiserror::Error)]
#[error("sync aborted: {error}")]
pub struct SyncAborted {
    /// The fatal cause.
    pub error: Error,
    /// The partial result, preserved for diagnostics.
    pub partial: SyncResult,
}

/// The synchronization engine.
///
/// Options are fixed for the engine's lifetime; each [`SyncEngine::sync`]
/// call is one independent run.
pub struct SyncEngine {
    options: SyncOptions,
    observer: Arc<dyn SyncObserver>,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create an engine with the given options.
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a progress observer.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The configured options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// A token that cancels the run cooperatively: the engine checks it
    /// between actions, lets in-flight transfers finish, and marks the
    /// result CANCELLED.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Reconcile `target` with `source` under `mode`.
    pub async fn sync(
        &self,
        source: Arc<dyn VirtualVolume>,
        target: Arc<dyn VirtualVolume>,
        mode: SyncMode,
    ) -> Result<SyncResult, SyncAborted> {
        let mut run = RunProgress::new(mode);
        let mut state = StateTracker::new(self.observer.as_ref());

        match self.drive(&source, &target, mode, &mut run, &mut state).await {
            Ok(SyncStatus::Cancelled) | Err(Error::Cancelled) => {
                let _ = state.advance(RunState::Cancelled);
                Ok(run.finish(SyncStatus::Cancelled))
            }
            Ok(status) => {
                let _ = state.advance(RunState::Done);
                let result = run.finish(status);
                info!(%result, "sync finished");
                Ok(result)
            }
            Err(error) => {
                let _ = state.advance(RunState::Aborted);
                Err(SyncAborted {
                    error,
                    partial: run.finish(SyncStatus::Aborted),
                })
            }
        }
    }

    async fn drive(
        &self,
        source: &Arc<dyn VirtualVolume>,
        target: &Arc<dyn VirtualVolume>,
        mode: SyncMode,
        run: &mut RunProgress,
        state: &mut StateTracker<'_>,
    ) -> Result<SyncStatus> {
        state.advance(RunState::ScanningSource)?;

        // the source must exist; a target may not, yet
        let source_root = source
            .stat(&RelPath::root())
            .await?
            .ok_or_else(|| Error::Scan {
                rel: RelPath::root(),
                message: format!("source {} does not exist", source.describe()),
            })?;

        let source_root_name = match base_name(&source.root_path()) {
            Some(name) => name,
            None if mode == SyncMode::Nest => {
                return Err(Error::invariant(
                    "NEST mode needs a source root with a base name",
                ))
            }
            None => String::new(),
        };

        let target_root = self
            .ensure_target_root(target, &source_root, mode, run)
            .await?;

        self.check_cancelled()?;

        info!(
            source = %source.describe(),
            target = %target.describe(),
            mode = mode.as_str(),
            delete = self.options.delete,
            "syncing"
        );

        // the two scans are independent I/O, joined at the planning
        // boundary
        let scan_options = ScanOptions {
            excludes: self.options.excludes.clone(),
            ..ScanOptions::default()
        };
        let source_scan = async {
            if source_root.is_dir() {
                scan_with_observer(
                    source,
                    &scan_options,
                    Some((self.observer.as_ref(), SyncSide::Source)),
                )
                .await
            } else {
                Ok(ScanReport::default())
            }
        };
        state.advance(RunState::ScanningTarget)?;
        let target_scan_options = ScanOptions::default();
        let target_scan = async {
            if target_root.as_ref().is_some_and(Entry::is_dir) {
                scan_with_observer(
                    target,
                    &target_scan_options,
                    Some((self.observer.as_ref(), SyncSide::Target)),
                )
                .await
            } else {
                Ok(ScanReport::default())
            }
        };
        let (source_report, target_report) = tokio::try_join!(source_scan, target_scan)?;
        run.errors.extend(source_report.failures);
        run.errors.extend(target_report.failures);

        self.check_cancelled()?;
        state.advance(RunState::Planning)?;

        let algo = self.negotiate_fingerprint(source, target).await?;
        debug!(%algo, "negotiated fingerprint algorithm");

        let inputs = PlanInputs {
            mode,
            source_root_name,
            source_root,
            source_entries: source_report.entries,
            target_root,
            target_entries: target_report.entries,
            algo,
        };
        let Plan {
            actions,
            failures,
            fingerprints_computed,
        } = plan(source, target, inputs, &self.options).await?;
        run.fingerprints += fingerprints_computed;
        for failure in &failures {
            self.observer.action_failed(failure);
        }
        run.errors.extend(failures);
        debug!(actions = actions.len(), "plan ready");
        if self.options.debug {
            for action in &actions {
                debug!(action = %action, reason = ?action.reason, "itemized");
            }
        }

        self.check_cancelled()?;
        state.advance(RunState::Executing)?;

        let outcome = execute(
            source,
            target,
            &actions,
            &self.options,
            self.observer.as_ref(),
            &self.cancel,
        )
        .await;
        run.counts.merge(&outcome.counts);
        run.bytes += outcome.bytes_transferred;
        run.errors.extend(outcome.failures);

        if let Some(fatal) = outcome.fatal {
            return Err(fatal);
        }
        if outcome.cancelled {
            return Ok(SyncStatus::Cancelled);
        }
        Ok(SyncStatus::Done)
    }

    /// Make sure the target root exists as a directory where the run
    /// needs one. Failures here are fatal: nothing can be synced into a
    /// root that cannot exist.
    async fn ensure_target_root(
        &self,
        target: &Arc<dyn VirtualVolume>,
        source_root: &Entry,
        mode: SyncMode,
        run: &mut RunProgress,
    ) -> Result<Option<Entry>> {
        let target_root = target.stat(&RelPath::root()).await?;
        let needs_dir = source_root.is_dir() || mode == SyncMode::Nest;
        if !needs_dir {
            return Ok(target_root);
        }

        match target_root {
            None => {
                if self.options.parents {
                    target.mkdirs(&RelPath::root()).await?;
                } else {
                    target.mkdir(&RelPath::root()).await?;
                }
                run.counts.dirs_created += 1;
                target.stat(&RelPath::root()).await
            }
            Some(entry) if !entry.is_dir() => {
                if !self.options.force {
                    return Err(Error::Conflict {
                        rel: RelPath::root(),
                        source_kind: source_root.kind,
                        target_kind: entry.kind,
                    });
                }
                target.remove_file(&RelPath::root()).await?;
                run.counts.files_deleted += 1;
                target.mkdir(&RelPath::root()).await?;
                run.counts.dirs_created += 1;
                target.stat(&RelPath::root()).await
            }
            some => Ok(some),
        }
    }

    async fn negotiate_fingerprint(
        &self,
        source: &Arc<dyn VirtualVolume>,
        target: &Arc<dyn VirtualVolume>,
    ) -> Result<FingerprintAlgo> {
        let mut source_supported = Vec::new();
        let mut target_supported = Vec::new();
        for &algo in &self.options.preferred_fingerprints {
            let on_source = source.supports_fingerprint(algo).await?;
            let on_target = target.supports_fingerprint(algo).await?;
            debug!(%algo, on_source, on_target, "fingerprint support");
            if on_source {
                source_supported.push(algo);
            }
            if on_target {
                target_supported.push(algo);
            }
            if on_source && on_target {
                return Ok(algo);
            }
        }
        Err(Error::FingerprintNegotiation {
            source_algos: source_supported,
            target: target_supported,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Synchronize two local directory trees.
pub async fn sync_local(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    mode: SyncMode,
    options: SyncOptions,
) -> Result<SyncResult, SyncAborted> {
    let engine = SyncEngine::new(options);
    let source: Arc<dyn VirtualVolume> = Arc::new(LocalVolume::new(source.as_ref()));
    let target: Arc<dyn VirtualVolume> = Arc::new(LocalVolume::new(target.as_ref()));
    engine.sync(source, target, mode).await
}

struct RunProgress {
    run_id: Uuid,
    mode: SyncMode,
    started: Instant,
    counts: ActionCounts,
    bytes: u64,
    fingerprints: u64,
    errors: Vec<EntryFailure>,
}

impl RunProgress {
    fn new(mode: SyncMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started: Instant::now(),
            counts: ActionCounts::default(),
            bytes: 0,
            fingerprints: 0,
            errors: Vec::new(),
        }
    }

    /// Freeze into the immutable result.
    fn finish(self, status: SyncStatus) -> SyncResult {
        SyncResult {
            run_id: self.run_id,
            mode: self.mode,
            status,
            counts: self.counts,
            bytes_transferred: self.bytes,
            fingerprints_computed: self.fingerprints,
            duration: self.started.elapsed(),
            errors: self.errors,
        }
    }
}

fn base_name(path: &str) -> Option<String> {
    let unified = path.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if name.is_empty() || name.ends_with(':') {
        None
    } else {
        Some(name.to_string())
    }
}
