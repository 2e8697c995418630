//! Transfer executor
//!
//! Applies a plan in the order the planner produced it. Runs of
//! consecutive COPY/UPDATE actions execute concurrently, bounded by the
//! volumes' stream-capacity hints; MKDIR and DELETE are ordering barriers,
//! which is exactly the partial order the plan's guarantees require
//! (ancestors created before their contents, descendants deleted before
//! their directory).
//!
//! Entry-level failures never escape the loop: the partially written
//! target is removed best-effort and the failure recorded. Fatal failures
//! and cooperative cancellation stop the run between actions, preserving
//! everything applied so far.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use volsync_types::{
    ActionCounts, ActionKind, EntryFailure, EntryKind, Error, RelPath, Result, SyncAction,
    SyncObserver, SyncOptions,
};
use volsync_volume::VirtualVolume;

const COPY_BUFFER: usize = 64 * 1024;

/// What execution produced, complete or not.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    /// Successfully applied actions, by kind.
    pub counts: ActionCounts,
    /// File content bytes moved.
    pub bytes_transferred: u64,
    /// Per-entry failures, in plan order.
    pub failures: Vec<EntryFailure>,
    /// Whether cancellation stopped the run.
    pub cancelled: bool,
    /// The fatal error that stopped the run, if one did.
    pub fatal: Option<Error>,
}

/// Apply a plan's actions in order.
pub async fn execute(
    source: &Arc<dyn VirtualVolume>,
    target: &Arc<dyn VirtualVolume>,
    actions: &[SyncAction],
    options: &SyncOptions,
    observer: &dyn SyncObserver,
    cancel: &CancellationToken,
) -> ExecutionOutcome {
    let limit = source
        .max_concurrent_streams()
        .min(target.max_concurrent_streams())
        .max(1);
    let mut outcome = ExecutionOutcome::default();
    let mut index = 0;

    while index < actions.len() {
        // cancellation is checked between actions, never mid-stream
        if cancel.is_cancelled() {
            debug!("cancellation observed between actions");
            outcome.cancelled = true;
            return outcome;
        }

        let action = &actions[index];
        match action.kind {
            ActionKind::Skip => {
                observer.action_started(action);
                outcome.counts.record(action);
                observer.action_finished(action);
                index += 1;
            }
            ActionKind::Mkdir => {
                observer.action_started(action);
                let result = target.mkdir(&action.target_rel).await;
                record_single(&mut outcome, observer, options, action, result);
                if outcome.fatal.is_some() {
                    return outcome;
                }
                index += 1;
            }
            ActionKind::Delete => {
                observer.action_started(action);
                let result = if action.entry_kind == EntryKind::Dir {
                    target.remove_dir(&action.target_rel).await
                } else {
                    target.remove_file(&action.target_rel).await
                };
                record_single(&mut outcome, observer, options, action, result);
                if outcome.fatal.is_some() {
                    return outcome;
                }
                index += 1;
            }
            ActionKind::Copy | ActionKind::Update => {
                let run_len = actions[index..]
                    .iter()
                    .take_while(|a| matches!(a.kind, ActionKind::Copy | ActionKind::Update))
                    .count();
                let batch = &actions[index..index + run_len];

                // concurrent transfers; `buffered` keeps result order
                // aligned with plan order, so failure records stay
                // deterministic
                let results: Vec<Result<u64>> = stream::iter(
                    batch
                        .iter()
                        .map(|action| apply_transfer(source, target, action, options, observer)),
                )
                .buffered(limit)
                .collect()
                .await;

                for (action, result) in batch.iter().zip(results) {
                    match result {
                        Ok(bytes) => {
                            outcome.bytes_transferred += bytes;
                            outcome.counts.record(action);
                            log_applied(options, action);
                            observer.action_finished(action);
                        }
                        Err(error) if error.is_fatal() => {
                            outcome.fatal = Some(error);
                            return outcome;
                        }
                        Err(error) => {
                            let failure =
                                EntryFailure::new(action.target_rel.clone(), action.kind, error);
                            observer.action_failed(&failure);
                            outcome.failures.push(failure);
                        }
                    }
                }
                index += run_len;
            }
        }
    }

    outcome
}

fn record_single(
    outcome: &mut ExecutionOutcome,
    observer: &dyn SyncObserver,
    options: &SyncOptions,
    action: &SyncAction,
    result: Result<()>,
) {
    match result {
        Ok(()) => {
            outcome.counts.record(action);
            log_applied(options, action);
            observer.action_finished(action);
        }
        Err(error) if error.is_fatal() => {
            outcome.fatal = Some(error);
        }
        Err(error) => {
            let failure = EntryFailure::new(action.target_rel.clone(), action.kind, error);
            observer.action_failed(&failure);
            outcome.failures.push(failure);
        }
    }
}

fn log_applied(options: &SyncOptions, action: &SyncAction) {
    if options.verbose {
        info!(action = %action, "applied");
    } else {
        debug!(action = %action, "applied");
    }
}

async fn apply_transfer(
    source: &Arc<dyn VirtualVolume>,
    target: &Arc<dyn VirtualVolume>,
    action: &SyncAction,
    options: &SyncOptions,
    observer: &dyn SyncObserver,
) -> Result<u64> {
    observer.action_started(action);

    let source_rel = action
        .source_rel
        .as_ref()
        .ok_or_else(|| Error::invariant(format!("transfer action without source: {action}")))?;

    if action.entry_kind == EntryKind::Symlink {
        let link_target = source.read_link(source_rel).await?;
        if action.kind == ActionKind::Update {
            target.remove_file(&action.target_rel).await?;
        }
        target.make_symlink(&action.target_rel, &link_target).await?;
        restore_stat(target, action, options).await;
        return Ok(0);
    }

    let mut reader = source.open_read(source_rel).await?;
    let mut writer = target.open_write(&action.target_rel).await?;

    match stream_bytes(
        &mut reader,
        &mut writer,
        source_rel,
        &action.target_rel,
        action.size,
        options.progress,
        observer,
    )
    .await
    {
        Ok(bytes) => {
            drop(reader);
            drop(writer);
            restore_stat(target, action, options).await;
            Ok(bytes)
        }
        Err(error) => {
            drop(reader);
            drop(writer);
            // never leave a half-written target behind
            if let Err(cleanup) = target.remove_file(&action.target_rel).await {
                warn!(rel = %action.target_rel, %cleanup, "failed to remove partial target");
            }
            Err(error)
        }
    }
}

async fn stream_bytes<R, W>(
    reader: &mut R,
    writer: &mut W,
    source_rel: &RelPath,
    target_rel: &RelPath,
    total: u64,
    progress: bool,
    observer: &dyn SyncObserver,
) -> Result<u64>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
    W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut bytes = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| Error::Io {
            rel: source_rel.clone(),
            message: format!("read failed: {e}"),
        })?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await.map_err(|e| Error::Io {
            rel: target_rel.clone(),
            message: format!("write failed: {e}"),
        })?;
        bytes += n as u64;
        if progress {
            observer.bytes_transferred(target_rel, bytes, total);
        }
    }
    writer.shutdown().await.map_err(|e| Error::Io {
        rel: target_rel.clone(),
        message: format!("flush failed: {e}"),
    })?;
    Ok(bytes)
}

/// Restore mtime/permissions after a successful transfer. Best effort:
/// the content arrived, a stat restore failure is only worth a warning.
async fn restore_stat(
    target: &Arc<dyn VirtualVolume>,
    action: &SyncAction,
    options: &SyncOptions,
) {
    if !options.preserve_times || action.entry_kind == EntryKind::Symlink {
        return;
    }
    if let Some(mtime) = action.mtime {
        if let Err(error) = target.set_stat(&action.target_rel, mtime, action.perms).await {
            warn!(rel = %action.target_rel, %error, "could not restore stat");
        }
    }
}
