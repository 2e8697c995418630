//! Diff / planner
//!
//! Pairs mapped source entries with scanned target entries and produces
//! an ordered action plan. The ordering guarantees are what make
//! execution deterministic and replayable:
//!
//! - creates are sorted by (depth, lexicographic), so every MKDIR
//!   precedes any COPY/UPDATE inside that directory
//! - a forced type-mismatch replacement inlines its DELETEs (post-order
//!   for directories) immediately before the replacing action
//! - extraneous DELETEs come last, deepest first, so descendants are
//!   removed before their directory
//!
//! Content decisions follow the rsync quick-check: matching size and
//! mtime means the pair is assumed identical without reading a byte
//! (deliberately optimistic); everything else is settled by fingerprints,
//! resolved in batches at the end of the pairing pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use volsync_fingerprint::digest_reader;
use volsync_types::{
    ActionKind, ActionReason, Entry, EntryFailure, EntryKind, Error, Fingerprint, FingerprintAlgo,
    RelPath, Result, SyncAction, SyncMode, SyncOptions,
};
use volsync_volume::VirtualVolume;

use crate::mapper::{map_back, map_source};

/// Everything the planner needs from the scan phase.
#[derive(Debug)]
pub struct PlanInputs {
    /// Active sync mode.
    pub mode: SyncMode,
    /// Base name of the source root (the NEST wrapper name).
    pub source_root_name: String,
    /// The source root entry itself (a directory, or a file for
    /// single-file syncs).
    pub source_root: Entry,
    /// Scanned source entries, any order.
    pub source_entries: Vec<Entry>,
    /// The target root entry, when it exists.
    pub target_root: Option<Entry>,
    /// Scanned target entries, any order.
    pub target_entries: Vec<Entry>,
    /// The negotiated fingerprint algorithm.
    pub algo: FingerprintAlgo,
}

/// The ordered action plan plus planning-time per-entry failures.
#[derive(Debug, Default)]
pub struct Plan {
    /// Actions in execution order.
    pub actions: Vec<SyncAction>,
    /// Pairs that could not be planned (conflicts, missing parents).
    pub failures: Vec<EntryFailure>,
    /// Fingerprints computed or fetched while deciding UPDATE vs SKIP.
    pub fingerprints_computed: u64,
}

impl Plan {
    /// Number of actions that would modify the target.
    pub fn change_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind != ActionKind::Skip)
            .count()
    }
}

struct MappedSource {
    entry: Entry,
    target_rel: RelPath,
    key: String,
}

struct DeferredPair {
    source: Entry,
    target: Entry,
}

/// Build the plan for one run.
///
/// Needs the volumes only to resolve fingerprints (and symlink targets)
/// for pairs the quick-check cannot settle; everything else is pure.
pub async fn plan(
    source_volume: &Arc<dyn VirtualVolume>,
    target_volume: &Arc<dyn VirtualVolume>,
    inputs: PlanInputs,
    options: &SyncOptions,
) -> Result<Plan> {
    let fold = !target_volume.case_sensitive();
    let key_of =
        |rel: &RelPath| -> String { if fold { rel.fold_case() } else { rel.as_str().to_owned() } };

    let mut target_map = build_target_map(&inputs, &key_of)?;
    let mapped = map_sources(&inputs, &key_of)?;

    let mut plan = Plan::default();
    // target keys guaranteed to exist as directories once the plan ran
    let mut planned_dirs: HashSet<String> = HashSet::new();
    // target keys whose planning failed; descendants cascade
    let mut failed: HashSet<String> = HashSet::new();
    let mut deferred: Vec<DeferredPair> = Vec::new();

    for m in &mapped {
        let key = &m.key;
        let source = &m.entry;
        let target_rel = &m.target_rel;

        // parent must exist, be planned, or be creatable
        if let Some(parent) = target_rel.parent() {
            if !parent.is_root() {
                let parent_key = key_of(&parent);
                if failed.contains(&parent_key) {
                    record_failure(
                        &mut plan,
                        &mut failed,
                        key,
                        target_rel.clone(),
                        action_kind_for(source),
                        Error::ParentMissing {
                            rel: target_rel.clone(),
                        },
                    );
                    continue;
                }
                let parent_is_dir = planned_dirs.contains(&parent_key)
                    || target_map.get(&parent_key).is_some_and(Entry::is_dir);
                if !parent_is_dir {
                    if options.parents {
                        plan_parent_chain(
                            &mut plan,
                            &mut planned_dirs,
                            &target_map,
                            &key_of,
                            &parent,
                        );
                    } else {
                        record_failure(
                            &mut plan,
                            &mut failed,
                            key,
                            target_rel.clone(),
                            action_kind_for(source),
                            Error::ParentMissing {
                                rel: target_rel.clone(),
                            },
                        );
                        continue;
                    }
                }
            }
        }

        match target_map.remove(key) {
            None => {
                trace!(target = %target_rel, "target entry missing (new)");
                match source.kind {
                    EntryKind::Dir => {
                        plan.actions.push(SyncAction::mkdir(
                            Some(source.rel.clone()),
                            target_rel.clone(),
                            ActionReason::Missing,
                        ));
                        planned_dirs.insert(key.clone());
                    }
                    EntryKind::File | EntryKind::Symlink => {
                        plan.actions.push(
                            SyncAction::copy(
                                source.rel.clone(),
                                target_rel.clone(),
                                source.kind,
                                source.size,
                                ActionReason::Missing,
                            )
                            .with_stat(source.mtime, source.perms),
                        );
                    }
                }
            }
            Some(target) if target.kind != source.kind => {
                if !options.force {
                    debug!(
                        target = %target.rel,
                        source_kind = %source.kind,
                        target_kind = %target.kind,
                        "type mismatch without force"
                    );
                    record_failure(
                        &mut plan,
                        &mut failed,
                        key,
                        target.rel.clone(),
                        action_kind_for(source),
                        Error::Conflict {
                            rel: target.rel.clone(),
                            source_kind: source.kind,
                            target_kind: target.kind,
                        },
                    );
                    continue;
                }
                plan_forced_replacement(
                    &mut plan,
                    &mut planned_dirs,
                    &mut target_map,
                    &key_of,
                    source,
                    &target,
                    target_rel,
                    key,
                );
            }
            Some(target) => match source.kind {
                EntryKind::Dir => {
                    plan.actions.push(SyncAction::skip(
                        source.rel.clone(),
                        target.rel.clone(),
                        EntryKind::Dir,
                        ActionReason::UpToDate,
                    ));
                    planned_dirs.insert(key.clone());
                }
                EntryKind::File => {
                    plan_file_pair(&mut plan, &mut deferred, options, source, target);
                }
                EntryKind::Symlink => {
                    plan_symlink_pair(
                        &mut plan,
                        source_volume,
                        target_volume,
                        source,
                        &target,
                    )
                    .await;
                }
            },
        }
    }

    resolve_deferred(
        &mut plan,
        source_volume,
        target_volume,
        deferred,
        inputs.algo,
        options,
    )
    .await?;

    if options.delete {
        plan_extraneous_deletes(&mut plan, &inputs, target_map);
    }

    Ok(plan)
}

fn build_target_map(
    inputs: &PlanInputs,
    key_of: &impl Fn(&RelPath) -> String,
) -> Result<HashMap<String, Entry>> {
    let mut map = HashMap::with_capacity(inputs.target_entries.len() + 1);
    if let Some(root) = &inputs.target_root {
        map.insert(key_of(&root.rel), root.clone());
    }
    for entry in &inputs.target_entries {
        if let Some(previous) = map.insert(key_of(&entry.rel), entry.clone()) {
            // two target entries folding onto one key cannot be paired
            return Err(Error::invariant(format!(
                "target entries '{}' and '{}' collide under case folding",
                previous.rel, entry.rel
            )));
        }
    }
    Ok(map)
}

fn map_sources(
    inputs: &PlanInputs,
    key_of: &impl Fn(&RelPath) -> String,
) -> Result<Vec<MappedSource>> {
    let mut seen: HashMap<String, RelPath> = HashMap::new();
    let mut mapped = Vec::with_capacity(inputs.source_entries.len() + 1);

    for entry in std::iter::once(&inputs.source_root).chain(inputs.source_entries.iter()) {
        let target_rel = map_source(inputs.mode, &inputs.source_root_name, &entry.rel)?;
        let key = key_of(&target_rel);
        if let Some(previous) = seen.insert(key.clone(), entry.rel.clone()) {
            return Err(Error::invariant(format!(
                "source paths '{previous}' and '{}' both map to target '{target_rel}'",
                entry.rel
            )));
        }
        mapped.push(MappedSource {
            entry: entry.clone(),
            target_rel,
            key,
        });
    }

    // total order: depth first, lexicographic tie-break
    mapped.sort_by(|a, b| {
        a.target_rel
            .depth()
            .cmp(&b.target_rel.depth())
            .then_with(|| a.target_rel.cmp(&b.target_rel))
    });
    Ok(mapped)
}

fn action_kind_for(source: &Entry) -> ActionKind {
    if source.is_dir() {
        ActionKind::Mkdir
    } else {
        ActionKind::Copy
    }
}

fn record_failure(
    plan: &mut Plan,
    failed: &mut HashSet<String>,
    key: &str,
    rel: RelPath,
    action: ActionKind,
    error: Error,
) {
    failed.insert(key.to_owned());
    plan.failures.push(EntryFailure::new(rel, action, error));
}

/// Plan MKDIRs for every missing ancestor of `parent`, outermost first.
fn plan_parent_chain(
    plan: &mut Plan,
    planned_dirs: &mut HashSet<String>,
    target_map: &HashMap<String, Entry>,
    key_of: &impl Fn(&RelPath) -> String,
    parent: &RelPath,
) {
    let mut chain = Vec::new();
    let mut cursor = Some(parent.clone());
    while let Some(dir) = cursor {
        if dir.is_root() {
            break;
        }
        let key = key_of(&dir);
        if planned_dirs.contains(&key) || target_map.get(&key).is_some_and(Entry::is_dir) {
            break;
        }
        cursor = dir.parent();
        chain.push((dir, key));
    }
    for (dir, key) in chain.into_iter().rev() {
        plan.actions
            .push(SyncAction::mkdir(None, dir, ActionReason::Missing));
        planned_dirs.insert(key);
    }
}

/// With `force` set, a type mismatch becomes delete-then-recreate. A
/// directory target loses its scanned descendants first, post-order.
#[allow(clippy::too_many_arguments)]
fn plan_forced_replacement(
    plan: &mut Plan,
    planned_dirs: &mut HashSet<String>,
    target_map: &mut HashMap<String, Entry>,
    key_of: &impl Fn(&RelPath) -> String,
    source: &Entry,
    target: &Entry,
    target_rel: &RelPath,
    key: &str,
) {
    debug!(target = %target.rel, "forcing replacement of type-mismatched entry");

    if target.is_dir() {
        let mut descendants: Vec<Entry> = target_map
            .values()
            .filter(|e| e.rel.starts_with(&target.rel))
            .cloned()
            .collect();
        for descendant in &descendants {
            target_map.remove(&key_of(&descendant.rel));
        }
        descendants.sort_by(|a, b| {
            b.rel
                .depth()
                .cmp(&a.rel.depth())
                .then_with(|| b.rel.cmp(&a.rel))
        });
        for descendant in descendants {
            plan.actions.push(SyncAction::delete(
                descendant.rel.clone(),
                descendant.kind,
                ActionReason::TypeMismatch,
            ));
        }
    }
    plan.actions.push(SyncAction::delete(
        target.rel.clone(),
        target.kind,
        ActionReason::TypeMismatch,
    ));

    match source.kind {
        EntryKind::Dir => {
            plan.actions.push(SyncAction::mkdir(
                Some(source.rel.clone()),
                target_rel.clone(),
                ActionReason::TypeMismatch,
            ));
            planned_dirs.insert(key.to_owned());
        }
        EntryKind::File | EntryKind::Symlink => {
            plan.actions.push(
                SyncAction::copy(
                    source.rel.clone(),
                    target_rel.clone(),
                    source.kind,
                    source.size,
                    ActionReason::TypeMismatch,
                )
                .with_stat(source.mtime, source.perms),
            );
        }
    }
}

/// Quick-check a file pair; defer to fingerprints when inconclusive.
fn plan_file_pair(
    plan: &mut Plan,
    deferred: &mut Vec<DeferredPair>,
    options: &SyncOptions,
    source: &Entry,
    target: Entry,
) {
    if source.size != target.size {
        trace!(rel = %target.rel, source_size = source.size, target_size = target.size, "size changed");
        plan.actions.push(
            SyncAction::update(
                source.rel.clone(),
                target.rel.clone(),
                EntryKind::File,
                source.size,
                ActionReason::SizeChanged,
            )
            .with_stat(source.mtime, source.perms),
        );
        return;
    }

    if !options.ignore_times && source.mtime_matches(&target) {
        // classic rsync optimization: same size, same mtime, assume
        // identical without reading content
        plan.actions.push(SyncAction::skip(
            source.rel.clone(),
            target.rel.clone(),
            EntryKind::File,
            ActionReason::QuickCheck,
        ));
        return;
    }

    deferred.push(DeferredPair {
        source: source.clone(),
        target,
    });
}

/// Symlink pairs compare link targets instead of content.
async fn plan_symlink_pair(
    plan: &mut Plan,
    source_volume: &Arc<dyn VirtualVolume>,
    target_volume: &Arc<dyn VirtualVolume>,
    source: &Entry,
    target: &Entry,
) {
    let source_target = match source_volume.read_link(&source.rel).await {
        Ok(t) => t,
        Err(error) => {
            plan.failures
                .push(EntryFailure::new(source.rel.clone(), ActionKind::Update, error));
            return;
        }
    };
    let target_target = match target_volume.read_link(&target.rel).await {
        Ok(t) => t,
        Err(error) => {
            plan.failures
                .push(EntryFailure::new(target.rel.clone(), ActionKind::Update, error));
            return;
        }
    };

    if source_target == target_target {
        plan.actions.push(SyncAction::skip(
            source.rel.clone(),
            target.rel.clone(),
            EntryKind::Symlink,
            ActionReason::UpToDate,
        ));
    } else {
        plan.actions.push(
            SyncAction::update(
                source.rel.clone(),
                target.rel.clone(),
                EntryKind::Symlink,
                0,
                ActionReason::SymlinkChanged,
            )
            .with_stat(source.mtime, source.perms),
        );
    }
}

/// Resolve quick-check-inconclusive pairs with content fingerprints, in
/// bounded batches so remote volumes answer many files per round trip.
async fn resolve_deferred(
    plan: &mut Plan,
    source_volume: &Arc<dyn VirtualVolume>,
    target_volume: &Arc<dyn VirtualVolume>,
    deferred: Vec<DeferredPair>,
    algo: FingerprintAlgo,
    options: &SyncOptions,
) -> Result<()> {
    if deferred.is_empty() {
        return Ok(());
    }
    debug!(pairs = deferred.len(), %algo, "resolving deferred pairs by fingerprint");

    let batch_size = options.max_deferred_fingerprints.max(1);
    for batch in deferred.chunks(batch_size) {
        let source_rels: Vec<RelPath> = batch.iter().map(|p| p.source.rel.clone()).collect();
        let target_rels: Vec<RelPath> = batch.iter().map(|p| p.target.rel.clone()).collect();

        let source_fps =
            fetch_fingerprints(plan, source_volume, &source_rels, algo).await?;
        let target_fps =
            fetch_fingerprints(plan, target_volume, &target_rels, algo).await?;

        for (pair, (source_fp, target_fp)) in
            batch.iter().zip(source_fps.into_iter().zip(target_fps))
        {
            let (Some(source_fp), Some(target_fp)) = (source_fp, target_fp) else {
                // the fetch already recorded why
                continue;
            };
            if source_fp == target_fp {
                plan.actions.push(SyncAction::skip(
                    pair.source.rel.clone(),
                    pair.target.rel.clone(),
                    EntryKind::File,
                    ActionReason::UpToDate,
                ));
            } else {
                trace!(rel = %pair.target.rel, %source_fp, %target_fp, "fingerprint mismatch");
                plan.actions.push(
                    SyncAction::update(
                        pair.source.rel.clone(),
                        pair.target.rel.clone(),
                        EntryKind::File,
                        pair.source.size,
                        ActionReason::FingerprintChanged,
                    )
                    .with_stat(pair.source.mtime, pair.source.perms),
                );
            }
        }
    }
    Ok(())
}

/// Fetch fingerprints for a batch, falling back to stream-and-hash for
/// paths the volume reports as unsupported. Per-entry failures are
/// recorded and yield `None`.
async fn fetch_fingerprints(
    plan: &mut Plan,
    volume: &Arc<dyn VirtualVolume>,
    rels: &[RelPath],
    algo: FingerprintAlgo,
) -> Result<Vec<Option<Fingerprint>>> {
    let native = volume.fingerprints(rels, algo).await?;
    let mut out = Vec::with_capacity(native.len());

    for (rel, fingerprint) in native {
        match fingerprint {
            Some(fp) => {
                plan.fingerprints_computed += 1;
                out.push(Some(fp));
            }
            None => {
                // unsupported natively: stream the bytes and hash here
                let streamed = match volume.open_read(&rel).await {
                    Ok(reader) => digest_reader(algo, &rel, reader).await,
                    Err(error) => Err(error),
                };
                match streamed {
                    Ok(fp) => {
                        plan.fingerprints_computed += 1;
                        out.push(Some(fp));
                    }
                    Err(error) if !error.is_fatal() => {
                        plan.failures.push(EntryFailure::new(
                            rel,
                            ActionKind::Update,
                            error,
                        ));
                        out.push(None);
                    }
                    Err(error) => return Err(error),
                }
            }
        }
    }
    Ok(out)
}

/// Entries present only on the target become DELETEs, deepest first —
/// but only where the mapping proves a source counterpart could exist.
fn plan_extraneous_deletes(
    plan: &mut Plan,
    inputs: &PlanInputs,
    target_map: HashMap<String, Entry>,
) {
    let mut leftovers: Vec<Entry> = target_map
        .into_values()
        .filter(|e| !e.rel.is_root())
        .filter(|e| map_back(inputs.mode, &inputs.source_root_name, &e.rel).is_some())
        .collect();

    leftovers.sort_by(|a, b| {
        b.rel
            .depth()
            .cmp(&a.rel.depth())
            .then_with(|| b.rel.cmp(&a.rel))
    });

    for entry in leftovers {
        plan.actions.push(SyncAction::delete(
            entry.rel.clone(),
            entry.kind,
            ActionReason::Extraneous,
        ));
    }
}
