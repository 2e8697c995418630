//! Plan actions
//!
//! A plan is an ordered sequence of [`SyncAction`]s. The ordering rules
//! live in the planner; an action itself carries everything the executor
//! needs to apply it without consulting the trees again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::entry::EntryKind;
use crate::path::RelPath;

/// What an action does to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    /// Create a directory.
    Mkdir,
    /// Create a file or symlink that does not exist on the target.
    Copy,
    /// Replace the content of an existing target entry.
    Update,
    /// Remove a target entry.
    Delete,
    /// No I/O; the pair is already in sync.
    Skip,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mkdir => f.write_str("mkdir"),
            Self::Copy => f.write_str("copy"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
            Self::Skip => f.write_str("skip"),
        }
    }
}

/// Why an action was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionReason {
    /// The entry does not exist on the target.
    Missing,
    /// Sizes differ, content must be transferred.
    SizeChanged,
    /// Sizes match but the content fingerprints differ.
    FingerprintChanged,
    /// Symlink targets differ.
    SymlinkChanged,
    /// The target entry had a different type and `force` is set.
    TypeMismatch,
    /// Size and mtime match; content assumed identical without reading it.
    QuickCheck,
    /// Fingerprints (or link targets) proved the pair identical.
    UpToDate,
    /// The entry exists only on the target and `delete` is set.
    Extraneous,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAction {
    /// What to do.
    pub kind: ActionKind,
    /// Source-relative path feeding the action, when one exists.
    pub source_rel: Option<RelPath>,
    /// Target-relative path the action applies to.
    pub target_rel: RelPath,
    /// Type of the entry being created, replaced or removed.
    pub entry_kind: EntryKind,
    /// Why the action was planned.
    pub reason: ActionReason,
    /// Bytes expected to move. Zero for everything but file copies.
    pub size: u64,
    /// Source modification time, restored on the target after transfer.
    pub mtime: Option<SystemTime>,
    /// Source permission bits, restored where the target supports them.
    pub perms: Option<u32>,
}

impl SyncAction {
    /// A directory creation.
    pub fn mkdir(source_rel: Option<RelPath>, target_rel: RelPath, reason: ActionReason) -> Self {
        Self {
            kind: ActionKind::Mkdir,
            source_rel,
            target_rel,
            entry_kind: EntryKind::Dir,
            reason,
            size: 0,
            mtime: None,
            perms: None,
        }
    }

    /// A fresh copy of a file or symlink.
    pub fn copy(
        source_rel: RelPath,
        target_rel: RelPath,
        entry_kind: EntryKind,
        size: u64,
        reason: ActionReason,
    ) -> Self {
        Self {
            kind: ActionKind::Copy,
            source_rel: Some(source_rel),
            target_rel,
            entry_kind,
            reason,
            size,
            mtime: None,
            perms: None,
        }
    }

    /// An in-place content replacement.
    pub fn update(
        source_rel: RelPath,
        target_rel: RelPath,
        entry_kind: EntryKind,
        size: u64,
        reason: ActionReason,
    ) -> Self {
        Self {
            kind: ActionKind::Update,
            source_rel: Some(source_rel),
            target_rel,
            entry_kind,
            reason,
            size,
            mtime: None,
            perms: None,
        }
    }

    /// A target-entry removal.
    pub fn delete(target_rel: RelPath, entry_kind: EntryKind, reason: ActionReason) -> Self {
        Self {
            kind: ActionKind::Delete,
            source_rel: None,
            target_rel,
            entry_kind,
            reason,
            size: 0,
            mtime: None,
            perms: None,
        }
    }

    /// A no-op for an already-synchronized pair.
    pub fn skip(
        source_rel: RelPath,
        target_rel: RelPath,
        entry_kind: EntryKind,
        reason: ActionReason,
    ) -> Self {
        Self {
            kind: ActionKind::Skip,
            source_rel: Some(source_rel),
            target_rel,
            entry_kind,
            reason,
            size: 0,
            mtime: None,
            perms: None,
        }
    }

    /// Attach the source stat to restore after transfer.
    pub fn with_stat(mut self, mtime: SystemTime, perms: Option<u32>) -> Self {
        self.mtime = Some(mtime);
        self.perms = perms;
        self
    }

    /// Whether this action moves file bytes.
    pub fn transfers_content(&self) -> bool {
        matches!(self.kind, ActionKind::Copy | ActionKind::Update) && self.entry_kind == EntryKind::File
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.target_rel)
    }
}
