//! Scan entries
//!
//! An [`Entry`] is what the tree scanner produces for every file, directory
//! and symlink it finds: the relative path plus the metadata the planner
//! needs for quick-check and ordering decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::fingerprint::Fingerprint;
use crate::path::RelPath;
use crate::result::EntryFailure;

/// Allowed modification-time difference for the quick-check.
///
/// Filesystems differ in timestamp precision (FAT stores 2-second
/// granularity, some SFTP servers truncate to whole seconds), so two
/// mtimes within this window count as equal.
pub const MTIME_TOLERANCE: Duration = Duration::from_secs(2);

/// The type of a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// A symbolic link. Recorded, never followed.
    Symlink,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Dir => f.write_str("directory"),
            Self::Symlink => f.write_str("symlink"),
        }
    }
}

/// One scanned file, directory or symlink.
///
/// Unique by [`Entry::rel`] within a single scan. Created by scanning,
/// consumed by planning, discarded afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Path relative to the scanned root.
    pub rel: RelPath,
    /// Entry type.
    pub kind: EntryKind,
    /// Size in bytes. Zero for directories.
    pub size: u64,
    /// Modification time.
    pub mtime: SystemTime,
    /// Permission bits, when the backend reports them.
    pub perms: Option<u32>,
    /// Content fingerprint, filled in lazily during planning.
    pub fingerprint: Option<Fingerprint>,
}

impl Entry {
    /// Create a new entry without permissions or fingerprint.
    pub fn new(rel: RelPath, kind: EntryKind, size: u64, mtime: SystemTime) -> Self {
        Self {
            rel,
            kind,
            size,
            mtime,
            perms: None,
            fingerprint: None,
        }
    }

    /// Attach permission bits.
    pub fn with_perms(mut self, perms: u32) -> Self {
        self.perms = Some(perms);
        self
    }

    /// Attach a content fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Whether this entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Whether this entry is a symlink.
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Whether the modification times match within [`MTIME_TOLERANCE`].
    pub fn mtime_matches(&self, other: &Self) -> bool {
        let delta = match self.mtime.duration_since(other.mtime) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        delta <= MTIME_TOLERANCE
    }
}

/// One directory worth of listing output.
///
/// Children that vanished or were unreadable between the listing and the
/// per-entry stat are non-fatal and reported in `failures`.
#[derive(Debug, Clone, Default)]
pub struct DirListing {
    /// Successfully listed children.
    pub entries: Vec<Entry>,
    /// Children that could not be read.
    pub failures: Vec<EntryFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn mtime_tolerance_window() {
        let base = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let a = Entry::new(RelPath::new("f").unwrap(), EntryKind::File, 10, base);
        let close = Entry::new(
            RelPath::new("f").unwrap(),
            EntryKind::File,
            10,
            base + Duration::from_secs(2),
        );
        let far = Entry::new(
            RelPath::new("f").unwrap(),
            EntryKind::File,
            10,
            base + Duration::from_secs(3),
        );
        assert!(a.mtime_matches(&close));
        assert!(close.mtime_matches(&a));
        assert!(!a.mtime_matches(&far));
    }
}
