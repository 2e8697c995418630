//! Normalized relative paths
//!
//! Every volume operation, scan entry and plan action is keyed by a
//! [`RelPath`]: a `/`-separated path relative to a volume root. Normalizing
//! at the type boundary keeps backend path quirks (backslashes, duplicate
//! separators, `.` segments) out of the diff engine entirely.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A normalized relative path within a volume.
///
/// Invariants: `/`-separated, never absolute, never contains `.` or `..`
/// components, never contains backslashes. The empty path is the volume
/// root itself. Ordering is lexicographic by bytes, which is what gives
/// scans and plans their stable, repeatable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(String);

impl RelPath {
    /// The volume root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and normalize a relative path.
    ///
    /// Backslashes are treated as separators, empty and `.` components are
    /// dropped. Absolute paths (leading separator or a drive letter) and
    /// paths containing `..` are rejected: allowing either would let a plan
    /// escape the synchronized root.
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref().replace('\\', "/");

        if raw.starts_with('/') {
            return Err(Error::InvalidPath {
                path: raw,
                reason: "absolute paths are not allowed".into(),
            });
        }
        if raw.len() >= 2 && raw.as_bytes()[1] == b':' {
            return Err(Error::InvalidPath {
                path: raw,
                reason: "drive-letter paths are not allowed".into(),
            });
        }

        let mut parts: Vec<&str> = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(Error::InvalidPath {
                        path: raw.clone(),
                        reason: "parent components are not allowed".into(),
                    })
                }
                other => parts.push(other),
            }
        }

        Ok(Self(parts.join("/")))
    }

    /// Whether this is the volume root.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path as a `/`-separated string. Empty for the root.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a child path (one or more components).
    pub fn join(&self, child: impl AsRef<str>) -> Result<Self> {
        if self.is_root() {
            Self::new(child)
        } else {
            Self::new(format!("{}/{}", self.0, child.as_ref()))
        }
    }

    /// The parent path. `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(pos) => Some(Self(self.0[..pos].to_string())),
            None => Some(Self::root()),
        }
    }

    /// The final component. `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(pos) => Some(&self.0[pos + 1..]),
            None => Some(&self.0),
        }
    }

    /// Number of components. Zero for the root.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count() + 1
        }
    }

    /// Iterate the components in order.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Whether `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0
            || (self.0.len() > prefix.0.len()
                && self.0.starts_with(&prefix.0)
                && self.0.as_bytes()[prefix.0.len()] == b'/')
    }

    /// Drop the first `count` leading components.
    ///
    /// Returns `None` when the path does not extend past the stripped
    /// prefix (such entries have no name left to keep).
    pub fn strip_components(&self, count: usize) -> Option<Self> {
        if count == 0 {
            return Some(self.clone());
        }
        let mut rest = self.0.as_str();
        for _ in 0..count {
            match rest.find('/') {
                Some(pos) => rest = &rest[pos + 1..],
                None => return None,
            }
        }
        Some(Self(rest.to_string()))
    }

    /// The case-folded form used as a pairing key on case-insensitive
    /// targets.
    pub fn fold_case(&self) -> String {
        self.0.to_lowercase()
    }

    /// Resolve against a local filesystem root.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        if self.is_root() {
            root.to_path_buf()
        } else {
            let mut out = root.to_path_buf();
            for part in self.components() {
                out.push(part);
            }
            out
        }
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_dots() {
        let rel = RelPath::new("a\\b//./c").unwrap();
        assert_eq!(rel.as_str(), "a/b/c");
        assert_eq!(rel.depth(), 3);
    }

    #[test]
    fn rejects_escapes() {
        assert!(RelPath::new("/etc/passwd").is_err());
        assert!(RelPath::new("a/../b").is_err());
        assert!(RelPath::new("C:/temp").is_err());
    }

    #[test]
    fn parent_and_file_name() {
        let rel = RelPath::new("a/b/c").unwrap();
        assert_eq!(rel.file_name(), Some("c"));
        assert_eq!(rel.parent().unwrap().as_str(), "a/b");
        assert_eq!(RelPath::new("a").unwrap().parent(), Some(RelPath::root()));
        assert_eq!(RelPath::root().parent(), None);
    }

    #[test]
    fn starts_with_is_component_aware() {
        let ab = RelPath::new("a/b").unwrap();
        let abc = RelPath::new("a/b/c").unwrap();
        let abx = RelPath::new("a/bx").unwrap();
        assert!(abc.starts_with(&ab));
        assert!(ab.starts_with(&ab));
        assert!(!abx.starts_with(&ab));
        assert!(abx.starts_with(&RelPath::root()));
    }

    #[test]
    fn strip_components_drops_prefix() {
        let rel = RelPath::new("a/b/c").unwrap();
        assert_eq!(rel.strip_components(1).unwrap().as_str(), "b/c");
        assert_eq!(rel.strip_components(3), None);
        assert_eq!(RelPath::new("a").unwrap().strip_components(1), None);
    }

    #[test]
    fn serializes_as_a_plain_string() {
        let rel = RelPath::new("a/b").unwrap();
        assert_eq!(serde_json::to_string(&rel).unwrap(), "\"a/b\"");
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut rels = vec![
            RelPath::new("b").unwrap(),
            RelPath::new("a/z").unwrap(),
            RelPath::new("a").unwrap(),
        ];
        rels.sort();
        let strs: Vec<&str> = rels.iter().map(RelPath::as_str).collect();
        assert_eq!(strs, vec!["a", "a/z", "b"]);
    }
}
