//! Path mapping between source and target trees
//!
//! Mapping is a pure function of (mode, source root name, relative path)
//! and is invertible: for any target-relative path the planner can decide
//! whether a source entry could ever map there under the active mode.
//! That inversion is what makes delete-candidate detection safe — a
//! target entry outside the mapped space is never touched.

use volsync_types::{RelPath, Result, SyncMode};

/// Map a source-relative path to its target-relative path.
///
/// MERGE maps identically; the source root's own name never appears on
/// the target. NEST prefixes everything with the source root's name, so
/// the target gains exactly one new top-level entry.
pub fn map_source(mode: SyncMode, source_root_name: &str, source_rel: &RelPath) -> Result<RelPath> {
    match mode {
        SyncMode::Merge => Ok(source_rel.clone()),
        SyncMode::Nest => {
            let wrapper = RelPath::new(source_root_name)?;
            if source_rel.is_root() {
                Ok(wrapper)
            } else {
                wrapper.join(source_rel.as_str())
            }
        }
    }
}

/// Invert [`map_source`]: the source-relative path that would map to
/// `target_rel`, or `None` when no source entry could ever map there.
pub fn map_back(
    mode: SyncMode,
    source_root_name: &str,
    target_rel: &RelPath,
) -> Option<RelPath> {
    match mode {
        SyncMode::Merge => Some(target_rel.clone()),
        SyncMode::Nest => {
            let wrapper = RelPath::new(source_root_name).ok()?;
            if !target_rel.starts_with(&wrapper) {
                return None;
            }
            target_rel.strip_components(wrapper.depth()).or_else(|| {
                // the wrapper itself maps back to the source root
                (target_rel == &wrapper).then(RelPath::root)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    #[test]
    fn merge_is_identity() {
        let mapped = map_source(SyncMode::Merge, "proj", &rel("a/b.txt")).unwrap();
        assert_eq!(mapped, rel("a/b.txt"));
        assert_eq!(
            map_back(SyncMode::Merge, "proj", &mapped),
            Some(rel("a/b.txt"))
        );
    }

    #[test]
    fn nest_wraps_with_root_name() {
        let mapped = map_source(SyncMode::Nest, "proj", &rel("a/b.txt")).unwrap();
        assert_eq!(mapped, rel("proj/a/b.txt"));

        let root = map_source(SyncMode::Nest, "proj", &RelPath::root()).unwrap();
        assert_eq!(root, rel("proj"));
    }

    #[test]
    fn nest_inversion_rejects_outside_entries() {
        assert_eq!(
            map_back(SyncMode::Nest, "proj", &rel("proj/a")),
            Some(rel("a"))
        );
        assert_eq!(
            map_back(SyncMode::Nest, "proj", &rel("proj")),
            Some(RelPath::root())
        );
        assert_eq!(map_back(SyncMode::Nest, "proj", &rel("other/a")), None);
        assert_eq!(map_back(SyncMode::Nest, "proj", &rel("project/a")), None);
    }

    #[test]
    fn mapping_round_trips() {
        for mode in [SyncMode::Merge, SyncMode::Nest] {
            for path in ["x", "x/y", "deep/er/file.bin"] {
                let mapped = map_source(mode, "root", &rel(path)).unwrap();
                assert_eq!(map_back(mode, "root", &mapped), Some(rel(path)));
            }
        }
    }
}
