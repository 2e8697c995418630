//! Shared fixtures for integration tests

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;

use volsync_scan::{scan, ScanOptions};
use volsync_types::RelPath;
use volsync_volume::{LocalVolume, VirtualVolume};

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parents");
    }
    fs::write(path, content).expect("write file");
}

/// Read a file to a byte vector.
pub fn read_file(path: &Path) -> Vec<u8> {
    fs::read(path).expect("read file")
}

/// Pin a file's mtime to an exact second past the epoch, so quick-check
/// comparisons in tests are deterministic.
pub fn set_mtime(path: &Path, epoch_secs: u64) {
    let time = FileTime::from_system_time(UNIX_EPOCH + Duration::from_secs(epoch_secs));
    filetime::set_file_mtime(path, time).expect("set mtime");
}

/// A fixed timestamp comfortably in the past.
pub fn fixed_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Open a local volume over a directory.
pub fn local(path: &Path) -> Arc<dyn VirtualVolume> {
    Arc::new(LocalVolume::new(path))
}

/// Scan a directory and return its sorted relative paths.
pub async fn tree_paths(path: &Path) -> Vec<String> {
    let volume = local(path);
    let report = scan(&volume, &ScanOptions::default())
        .await
        .expect("scan tree");
    report
        .entries
        .iter()
        .map(|e| e.rel.as_str().to_string())
        .collect()
}

/// Parse a relative path, panicking on invalid test input.
pub fn rel(s: &str) -> RelPath {
    RelPath::new(s).expect("valid rel path")
}
