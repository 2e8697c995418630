//! Local filesystem volume

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use volsync_fingerprint::digest_reader;
use volsync_types::{
    ActionKind, DirListing, Entry, EntryFailure, EntryKind, Error, Fingerprint, FingerprintAlgo,
    RelPath, Result,
};

use crate::{VirtualVolume, VolumeKind, VolumeReader, VolumeWriter};

/// A directory tree on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    root: PathBuf,
    streams: usize,
}

impl LocalVolume {
    /// Open a volume rooted at `root`. The root itself does not have to
    /// exist yet (it may be the target of the sync).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            streams: num_cpus::get().clamp(1, 8),
        }
    }

    /// Override the concurrency-capacity hint.
    pub fn with_max_streams(mut self, streams: usize) -> Self {
        self.streams = streams.max(1);
        self
    }

    /// The configured root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fs_path(&self, rel: &RelPath) -> PathBuf {
        rel.to_fs_path(&self.root)
    }

    fn map_io(rel: &RelPath, err: &std::io::Error) -> Error {
        match err.kind() {
            ErrorKind::NotFound => Error::Vanished { rel: rel.clone() },
            ErrorKind::PermissionDenied => Error::PermissionDenied { rel: rel.clone() },
            _ => Error::Io {
                rel: rel.clone(),
                message: err.to_string(),
            },
        }
    }

    fn entry_from_metadata(rel: RelPath, metadata: &std::fs::Metadata) -> Option<Entry> {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            return None;
        };

        let size = if kind == EntryKind::File {
            metadata.len()
        } else {
            0
        };
        let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);

        let mut entry = Entry::new(rel, kind, size, mtime);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            entry = entry.with_perms(metadata.permissions().mode() & 0o7777);
        }
        Some(entry)
    }
}

#[async_trait]
impl VirtualVolume for LocalVolume {
    fn kind(&self) -> VolumeKind {
        VolumeKind::Local
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn root_path(&self) -> String {
        self.root.display().to_string()
    }

    fn case_sensitive(&self) -> bool {
        !cfg!(windows)
    }

    fn max_concurrent_streams(&self) -> usize {
        self.streams
    }

    async fn supports_fingerprint(&self, _algo: FingerprintAlgo) -> Result<bool> {
        Ok(true)
    }

    async fn list(&self, rel: &RelPath) -> Result<DirListing> {
        let dir = self.fs_path(rel);
        let mut listing = DirListing::default();

        let mut read_dir = fs::read_dir(&dir).await.map_err(|e| Error::Scan {
            rel: rel.clone(),
            message: e.to_string(),
        })?;

        loop {
            let next = read_dir.next_entry().await.map_err(|e| Error::Scan {
                rel: rel.clone(),
                message: e.to_string(),
            })?;
            let Some(dirent) = next else { break };

            let name = dirent.file_name().to_string_lossy().into_owned();
            let child_rel = match rel.join(&name) {
                Ok(child) => child,
                Err(err) => {
                    warn!(dir = %rel, name, "skipping unrepresentable entry name");
                    listing
                        .failures
                        .push(EntryFailure::new(rel.clone(), ActionKind::Skip, err));
                    continue;
                }
            };

            match dirent.metadata().await {
                Ok(metadata) => {
                    if let Some(entry) = Self::entry_from_metadata(child_rel.clone(), &metadata) {
                        listing.entries.push(entry);
                    } else {
                        debug!(rel = %child_rel, "skipping non-regular entry");
                    }
                }
                Err(err) => {
                    // vanished between listing and stat
                    listing.failures.push(EntryFailure::new(
                        child_rel.clone(),
                        ActionKind::Skip,
                        Self::map_io(&child_rel, &err),
                    ));
                }
            }
        }

        Ok(listing)
    }

    async fn stat(&self, rel: &RelPath) -> Result<Option<Entry>> {
        match fs::symlink_metadata(self.fs_path(rel)).await {
            Ok(metadata) => Ok(Self::entry_from_metadata(rel.clone(), &metadata)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io(rel, &e)),
        }
    }

    async fn open_read(&self, rel: &RelPath) -> Result<VolumeReader> {
        let file = fs::File::open(self.fs_path(rel))
            .await
            .map_err(|e| Self::map_io(rel, &e))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, rel: &RelPath) -> Result<VolumeWriter> {
        let file = fs::File::create(self.fs_path(rel))
            .await
            .map_err(|e| Self::map_io(rel, &e))?;
        Ok(Box::new(file))
    }

    async fn mkdir(&self, rel: &RelPath) -> Result<()> {
        let path = self.fs_path(rel);
        match fs::create_dir(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let metadata = fs::metadata(&path)
                    .await
                    .map_err(|e| Self::map_io(rel, &e))?;
                if metadata.is_dir() {
                    Ok(())
                } else {
                    Err(Error::Io {
                        rel: rel.clone(),
                        message: "path exists but is not a directory".into(),
                    })
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::ParentMissing { rel: rel.clone() })
            }
            Err(e) => Err(Self::map_io(rel, &e)),
        }
    }

    async fn mkdirs(&self, rel: &RelPath) -> Result<()> {
        fs::create_dir_all(self.fs_path(rel))
            .await
            .map_err(|e| Self::map_io(rel, &e))
    }

    async fn remove_file(&self, rel: &RelPath) -> Result<()> {
        fs::remove_file(self.fs_path(rel))
            .await
            .map_err(|e| Self::map_io(rel, &e))
    }

    async fn remove_dir(&self, rel: &RelPath) -> Result<()> {
        fs::remove_dir(self.fs_path(rel))
            .await
            .map_err(|e| Self::map_io(rel, &e))
    }

    async fn read_link(&self, rel: &RelPath) -> Result<String> {
        let target = fs::read_link(self.fs_path(rel))
            .await
            .map_err(|e| Self::map_io(rel, &e))?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn make_symlink(&self, rel: &RelPath, link_target: &str) -> Result<()> {
        #[cfg(unix)]
        {
            fs::symlink(link_target, self.fs_path(rel))
                .await
                .map_err(|e| Self::map_io(rel, &e))
        }
        #[cfg(windows)]
        {
            fs::symlink_file(link_target, self.fs_path(rel))
                .await
                .map_err(|e| Self::map_io(rel, &e))
        }
    }

    async fn set_stat(&self, rel: &RelPath, mtime: SystemTime, perms: Option<u32>) -> Result<()> {
        let path = self.fs_path(rel);

        #[cfg(unix)]
        if let Some(mode) = perms {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| Self::map_io(rel, &e))?;
        }
        #[cfg(not(unix))]
        let _ = perms;

        let file_time = filetime::FileTime::from_system_time(mtime);
        let blocking_path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            filetime::set_file_mtime(&blocking_path, file_time)
        })
        .await
        .map_err(|e| Error::Io {
            rel: rel.clone(),
            message: e.to_string(),
        })?;
        outcome.map_err(|e| Self::map_io(rel, &e))
    }

    async fn fingerprint(
        &self,
        rel: &RelPath,
        algo: FingerprintAlgo,
    ) -> Result<Option<Fingerprint>> {
        let reader = self.open_read(rel).await?;
        let fingerprint = digest_reader(algo, rel, reader).await?;
        Ok(Some(fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn stat_reports_kind_and_size() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), b"hello").unwrap();
        std::fs::create_dir(tmp.path().join("d")).unwrap();

        let volume = LocalVolume::new(tmp.path());
        let file = volume.stat(&rel("f.txt")).await.unwrap().unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 5);

        let dir = volume.stat(&rel("d")).await.unwrap().unwrap();
        assert_eq!(dir.kind, EntryKind::Dir);

        assert!(volume.stat(&rel("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_children_with_metadata() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();

        let volume = LocalVolume::new(tmp.path());
        let listing = volume.list(&RelPath::root()).await.unwrap();
        assert_eq!(listing.entries.len(), 2);
        assert!(listing.failures.is_empty());
    }

    #[tokio::test]
    async fn mkdir_is_idempotent_but_needs_parent() {
        let tmp = TempDir::new().unwrap();
        let volume = LocalVolume::new(tmp.path());

        volume.mkdir(&rel("d")).await.unwrap();
        volume.mkdir(&rel("d")).await.unwrap();
        assert_eq!(
            volume.mkdir(&rel("x/y")).await,
            Err(Error::ParentMissing { rel: rel("x/y") })
        );
        volume.mkdirs(&rel("x/y")).await.unwrap();
    }

    #[tokio::test]
    async fn fingerprint_streams_locally() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f"), b"content").unwrap();
        let volume = LocalVolume::new(tmp.path());

        let fp = volume
            .fingerprint(&rel("f"), FingerprintAlgo::Cksum)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            fp,
            Fingerprint::Cksum(volsync_fingerprint::cksum_bytes(b"content"))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_not_followed() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("real"), b"x").unwrap();
        std::os::unix::fs::symlink("real", tmp.path().join("link")).unwrap();

        let volume = LocalVolume::new(tmp.path());
        let link = volume.stat(&rel("link")).await.unwrap().unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(volume.read_link(&rel("link")).await.unwrap(), "real");
    }
}
