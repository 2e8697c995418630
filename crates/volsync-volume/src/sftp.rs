//! SFTP volume
//!
//! Protocol-native adapter over an already-authenticated SFTP session.
//! Unlike the shell volume there is no dialect: list/stat/open/mkdir are
//! wire operations. Fingerprinting uses the optional `check-file`
//! extension when the server exposes it; otherwise the adapter signals
//! "unsupported" and the engine streams the bytes and hashes locally.
//!
//! Servers running on Windows report POSIX-style paths with embedded
//! drive letters (`/C:/Users/x`); those are normalized on the way in and
//! flip the volume to case-insensitive matching.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use volsync_types::{
    DirListing, Entry, EntryKind, Error, Fingerprint, FingerprintAlgo, RelPath, Result,
};

use crate::pathnorm::{join_remote, looks_like_windows_path, normalize_remote};
use crate::policy::RemotePolicy;
use crate::{VirtualVolume, VolumeKind, VolumeReader, VolumeWriter};

/// Entry kind as reported by the SFTP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SftpEntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Anything else (sockets, devices); skipped by the scanner.
    Other,
}

/// File attributes from an SFTP stat or directory read.
#[derive(Debug, Clone)]
pub struct SftpAttrs {
    /// Entry kind.
    pub kind: SftpEntryKind,
    /// Size in bytes.
    pub size: u64,
    /// Modification time.
    pub mtime: SystemTime,
    /// POSIX permission bits, when the server reports them.
    pub perms: Option<u32>,
}

/// One entry of an SFTP directory read.
#[derive(Debug, Clone)]
pub struct SftpDirEntry {
    /// Bare file name.
    pub name: String,
    /// Attributes delivered with the listing.
    pub attrs: SftpAttrs,
}

/// An already-authenticated SFTP session.
///
/// The handshake, credentials and host-key verification live with the
/// caller. Transport failures must surface as [`Error::Transport`].
#[async_trait]
pub trait SftpSession: Send + Sync {
    /// Display name of the remote endpoint, e.g. `user@host`.
    fn describe(&self) -> String;

    /// Read a directory with attributes, one round trip.
    async fn read_dir(&self, path: &str) -> Result<Vec<SftpDirEntry>>;

    /// Stat without following symlinks. `Ok(None)` when the path does not
    /// exist.
    async fn lstat(&self, path: &str) -> Result<Option<SftpAttrs>>;

    /// Open a remote file for reading.
    async fn open_read(&self, path: &str) -> Result<VolumeReader>;

    /// Open a remote file for writing (create/truncate).
    async fn open_write(&self, path: &str) -> Result<VolumeWriter>;

    /// Create one directory level.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Remove a file or symlink.
    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &str) -> Result<()>;

    /// Read a symlink target.
    async fn read_link(&self, path: &str) -> Result<String>;

    /// Create a symlink pointing at `target`.
    async fn symlink(&self, path: &str, target: &str) -> Result<()>;

    /// Set the modification time.
    async fn set_times(&self, path: &str, mtime: SystemTime) -> Result<()>;

    /// Set POSIX permission bits.
    async fn set_permissions(&self, path: &str, perms: u32) -> Result<()>;

    /// The `check-file` extension: ask the server to hash a file.
    /// `Ok(None)` when the server does not implement the extension or the
    /// algorithm.
    async fn check_file(&self, path: &str, algorithm: &str) -> Result<Option<String>>;
}

/// A remote directory tree over SFTP.
pub struct SftpVolume {
    session: Arc<dyn SftpSession>,
    root: String,
    windows_server: bool,
    policy: RemotePolicy,
    streams: usize,
}

impl SftpVolume {
    /// Open a volume rooted at `root` on the session's host.
    pub fn new(session: Arc<dyn SftpSession>, root: impl AsRef<str>) -> Self {
        let root = normalize_remote(root.as_ref());
        // A drive letter in the reported path is the tell for a server
        // running on Windows, which changes case sensitivity.
        let windows_server = looks_like_windows_path(&root);
        if windows_server {
            debug!(root, "sftp server appears to run on windows");
        }
        Self {
            session,
            root,
            windows_server,
            policy: RemotePolicy::default(),
            streams: 2,
        }
    }

    /// Override the timeout/retry policy.
    pub fn with_policy(mut self, policy: RemotePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Allow more concurrent streams.
    pub fn with_max_streams(mut self, streams: usize) -> Self {
        self.streams = streams.max(1);
        self
    }

    fn abs(&self, rel: &RelPath) -> String {
        join_remote(&self.root, rel)
    }

    fn entry_from_attrs(rel: RelPath, attrs: &SftpAttrs) -> Option<Entry> {
        let kind = match attrs.kind {
            SftpEntryKind::File => EntryKind::File,
            SftpEntryKind::Dir => EntryKind::Dir,
            SftpEntryKind::Symlink => EntryKind::Symlink,
            SftpEntryKind::Other => return None,
        };
        let size = if kind == EntryKind::File {
            attrs.size
        } else {
            0
        };
        let mut entry = Entry::new(rel, kind, size, attrs.mtime);
        if let Some(perms) = attrs.perms {
            entry = entry.with_perms(perms);
        }
        Some(entry)
    }
}

#[async_trait]
impl VirtualVolume for SftpVolume {
    fn kind(&self) -> VolumeKind {
        VolumeKind::Sftp
    }

    fn describe(&self) -> String {
        format!("sftp://{}{}", self.session.describe(), self.root)
    }

    fn root_path(&self) -> String {
        self.root.clone()
    }

    fn case_sensitive(&self) -> bool {
        !self.windows_server
    }

    fn max_concurrent_streams(&self) -> usize {
        self.streams
    }

    async fn supports_fingerprint(&self, _algo: FingerprintAlgo) -> Result<bool> {
        // Always: check-file when the server has it, stream-and-hash
        // through open_read otherwise.
        Ok(true)
    }

    async fn list(&self, rel: &RelPath) -> Result<DirListing> {
        let abs = self.abs(rel);
        let children = self
            .policy
            .op(|| self.session.read_dir(&abs))
            .await
            .map_err(|e| match e {
                Error::Transport { .. } => e,
                other => Error::Scan {
                    rel: rel.clone(),
                    message: other.to_string(),
                },
            })?;

        let mut listing = DirListing::default();
        for child in children {
            if child.name == "." || child.name == ".." {
                continue;
            }
            let Ok(child_rel) = rel.join(&child.name) else {
                debug!(dir = %rel, name = child.name, "skipping unrepresentable entry name");
                continue;
            };
            if let Some(entry) = Self::entry_from_attrs(child_rel, &child.attrs) {
                listing.entries.push(entry);
            } else {
                debug!(dir = %rel, name = child.name, "skipping non-regular entry");
            }
        }
        Ok(listing)
    }

    async fn stat(&self, rel: &RelPath) -> Result<Option<Entry>> {
        let abs = self.abs(rel);
        let attrs = self.policy.op(|| self.session.lstat(&abs)).await?;
        Ok(attrs.and_then(|attrs| Self::entry_from_attrs(rel.clone(), &attrs)))
    }

    async fn open_read(&self, rel: &RelPath) -> Result<VolumeReader> {
        let abs = self.abs(rel);
        self.policy.op(|| self.session.open_read(&abs)).await
    }

    async fn open_write(&self, rel: &RelPath) -> Result<VolumeWriter> {
        let abs = self.abs(rel);
        self.policy.op(|| self.session.open_write(&abs)).await
    }

    async fn mkdir(&self, rel: &RelPath) -> Result<()> {
        let abs = self.abs(rel);
        match self.policy.op(|| self.session.mkdir(&abs)).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // already existing as a directory is fine; a missing
                // parent gets the dedicated error
                if let Some(attrs) = self.policy.op(|| self.session.lstat(&abs)).await? {
                    if attrs.kind == SftpEntryKind::Dir {
                        return Ok(());
                    }
                }
                if let Some(parent) = rel.parent() {
                    let parent_abs = self.abs(&parent);
                    if self
                        .policy
                        .op(|| self.session.lstat(&parent_abs))
                        .await?
                        .is_none()
                    {
                        return Err(Error::ParentMissing { rel: rel.clone() });
                    }
                }
                Err(err)
            }
        }
    }

    async fn mkdirs(&self, rel: &RelPath) -> Result<()> {
        // walk down from the root, creating whatever is missing
        let mut current = RelPath::root();
        let components: Vec<String> = rel.components().map(str::to_string).collect();
        for component in components {
            current = current.join(&component)?;
            let abs = self.abs(&current);
            if self.policy.op(|| self.session.lstat(&abs)).await?.is_none() {
                self.policy.op(|| self.session.mkdir(&abs)).await?;
            }
        }
        Ok(())
    }

    async fn remove_file(&self, rel: &RelPath) -> Result<()> {
        let abs = self.abs(rel);
        self.policy.op(|| self.session.remove_file(&abs)).await
    }

    async fn remove_dir(&self, rel: &RelPath) -> Result<()> {
        let abs = self.abs(rel);
        self.policy.op(|| self.session.remove_dir(&abs)).await
    }

    async fn read_link(&self, rel: &RelPath) -> Result<String> {
        let abs = self.abs(rel);
        self.policy.op(|| self.session.read_link(&abs)).await
    }

    async fn make_symlink(&self, rel: &RelPath, link_target: &str) -> Result<()> {
        let abs = self.abs(rel);
        self.policy
            .op(|| self.session.symlink(&abs, link_target))
            .await
    }

    async fn set_stat(&self, rel: &RelPath, mtime: SystemTime, perms: Option<u32>) -> Result<()> {
        let abs = self.abs(rel);
        self.policy.op(|| self.session.set_times(&abs, mtime)).await?;
        if !self.windows_server {
            if let Some(mode) = perms {
                self.policy
                    .op(|| self.session.set_permissions(&abs, mode))
                    .await?;
            }
        }
        Ok(())
    }

    async fn fingerprint(
        &self,
        rel: &RelPath,
        algo: FingerprintAlgo,
    ) -> Result<Option<Fingerprint>> {
        // the check-file extension only speaks digest algorithms
        let algorithm = match algo {
            FingerprintAlgo::Md5 => "md5",
            FingerprintAlgo::Sha256 => "sha2-256",
            FingerprintAlgo::Cksum => return Ok(None),
        };
        let abs = self.abs(rel);
        let hex = self
            .policy
            .op(|| self.session.check_file(&abs, algorithm))
            .await?;
        Ok(hex.map(|hex| Fingerprint::digest(algo, hex)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::UNIX_EPOCH;

    /// Minimal in-memory SFTP server double: a map of absolute path to
    /// attrs, plus a recorded call log for the mutation methods.
    struct FakeSftp {
        nodes: Mutex<HashMap<String, SftpAttrs>>,
        mkdirs: Mutex<Vec<String>>,
        check_file_hex: Option<String>,
    }

    impl FakeSftp {
        fn new(paths: &[(&str, SftpEntryKind)]) -> Arc<Self> {
            let nodes = paths
                .iter()
                .map(|(p, k)| {
                    (
                        (*p).to_string(),
                        SftpAttrs {
                            kind: *k,
                            size: 3,
                            mtime: UNIX_EPOCH,
                            perms: Some(0o644),
                        },
                    )
                })
                .collect();
            Arc::new(Self {
                nodes: Mutex::new(nodes),
                mkdirs: Mutex::new(Vec::new()),
                check_file_hex: None,
            })
        }
    }

    #[async_trait]
    impl SftpSession for FakeSftp {
        fn describe(&self) -> String {
            "test@host".into()
        }

        async fn read_dir(&self, path: &str) -> Result<Vec<SftpDirEntry>> {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            let nodes = self.nodes.lock().unwrap();
            let mut out = Vec::new();
            for (p, attrs) in nodes.iter() {
                if let Some(name) = p.strip_prefix(&prefix) {
                    if !name.is_empty() && !name.contains('/') {
                        out.push(SftpDirEntry {
                            name: name.to_string(),
                            attrs: attrs.clone(),
                        });
                    }
                }
            }
            Ok(out)
        }

        async fn lstat(&self, path: &str) -> Result<Option<SftpAttrs>> {
            Ok(self.nodes.lock().unwrap().get(path).cloned())
        }

        async fn open_read(&self, _path: &str) -> Result<VolumeReader> {
            Ok(Box::new(&b"abc"[..]))
        }

        async fn open_write(&self, _path: &str) -> Result<VolumeWriter> {
            Ok(Box::new(Vec::new()))
        }

        async fn mkdir(&self, path: &str) -> Result<()> {
            self.mkdirs.lock().unwrap().push(path.to_string());
            self.nodes.lock().unwrap().insert(
                path.to_string(),
                SftpAttrs {
                    kind: SftpEntryKind::Dir,
                    size: 0,
                    mtime: UNIX_EPOCH,
                    perms: None,
                },
            );
            Ok(())
        }

        async fn remove_file(&self, path: &str) -> Result<()> {
            self.nodes.lock().unwrap().remove(path);
            Ok(())
        }

        async fn remove_dir(&self, path: &str) -> Result<()> {
            self.nodes.lock().unwrap().remove(path);
            Ok(())
        }

        async fn read_link(&self, _path: &str) -> Result<String> {
            Ok("target".into())
        }

        async fn symlink(&self, _path: &str, _target: &str) -> Result<()> {
            Ok(())
        }

        async fn set_times(&self, _path: &str, _mtime: SystemTime) -> Result<()> {
            Ok(())
        }

        async fn set_permissions(&self, _path: &str, _perms: u32) -> Result<()> {
            Ok(())
        }

        async fn check_file(&self, _path: &str, _algorithm: &str) -> Result<Option<String>> {
            Ok(self.check_file_hex.clone())
        }
    }

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn list_maps_protocol_entries() {
        let session = FakeSftp::new(&[
            ("/srv/data/a.txt", SftpEntryKind::File),
            ("/srv/data/sub", SftpEntryKind::Dir),
            ("/srv/data/sock", SftpEntryKind::Other),
        ]);
        let volume = SftpVolume::new(session, "/srv/data");

        let mut listing = volume.list(&RelPath::root()).await.unwrap();
        listing.entries.sort_by(|a, b| a.rel.cmp(&b.rel));
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.entries[0].rel, rel("a.txt"));
        assert_eq!(listing.entries[1].kind, EntryKind::Dir);
    }

    #[tokio::test]
    async fn mkdirs_walks_down_from_root() {
        let session = FakeSftp::new(&[]);
        let volume = SftpVolume::new(Arc::clone(&session) as Arc<dyn SftpSession>, "/srv");

        volume.mkdirs(&rel("a/b/c")).await.unwrap();
        assert_eq!(
            *session.mkdirs.lock().unwrap(),
            vec!["/srv/a", "/srv/a/b", "/srv/a/b/c"]
        );
    }

    #[tokio::test]
    async fn mkdir_reports_missing_parent() {
        struct RefusingSftp(Arc<FakeSftp>);
        // a session whose mkdir always fails, so the volume has to
        // classify the failure
        #[async_trait]
        impl SftpSession for RefusingSftp {
            fn describe(&self) -> String {
                self.0.describe()
            }
            async fn read_dir(&self, path: &str) -> Result<Vec<SftpDirEntry>> {
                self.0.read_dir(path).await
            }
            async fn lstat(&self, path: &str) -> Result<Option<SftpAttrs>> {
                self.0.lstat(path).await
            }
            async fn open_read(&self, path: &str) -> Result<VolumeReader> {
                self.0.open_read(path).await
            }
            async fn open_write(&self, path: &str) -> Result<VolumeWriter> {
                self.0.open_write(path).await
            }
            async fn mkdir(&self, path: &str) -> Result<()> {
                Err(Error::Io {
                    rel: RelPath::root(),
                    message: format!("mkdir refused: {path}"),
                })
            }
            async fn remove_file(&self, path: &str) -> Result<()> {
                self.0.remove_file(path).await
            }
            async fn remove_dir(&self, path: &str) -> Result<()> {
                self.0.remove_dir(path).await
            }
            async fn read_link(&self, path: &str) -> Result<String> {
                self.0.read_link(path).await
            }
            async fn symlink(&self, path: &str, target: &str) -> Result<()> {
                self.0.symlink(path, target).await
            }
            async fn set_times(&self, path: &str, mtime: SystemTime) -> Result<()> {
                self.0.set_times(path, mtime).await
            }
            async fn set_permissions(&self, path: &str, perms: u32) -> Result<()> {
                self.0.set_permissions(path, perms).await
            }
            async fn check_file(&self, path: &str, algorithm: &str) -> Result<Option<String>> {
                self.0.check_file(path, algorithm).await
            }
        }

        let inner = FakeSftp::new(&[]);
        let volume = SftpVolume::new(Arc::new(RefusingSftp(inner)), "/srv");
        let err = volume.mkdir(&rel("missing/child")).await.unwrap_err();
        assert_eq!(
            err,
            Error::ParentMissing {
                rel: rel("missing/child")
            }
        );
    }

    #[tokio::test]
    async fn windows_root_flips_case_sensitivity() {
        let session = FakeSftp::new(&[]);
        let posix = SftpVolume::new(Arc::clone(&session) as Arc<dyn SftpSession>, "/home/u");
        assert!(posix.case_sensitive());

        let windows = SftpVolume::new(session, "/C:/Users/u");
        assert!(!windows.case_sensitive());
    }

    #[tokio::test]
    async fn fingerprint_unsupported_signals_fallback() {
        let session = FakeSftp::new(&[("/srv/f", SftpEntryKind::File)]);
        let volume = SftpVolume::new(session, "/srv");
        // no check-file support scripted: the caller must stream and hash
        let fp = volume
            .fingerprint(&rel("f"), FingerprintAlgo::Md5)
            .await
            .unwrap();
        assert!(fp.is_none());
    }
}
