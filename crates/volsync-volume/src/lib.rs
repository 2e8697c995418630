//! Virtual volume adapters for volsync
//!
//! A volume is an addressable root location exposing one small capability
//! surface; three adapters implement it:
//!
//! - [`LocalVolume`]: direct `tokio::fs` calls
//! - [`SshShellVolume`]: remote commands over an authenticated shell
//!   session, with a per-host OS dialect selecting the command set
//! - [`SftpVolume`]: protocol-native operations over an authenticated
//!   SFTP session
//!
//! The diff/plan engine is written purely against the [`VirtualVolume`]
//! trait and never learns which backend produced an entry. Sessions are
//! externally owned collaborators: establishing and authenticating them is
//! out of scope here.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod local;
pub mod pathnorm;
pub mod policy;
pub mod sftp;
pub mod shell;

use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use volsync_types::{DirListing, Entry, Fingerprint, FingerprintAlgo, RelPath, Result};

pub use local::LocalVolume;
pub use policy::RemotePolicy;
pub use sftp::{SftpAttrs, SftpDirEntry, SftpEntryKind, SftpSession, SftpVolume};
pub use shell::{ExecOutput, RemoteOs, ShellSession, SshShellVolume};

/// The kind of backend behind a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Local filesystem.
    Local,
    /// Remote host driven through shell commands.
    SshShell,
    /// Remote host speaking an SFTP-style protocol.
    Sftp,
}

/// A readable byte stream from a volume.
pub type VolumeReader = Box<dyn AsyncRead + Send + Unpin>;

/// A writable byte sink into a volume.
pub type VolumeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Uniform capability surface over heterogeneous storage backends.
///
/// Transport-level failures surface as [`volsync_types::Error::Transport`]
/// and abort the run; single-entry failures (permission denied, a file
/// vanishing mid-scan, one timed-out operation) use the per-entry error
/// variants and are recorded by the engine. Retrying flaky remote
/// operations is the adapter's responsibility, never the engine's.
#[async_trait]
pub trait VirtualVolume: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> VolumeKind;

    /// Display name for logs and error messages.
    fn describe(&self) -> String;

    /// The backend path this volume is rooted at, as configured.
    fn root_path(&self) -> String;

    /// Whether entry names on this volume are case sensitive.
    fn case_sensitive(&self) -> bool {
        true
    }

    /// How many streams this volume can comfortably keep open at once.
    ///
    /// This is the back-pressure hint the engine bounds its concurrency
    /// with; remote sessions are a near-singleton resource and default
    /// low.
    fn max_concurrent_streams(&self) -> usize {
        1
    }

    /// Whether this volume can produce fingerprints with `algo`, either
    /// natively or by streaming. Used for algorithm negotiation.
    async fn supports_fingerprint(&self, algo: FingerprintAlgo) -> Result<bool>;

    /// List the children of a directory with their metadata.
    async fn list(&self, rel: &RelPath) -> Result<DirListing>;

    /// Stat a single entry. `Ok(None)` when it does not exist. Symlinks
    /// are reported as themselves, never followed.
    async fn stat(&self, rel: &RelPath) -> Result<Option<Entry>>;

    /// Open a file for reading.
    async fn open_read(&self, rel: &RelPath) -> Result<VolumeReader>;

    /// Open a file for writing, creating or truncating it.
    async fn open_write(&self, rel: &RelPath) -> Result<VolumeWriter>;

    /// Create one directory level. Succeeds if the directory already
    /// exists; fails if the parent is missing.
    async fn mkdir(&self, rel: &RelPath) -> Result<()>;

    /// Create a directory and any missing ancestors.
    async fn mkdirs(&self, rel: &RelPath) -> Result<()>;

    /// Remove a file or symlink.
    async fn remove_file(&self, rel: &RelPath) -> Result<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, rel: &RelPath) -> Result<()>;

    /// Read the target of a symlink.
    async fn read_link(&self, rel: &RelPath) -> Result<String>;

    /// Create a symlink pointing at `link_target`.
    async fn make_symlink(&self, rel: &RelPath, link_target: &str) -> Result<()>;

    /// Restore modification time and, where supported, permission bits.
    async fn set_stat(&self, rel: &RelPath, mtime: SystemTime, perms: Option<u32>) -> Result<()>;

    /// Produce a content fingerprint, when this volume can do so more
    /// cheaply than the caller streaming the bytes itself.
    ///
    /// `Ok(None)` is the explicit "unsupported" signal: the caller must
    /// fall back to [`VirtualVolume::open_read`] plus local hashing.
    async fn fingerprint(&self, rel: &RelPath, algo: FingerprintAlgo)
        -> Result<Option<Fingerprint>>;

    /// Batch form of [`VirtualVolume::fingerprint`]. Remote shells answer
    /// many paths per round trip; the default just loops.
    async fn fingerprints(
        &self,
        rels: &[RelPath],
        algo: FingerprintAlgo,
    ) -> Result<Vec<(RelPath, Option<Fingerprint>)>> {
        let mut out = Vec::with_capacity(rels.len());
        for rel in rels {
            out.push((rel.clone(), self.fingerprint(rel, algo).await?));
        }
        Ok(out)
    }
}
