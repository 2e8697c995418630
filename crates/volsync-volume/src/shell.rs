//! SSH shell volume
//!
//! Drives a remote host purely through shell commands over an
//! already-authenticated session. A one-time detected [`RemoteOs`]
//! dialect selects the command set: POSIX hosts get `find`/`stat`/`cat`
//! and the coreutils checksum tools, Windows hosts get PowerShell
//! equivalents and `Get-FileHash`. The diff engine never sees which
//! dialect produced an entry or a fingerprint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, warn};

use volsync_fingerprint::{parse_posix_cksum, parse_posix_hash, parse_powershell_hash};
use volsync_types::{
    DirListing, Entry, EntryKind, Error, Fingerprint, FingerprintAlgo, RelPath, Result,
};

use crate::pathnorm::{join_remote, normalize_remote, ps_quote, sh_quote, windows_native};
use crate::policy::RemotePolicy;
use crate::{VirtualVolume, VolumeKind, VolumeReader, VolumeWriter};

/// Captured output of one executed remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Remote exit code.
    pub exit_code: i32,
    /// Captured standard output, decoded as UTF-8.
    pub stdout: String,
    /// Captured standard error, decoded as UTF-8.
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The remote OS dialect, detected once per host by an external
/// collaborator and passed in at volume construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOs {
    /// A POSIX host with coreutils.
    Posix,
    /// A Windows host with PowerShell.
    Windows,
}

/// An already-authenticated shell session.
///
/// Session establishment, credentials and host-key verification are the
/// caller's problem; transport failures must surface as
/// [`Error::Transport`] so the engine aborts rather than records them.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Display name of the remote endpoint, e.g. `user@host`.
    fn describe(&self) -> String;

    /// Run a command to completion, capturing its output.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Run a command and stream its standard output.
    async fn open_read_command(&self, command: &str) -> Result<VolumeReader>;

    /// Run a command and stream into its standard input.
    async fn open_write_command(&self, command: &str) -> Result<VolumeWriter>;
}

const POSIX_STAT_FORMAT: &str = "%F|%s|%Y|%a|%n";

// Windows command lines cap out at 8191 characters; leave headroom for
// the command itself.
const DEFAULT_MAX_COMMAND_LEN: usize = 7000;

/// A remote directory tree reached through shell commands.
pub struct SshShellVolume {
    session: Arc<dyn ShellSession>,
    root: String,
    os: RemoteOs,
    policy: RemotePolicy,
    streams: usize,
    max_command_len: usize,
    probe_cache: Mutex<HashMap<FingerprintAlgo, bool>>,
}

impl SshShellVolume {
    /// Open a volume rooted at `root` on the session's host. The dialect
    /// comes from the external one-time remote-OS detection.
    pub fn new(session: Arc<dyn ShellSession>, root: impl AsRef<str>, os: RemoteOs) -> Self {
        Self {
            session,
            root: normalize_remote(root.as_ref()),
            os,
            policy: RemotePolicy::default(),
            streams: 1,
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            probe_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the timeout/retry policy.
    pub fn with_policy(mut self, policy: RemotePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Allow more concurrent streams (for sessions that multiplex
    /// channels).
    pub fn with_max_streams(mut self, streams: usize) -> Self {
        self.streams = streams.max(1);
        self
    }

    /// Override the command-length budget used when batching fingerprint
    /// requests.
    pub fn with_max_command_len(mut self, len: usize) -> Self {
        self.max_command_len = len.max(256);
        self
    }

    fn abs(&self, rel: &RelPath) -> String {
        join_remote(&self.root, rel)
    }

    fn win(&self, rel: &RelPath) -> String {
        windows_native(&self.abs(rel))
    }

    fn powershell(script: &str) -> String {
        format!(
            "powershell -NoProfile -Command \"{}\"",
            script.replace('"', "\\\"")
        )
    }

    fn unsupported(&self, operation: &str) -> Error {
        Error::Unsupported {
            volume: self.describe(),
            operation: operation.to_string(),
        }
    }

    async fn run(&self, command: &str) -> Result<ExecOutput> {
        self.policy.exec(|| self.session.exec(command)).await
    }

    fn map_failed(&self, rel: &RelPath, output: &ExecOutput) -> Error {
        let stderr = output.stderr.trim();
        if stderr.contains("No such file") || stderr.contains("Cannot find") {
            Error::Vanished { rel: rel.clone() }
        } else if stderr.contains("Permission denied") || stderr.contains("Access") {
            Error::PermissionDenied { rel: rel.clone() }
        } else {
            Error::Io {
                rel: rel.clone(),
                message: format!("remote command failed (exit {}): {stderr}", output.exit_code),
            }
        }
    }

    fn entry_from_raw(&self, rel: RelPath, raw: &RawStat) -> Entry {
        let mut entry = Entry::new(rel, raw.kind, raw.size, raw.mtime);
        if let Some(perms) = raw.perms {
            entry = entry.with_perms(perms);
        }
        entry
    }

    /// Batch paths into command lines below the length budget.
    fn chunk_paths<'a>(&self, paths: &'a [(String, RelPath)]) -> Vec<&'a [(String, RelPath)]> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut length = 0;
        for (i, (quoted, _)) in paths.iter().enumerate() {
            if i > start && length + quoted.len() > self.max_command_len {
                chunks.push(&paths[start..i]);
                start = i;
                length = 0;
            }
            length += quoted.len() + 1;
        }
        if start < paths.len() {
            chunks.push(&paths[start..]);
        }
        chunks
    }

    async fn fingerprints_posix(
        &self,
        rels: &[RelPath],
        algo: FingerprintAlgo,
    ) -> Result<Vec<(RelPath, Option<Fingerprint>)>> {
        let tool = match algo {
            FingerprintAlgo::Cksum => "cksum",
            FingerprintAlgo::Md5 => "md5sum",
            FingerprintAlgo::Sha256 => "sha256sum",
        };

        // keyed by the path exactly as the remote tool will print it
        let paths: Vec<(String, RelPath)> =
            rels.iter().map(|r| (self.abs(r), r.clone())).collect();
        let mut found: HashMap<RelPath, Fingerprint> = HashMap::new();

        for chunk in self.chunk_paths(&paths) {
            let args: Vec<String> = chunk.iter().map(|(abs, _)| sh_quote(abs)).collect();
            let command = format!("{tool} {}", args.join(" "));
            // A missing file makes the tool exit nonzero while still
            // printing results for the rest, so the transcript is parsed
            // regardless of the exit code.
            let output = self.run(&command).await?;

            if !output.success() && output.stderr.contains("command not found") {
                return Err(self.unsupported(tool));
            }

            let by_path: HashMap<&str, &RelPath> =
                chunk.iter().map(|(abs, rel)| (abs.as_str(), rel)).collect();

            let records = match algo {
                FingerprintAlgo::Cksum => parse_posix_cksum(&output.stdout)?,
                _ => parse_posix_hash(algo, &output.stdout)?,
            };
            for record in records {
                match by_path.get(record.file.as_str()) {
                    Some(rel) => {
                        found.insert((*rel).clone(), record.fingerprint);
                    }
                    None => {
                        return Err(Error::Transcript {
                            message: format!(
                                "fingerprint result for unrequested path '{}'",
                                record.file
                            ),
                        })
                    }
                }
            }
        }

        Ok(rels
            .iter()
            .map(|rel| (rel.clone(), found.remove(rel)))
            .collect())
    }

    async fn fingerprints_windows(
        &self,
        rels: &[RelPath],
        algo: FingerprintAlgo,
    ) -> Result<Vec<(RelPath, Option<Fingerprint>)>> {
        let algorithm = match algo {
            FingerprintAlgo::Md5 => "MD5",
            FingerprintAlgo::Sha256 => "SHA256",
            FingerprintAlgo::Cksum => return Err(self.unsupported("cksum")),
        };

        // Get-FileHash always reports the native Windows path, whatever
        // shape was fed in.
        let paths: Vec<(String, RelPath)> = rels.iter().map(|r| (self.win(r), r.clone())).collect();
        let mut found: HashMap<RelPath, Fingerprint> = HashMap::new();

        for chunk in self.chunk_paths(&paths) {
            let args: Vec<String> = chunk.iter().map(|(win, _)| ps_quote(win)).collect();
            let script = format!(
                "Get-FileHash -Algorithm {algorithm} {} | Select-Object Hash, Path | Format-List",
                args.join(",")
            );
            let output = self.run(&Self::powershell(&script)).await?;

            let by_path: HashMap<String, &RelPath> = chunk
                .iter()
                .map(|(win, rel)| (win.to_lowercase(), rel))
                .collect();

            for record in parse_powershell_hash(algo, &output.stdout)? {
                match by_path.get(&record.file.to_lowercase()) {
                    Some(rel) => {
                        found.insert((*rel).clone(), record.fingerprint);
                    }
                    None => {
                        return Err(Error::Transcript {
                            message: format!(
                                "fingerprint result for unrequested path '{}'",
                                record.file
                            ),
                        })
                    }
                }
            }
        }

        Ok(rels
            .iter()
            .map(|rel| (rel.clone(), found.remove(rel)))
            .collect())
    }
}

#[async_trait]
impl VirtualVolume for SshShellVolume {
    fn kind(&self) -> VolumeKind {
        VolumeKind::SshShell
    }

    fn describe(&self) -> String {
        format!("ssh://{}{}", self.session.describe(), self.root)
    }

    fn root_path(&self) -> String {
        self.root.clone()
    }

    fn case_sensitive(&self) -> bool {
        self.os == RemoteOs::Posix
    }

    fn max_concurrent_streams(&self) -> usize {
        self.streams
    }

    async fn supports_fingerprint(&self, algo: FingerprintAlgo) -> Result<bool> {
        match self.os {
            RemoteOs::Windows => Ok(matches!(
                algo,
                FingerprintAlgo::Md5 | FingerprintAlgo::Sha256
            )),
            RemoteOs::Posix => {
                if let Some(&supported) = self.probe_cache.lock().expect("probe cache").get(&algo) {
                    return Ok(supported);
                }
                let tool = match algo {
                    FingerprintAlgo::Cksum => "cksum",
                    FingerprintAlgo::Md5 => "md5sum",
                    FingerprintAlgo::Sha256 => "sha256sum",
                };
                let output = self.run(&format!("command -v {tool}")).await?;
                let supported = output.success();
                debug!(tool, supported, "probed remote checksum tool");
                self.probe_cache
                    .lock()
                    .expect("probe cache")
                    .insert(algo, supported);
                Ok(supported)
            }
        }
    }

    async fn list(&self, rel: &RelPath) -> Result<DirListing> {
        let abs = self.abs(rel);
        let output = match self.os {
            RemoteOs::Posix => {
                let command = format!(
                    "LC_ALL=C find {} -mindepth 1 -maxdepth 1 -exec stat -c '{POSIX_STAT_FORMAT}' {{}} +",
                    sh_quote(&abs)
                );
                self.run(&command).await?
            }
            RemoteOs::Windows => {
                let script = format!(
                    "$epoch = [datetime]'1970-01-01T00:00:00Z'; Get-ChildItem -LiteralPath {} -Force | ForEach-Object {{ $kind = if ($_.PSIsContainer) {{ 'directory' }} else {{ 'file' }}; $size = if ($_.PSIsContainer) {{ 0 }} else {{ $_.Length }}; $mtime = [int64](($_.LastWriteTimeUtc - $epoch).TotalSeconds); \"$kind|$size|$mtime|$($_.Name)\" }}",
                    ps_quote(&self.win(rel))
                );
                self.run(&Self::powershell(&script)).await?
            }
        };

        if !output.success() {
            return Err(Error::Scan {
                rel: rel.clone(),
                message: output.stderr.trim().to_string(),
            });
        }

        let mut listing = DirListing::default();
        for line in output.stdout.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let raw = match self.os {
                RemoteOs::Posix => parse_posix_stat_line(line)?,
                RemoteOs::Windows => parse_windows_listing_line(line)?,
            };
            let Some(raw) = raw else {
                debug!(line, "skipping non-regular remote entry");
                continue;
            };
            let name = raw.path.rsplit(['/', '\\']).next().unwrap_or(&raw.path);
            match rel.join(name) {
                Ok(child) => {
                    let entry = self.entry_from_raw(child, &raw);
                    listing.entries.push(entry);
                }
                Err(err) => {
                    warn!(dir = %rel, name, %err, "skipping unrepresentable remote entry name");
                }
            }
        }
        Ok(listing)
    }

    async fn stat(&self, rel: &RelPath) -> Result<Option<Entry>> {
        let output = match self.os {
            RemoteOs::Posix => {
                let command = format!(
                    "LC_ALL=C stat -c '{POSIX_STAT_FORMAT}' {}",
                    sh_quote(&self.abs(rel))
                );
                self.run(&command).await?
            }
            RemoteOs::Windows => {
                let script = format!(
                    "$epoch = [datetime]'1970-01-01T00:00:00Z'; $item = Get-Item -LiteralPath {} -Force; $kind = if ($item.PSIsContainer) {{ 'directory' }} else {{ 'file' }}; $size = if ($item.PSIsContainer) {{ 0 }} else {{ $item.Length }}; $mtime = [int64](($item.LastWriteTimeUtc - $epoch).TotalSeconds); \"$kind|$size|$mtime|$($item.Name)\"",
                    ps_quote(&self.win(rel))
                );
                self.run(&Self::powershell(&script)).await?
            }
        };

        if !output.success() {
            let stderr = output.stderr.trim();
            if stderr.contains("No such file") || stderr.contains("Cannot find") {
                return Ok(None);
            }
            return Err(self.map_failed(rel, &output));
        }

        let line = output
            .stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| Error::Transcript {
                message: "empty stat output".into(),
            })?;
        let raw = match self.os {
            RemoteOs::Posix => parse_posix_stat_line(line.trim_end_matches('\r'))?,
            RemoteOs::Windows => parse_windows_listing_line(line.trim_end_matches('\r'))?,
        };
        Ok(raw.map(|raw| self.entry_from_raw(rel.clone(), &raw)))
    }

    async fn open_read(&self, rel: &RelPath) -> Result<VolumeReader> {
        let command = match self.os {
            RemoteOs::Posix => format!("cat < {}", sh_quote(&self.abs(rel))),
            RemoteOs::Windows => format!("cmd.exe /c type \"{}\"", self.win(rel)),
        };
        self.policy
            .op(|| self.session.open_read_command(&command))
            .await
    }

    async fn open_write(&self, rel: &RelPath) -> Result<VolumeWriter> {
        match self.os {
            RemoteOs::Posix => {
                let command = format!("cat > {}", sh_quote(&self.abs(rel)));
                self.policy
                    .op(|| self.session.open_write_command(&command))
                    .await
            }
            RemoteOs::Windows => Err(self.unsupported("open_write over a Windows shell")),
        }
    }

    async fn mkdir(&self, rel: &RelPath) -> Result<()> {
        let output = match self.os {
            RemoteOs::Posix => {
                let q = sh_quote(&self.abs(rel));
                self.run(&format!("test -d {q} || mkdir {q}")).await?
            }
            RemoteOs::Windows => {
                let q = ps_quote(&self.win(rel));
                let script = format!(
                    "if (-not (Test-Path -LiteralPath {q} -PathType Container)) {{ $parent = Split-Path {q}; if ($parent -and -not (Test-Path -LiteralPath $parent)) {{ throw 'parent directory missing' }}; New-Item -ItemType Directory -Path {q} | Out-Null }}"
                );
                self.run(&Self::powershell(&script)).await?
            }
        };
        if output.success() {
            Ok(())
        } else if output.stderr.contains("No such file")
            || output.stderr.contains("parent directory missing")
        {
            Err(Error::ParentMissing { rel: rel.clone() })
        } else {
            Err(self.map_failed(rel, &output))
        }
    }

    async fn mkdirs(&self, rel: &RelPath) -> Result<()> {
        let output = match self.os {
            RemoteOs::Posix => {
                self.run(&format!("mkdir -p {}", sh_quote(&self.abs(rel))))
                    .await?
            }
            RemoteOs::Windows => {
                let script = format!(
                    "New-Item -ItemType Directory -Force -Path {} | Out-Null",
                    ps_quote(&self.win(rel))
                );
                self.run(&Self::powershell(&script)).await?
            }
        };
        if output.success() {
            Ok(())
        } else {
            Err(self.map_failed(rel, &output))
        }
    }

    async fn remove_file(&self, rel: &RelPath) -> Result<()> {
        let output = match self.os {
            RemoteOs::Posix => self.run(&format!("rm {}", sh_quote(&self.abs(rel)))).await?,
            RemoteOs::Windows => {
                let script = format!("Remove-Item -LiteralPath {}", ps_quote(&self.win(rel)));
                self.run(&Self::powershell(&script)).await?
            }
        };
        if output.success() {
            Ok(())
        } else {
            Err(self.map_failed(rel, &output))
        }
    }

    async fn remove_dir(&self, rel: &RelPath) -> Result<()> {
        let output = match self.os {
            RemoteOs::Posix => {
                self.run(&format!("rmdir {}", sh_quote(&self.abs(rel))))
                    .await?
            }
            RemoteOs::Windows => {
                let script = format!("Remove-Item -LiteralPath {}", ps_quote(&self.win(rel)));
                self.run(&Self::powershell(&script)).await?
            }
        };
        if output.success() {
            Ok(())
        } else {
            Err(self.map_failed(rel, &output))
        }
    }

    async fn read_link(&self, rel: &RelPath) -> Result<String> {
        match self.os {
            RemoteOs::Posix => {
                let output = self
                    .run(&format!("readlink {}", sh_quote(&self.abs(rel))))
                    .await?;
                if output.success() {
                    Ok(output.stdout.trim_end_matches(['\r', '\n']).to_string())
                } else {
                    Err(self.map_failed(rel, &output))
                }
            }
            RemoteOs::Windows => Err(self.unsupported("read_link over a Windows shell")),
        }
    }

    async fn make_symlink(&self, rel: &RelPath, link_target: &str) -> Result<()> {
        match self.os {
            RemoteOs::Posix => {
                let command = format!(
                    "ln -s {} {}",
                    sh_quote(link_target),
                    sh_quote(&self.abs(rel))
                );
                let output = self.run(&command).await?;
                if output.success() {
                    Ok(())
                } else {
                    Err(self.map_failed(rel, &output))
                }
            }
            RemoteOs::Windows => Err(self.unsupported("make_symlink over a Windows shell")),
        }
    }

    async fn set_stat(&self, rel: &RelPath, mtime: SystemTime, perms: Option<u32>) -> Result<()> {
        let epoch = mtime
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let output = match self.os {
            RemoteOs::Posix => {
                let q = sh_quote(&self.abs(rel));
                let mut command = format!("touch -m -d @{epoch} {q}");
                if let Some(mode) = perms {
                    command.push_str(&format!(" && chmod {mode:o} {q}"));
                }
                self.run(&command).await?
            }
            RemoteOs::Windows => {
                let script = format!(
                    "(Get-Item -LiteralPath {} -Force).LastWriteTimeUtc = ([datetime]'1970-01-01T00:00:00Z').AddSeconds({epoch})",
                    ps_quote(&self.win(rel))
                );
                self.run(&Self::powershell(&script)).await?
            }
        };
        if output.success() {
            Ok(())
        } else {
            Err(self.map_failed(rel, &output))
        }
    }

    async fn fingerprint(
        &self,
        rel: &RelPath,
        algo: FingerprintAlgo,
    ) -> Result<Option<Fingerprint>> {
        let mut results = self.fingerprints(std::slice::from_ref(rel), algo).await?;
        Ok(results.pop().and_then(|(_, fp)| fp))
    }

    async fn fingerprints(
        &self,
        rels: &[RelPath],
        algo: FingerprintAlgo,
    ) -> Result<Vec<(RelPath, Option<Fingerprint>)>> {
        if rels.is_empty() {
            return Ok(Vec::new());
        }
        match self.os {
            RemoteOs::Posix => self.fingerprints_posix(rels, algo).await,
            RemoteOs::Windows => self.fingerprints_windows(rels, algo).await,
        }
    }
}

#[derive(Debug)]
struct RawStat {
    kind: EntryKind,
    size: u64,
    mtime: SystemTime,
    perms: Option<u32>,
    path: String,
}

/// Parse one `stat -c '%F|%s|%Y|%a|%n'` line. `Ok(None)` for entry kinds
/// the sync does not handle (sockets, devices, fifos).
fn parse_posix_stat_line(line: &str) -> Result<Option<RawStat>> {
    let mut parts = line.splitn(5, '|');
    let (Some(kind), Some(size), Some(mtime), Some(perms), Some(path)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(Error::Transcript {
            message: format!("invalid stat line: {line}"),
        });
    };

    let kind = match kind {
        "directory" => EntryKind::Dir,
        "symbolic link" => EntryKind::Symlink,
        "regular file" | "regular empty file" => EntryKind::File,
        _ => return Ok(None),
    };

    let size: u64 = size.parse().map_err(|_| Error::Transcript {
        message: format!("invalid size in stat line: {line}"),
    })?;
    let epoch: i64 = mtime.parse().map_err(|_| Error::Transcript {
        message: format!("invalid mtime in stat line: {line}"),
    })?;
    let perms = u32::from_str_radix(perms, 8).ok();

    Ok(Some(RawStat {
        kind,
        size: if kind == EntryKind::File { size } else { 0 },
        mtime: epoch_to_system_time(epoch),
        perms,
        path: path.to_string(),
    }))
}

/// Parse one `kind|size|mtime|name` line from the PowerShell listing
/// script.
fn parse_windows_listing_line(line: &str) -> Result<Option<RawStat>> {
    let mut parts = line.splitn(4, '|');
    let (Some(kind), Some(size), Some(mtime), Some(name)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Transcript {
            message: format!("invalid listing line: {line}"),
        });
    };

    let kind = match kind {
        "directory" => EntryKind::Dir,
        "file" => EntryKind::File,
        _ => return Ok(None),
    };
    let size: u64 = if size.is_empty() {
        0
    } else {
        size.parse().map_err(|_| Error::Transcript {
            message: format!("invalid size in listing line: {line}"),
        })?
    };
    let epoch: i64 = mtime.parse().map_err(|_| Error::Transcript {
        message: format!("invalid mtime in listing line: {line}"),
    })?;

    Ok(Some(RawStat {
        kind,
        size,
        mtime: epoch_to_system_time(epoch),
        perms: None,
        path: name.to_string(),
    }))
}

fn epoch_to_system_time(epoch: i64) -> SystemTime {
    if epoch >= 0 {
        UNIX_EPOCH + Duration::from_secs(epoch as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(epoch.unsigned_abs())
    }
}
