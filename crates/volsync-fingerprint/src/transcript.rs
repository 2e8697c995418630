//! Remote fingerprint transcript parsing
//!
//! Remote volumes fingerprint files by running OS tools and capturing the
//! output. Three output dialects exist in the wild:
//!
//! - POSIX `cksum`: `<crc> <size> <path>` per line
//! - POSIX hash tools (`md5sum`, `sha256sum`): `<hex> <path>` per line,
//!   possibly with the `*` binary-mode marker before the path
//! - PowerShell `Get-FileHash ... | Format-List`: `Hash:`/`Path:`
//!   key-value blocks, with long paths wrapped onto continuation lines
//!
//! All three normalize into [`TranscriptRecord`]s. Blank and
//! whitespace-only lines are tolerated everywhere and hex is folded to
//! lowercase, so records compare equal no matter which tool produced them.

use volsync_types::{Error, Fingerprint, FingerprintAlgo, Result};

/// One parsed fingerprint result from a remote command transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptRecord {
    /// The parsed fingerprint.
    pub fingerprint: Fingerprint,
    /// Byte size, when the tool reports one (`cksum` does).
    pub size: Option<u64>,
    /// The path exactly as the remote tool printed it.
    pub file: String,
}

fn transcript_err(message: impl Into<String>) -> Error {
    Error::Transcript {
        message: message.into(),
    }
}

/// Parse POSIX `cksum` output: `<crc> <size> <path>` lines.
pub fn parse_posix_cksum(output: &str) -> Result<Vec<TranscriptRecord>> {
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let first_space = line
            .find(' ')
            .ok_or_else(|| transcript_err(format!("invalid cksum line: {line}")))?;
        let second_space = line[first_space + 1..]
            .find(' ')
            .map(|p| p + first_space + 1)
            .ok_or_else(|| transcript_err(format!("invalid cksum line: {line}")))?;

        let crc: u64 = line[..first_space]
            .trim()
            .parse()
            .map_err(|_| transcript_err(format!("invalid cksum value in line: {line}")))?;
        let size: u64 = line[first_space + 1..second_space]
            .trim()
            .parse()
            .map_err(|_| transcript_err(format!("invalid size value in line: {line}")))?;
        let file = line[second_space + 1..].trim().to_string();

        records.push(TranscriptRecord {
            fingerprint: Fingerprint::Cksum(crc),
            size: Some(size),
            file,
        });
    }

    Ok(records)
}

/// Parse POSIX hash-tool output (`md5sum`, `sha256sum`): `<hex> <path>`
/// lines. Hex is lower-cased; the `*` binary-mode marker is stripped.
pub fn parse_posix_hash(algo: FingerprintAlgo, output: &str) -> Result<Vec<TranscriptRecord>> {
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let space = line
            .find(' ')
            .ok_or_else(|| transcript_err(format!("invalid hash line: {line}")))?;

        let hex = line[..space].trim();
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(transcript_err(format!("invalid hash value in line: {line}")));
        }
        let file = line[space + 1..].trim().trim_start_matches('*').to_string();

        records.push(TranscriptRecord {
            fingerprint: Fingerprint::digest(algo, hex),
            size: None,
            file,
        });
    }

    Ok(records)
}

/// Parse PowerShell `Get-FileHash | Select-Object Hash, Path | Format-List`
/// output: `Hash:`/`Path:` key-value blocks.
///
/// Format-List wraps long values; a line without a colon is a wrapped
/// continuation of the pending path.
pub fn parse_powershell_hash(algo: FingerprintAlgo, output: &str) -> Result<Vec<TranscriptRecord>> {
    let mut records = Vec::new();
    let mut hash: Option<String> = None;
    let mut file: Option<String> = None;

    let mut flush = |hash: &mut Option<String>, file: &mut Option<String>| {
        if let (Some(h), Some(f)) = (hash.take(), file.take()) {
            records.push(TranscriptRecord {
                fingerprint: Fingerprint::digest(algo, h),
                size: None,
                file: f,
            });
        }
    };

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match line.find(':') {
            None => {
                // wrapped continuation of the previous Path value
                let fragment = line.trim();
                match file.as_mut() {
                    Some(f) => f.push_str(fragment),
                    None => {
                        return Err(transcript_err(format!(
                            "unexpected continuation line without a pending path: {line}"
                        )))
                    }
                }
            }
            Some(colon) => {
                let key = line[..colon].trim();
                let value = line[colon + 1..].trim();

                if key.eq_ignore_ascii_case("hash") {
                    // a new Hash begins the next block
                    flush(&mut hash, &mut file);
                    hash = Some(value.to_string());
                } else if key.eq_ignore_ascii_case("path") {
                    file = Some(value.to_string());
                } else {
                    return Err(transcript_err(format!(
                        "unexpected key '{key}' in Get-FileHash output"
                    )));
                }
            }
        }
    }

    flush(&mut hash, &mut file);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn cksum_line() {
        let records = parse_posix_cksum("1234567 42 file.txt\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fingerprint, Fingerprint::Cksum(1_234_567));
        assert_eq!(records[0].size, Some(42));
        assert_eq!(records[0].file, "file.txt");
    }

    #[test]
    fn cksum_tolerates_blank_lines_and_spaced_paths() {
        let output = "\n1 2 a.txt\n   \n3 4 dir/some file.txt\n";
        let records = parse_posix_cksum(output).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].file, "dir/some file.txt");
    }

    #[test]
    fn cksum_rejects_garbage() {
        assert!(parse_posix_cksum("not-a-number 42 f\n").is_err());
        assert!(parse_posix_cksum("singlefield\n").is_err());
    }

    #[test]
    fn posix_hash_line() {
        let records = parse_posix_hash(
            FingerprintAlgo::Md5,
            "d41d8cd98f00b204e9800998ecf8427e  file.txt\n",
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].fingerprint,
            Fingerprint::digest(FingerprintAlgo::Md5, "d41d8cd98f00b204e9800998ecf8427e")
        );
        assert_eq!(records[0].file, "file.txt");
    }

    #[rstest]
    #[case("ABCDEF1234567890ABCDEF1234567890 f.bin\n")]
    #[case("abcdef1234567890abcdef1234567890 *f.bin\n")]
    fn posix_hash_normalizes(#[case] output: &str) {
        let records = parse_posix_hash(FingerprintAlgo::Md5, output).unwrap();
        assert_eq!(
            records[0].fingerprint,
            Fingerprint::digest(FingerprintAlgo::Md5, "abcdef1234567890abcdef1234567890")
        );
        assert_eq!(records[0].file, "f.bin");
    }

    #[test]
    fn powershell_block() {
        let records =
            parse_powershell_hash(FingerprintAlgo::Md5, "Hash: ABCDEF\nPath: file.txt\n").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].fingerprint,
            Fingerprint::digest(FingerprintAlgo::Md5, "abcdef")
        );
        assert_eq!(records[0].file, "file.txt");
    }

    #[test]
    fn powershell_multiple_blocks_with_blank_separators() {
        let output = "\r\nHash : AAAA\r\nPath : C:\\one.txt\r\n\r\nHash : BBBB\r\nPath : C:\\two.txt\r\n\r\n";
        let records = parse_powershell_hash(FingerprintAlgo::Sha256, output).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].file, "C:\\one.txt");
        assert_eq!(records[1].file, "C:\\two.txt");
    }

    #[test]
    fn powershell_wrapped_path_lines() {
        let output = "Hash : CCCC\nPath : C:\\very\\long\\pa\n       th\\wrapped.txt\n";
        let records = parse_powershell_hash(FingerprintAlgo::Md5, output).unwrap();
        assert_eq!(records[0].file, "C:\\very\\long\\path\\wrapped.txt");
    }

    #[test]
    fn powershell_rejects_unknown_keys() {
        assert!(parse_powershell_hash(FingerprintAlgo::Md5, "Algorithm : MD5\n").is_err());
    }
}
