//! Fingerprint value types
//!
//! A fingerprint is the derived value used to decide content equality
//! without a full byte comparison. The computation lives in
//! `volsync-fingerprint`; these are the values that flow through entries
//! and plans.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fingerprint algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintAlgo {
    /// POSIX `cksum`: CRC-32 over polynomial 0x04C11DB7 with the input
    /// length folded in. Cheap everywhere a POSIX shell exists.
    Cksum,
    /// MD5 digest. Stronger collision resistance than cksum, available as
    /// `md5sum` and via PowerShell `Get-FileHash`.
    Md5,
    /// SHA-256 digest.
    Sha256,
}

impl FingerprintAlgo {
    /// The default negotiation preference, cheapest first.
    pub const DEFAULT_PREFERENCE: [Self; 2] = [Self::Cksum, Self::Md5];

    /// Short lowercase name, matching the POSIX tool naming.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cksum => "cksum",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for FingerprintAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed content fingerprint.
///
/// Equal fingerprints imply content equality with negligible collision
/// probability for the chosen algorithm; unequal fingerprints always imply
/// different content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fingerprint {
    /// POSIX cksum value (unsigned 32-bit, widened).
    Cksum(u64),
    /// A cryptographic digest as lowercase hex.
    Digest {
        /// Digest algorithm.
        algo: FingerprintAlgo,
        /// Lowercase hexadecimal digest.
        hex: String,
    },
}

impl Fingerprint {
    /// Build a digest fingerprint, folding the hex to lowercase so that
    /// values from different producers (`md5sum` vs `Get-FileHash`)
    /// compare equal.
    pub fn digest(algo: FingerprintAlgo, hex: impl AsRef<str>) -> Self {
        Self::Digest {
            algo,
            hex: hex.as_ref().to_lowercase(),
        }
    }

    /// The algorithm that produced this fingerprint.
    pub fn algo(&self) -> FingerprintAlgo {
        match self {
            Self::Cksum(_) => FingerprintAlgo::Cksum,
            Self::Digest { algo, .. } => *algo,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cksum(value) => write!(f, "cksum:{value}"),
            Self::Digest { algo, hex } => write!(f, "{algo}:{hex}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_folds_case() {
        let a = Fingerprint::digest(FingerprintAlgo::Md5, "ABCDEF");
        let b = Fingerprint::digest(FingerprintAlgo::Md5, "abcdef");
        assert_eq!(a, b);
    }

    #[test]
    fn algos_are_distinct() {
        let md5 = Fingerprint::digest(FingerprintAlgo::Md5, "00");
        let sha = Fingerprint::digest(FingerprintAlgo::Sha256, "00");
        assert_ne!(md5, sha);
    }
}
