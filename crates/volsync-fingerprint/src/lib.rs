//! Content fingerprinting for volsync
//!
//! This crate computes the fingerprints the diff engine compares, and
//! parses the transcripts remote fingerprint commands produce:
//!
//! - **cksum**: the POSIX CRC-32 + length checksum, implemented
//!   incrementally so streams of any size hash in constant memory
//! - **Digests**: MD5 and SHA-256 via the RustCrypto implementations
//! - **Transcripts**: parsers normalizing POSIX `cksum` lines, POSIX
//!   hash-tool lines and PowerShell `Get-FileHash` output into one
//!   uniform record shape
//!
//! Which command produced a fingerprint is a volume concern; the values
//! that come out of here compare equal regardless of producer.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cksum;
pub mod digest;
pub mod transcript;

pub use cksum::{cksum_bytes, cksum_reader, CksumHasher};
pub use digest::{digest_bytes, digest_reader, hash_reader};
pub use transcript::{
    parse_posix_cksum, parse_posix_hash, parse_powershell_hash, TranscriptRecord,
};
