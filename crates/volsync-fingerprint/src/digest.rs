//! Cryptographic digests
//!
//! MD5 and SHA-256 via the RustCrypto implementations, emitted as
//! lowercase hex to match the output of `md5sum`/`sha256sum`.

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use volsync_types::{Error, Fingerprint, FingerprintAlgo, RelPath, Result};

use crate::cksum::{cksum_bytes, cksum_reader};

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX_CHARS[(b >> 4) as usize] as char);
        out.push(HEX_CHARS[(b & 0x0F) as usize] as char);
    }
    out
}

/// Fingerprint an in-memory buffer with any supported algorithm.
pub fn digest_bytes(algo: FingerprintAlgo, data: &[u8]) -> Fingerprint {
    match algo {
        FingerprintAlgo::Cksum => Fingerprint::Cksum(cksum_bytes(data)),
        FingerprintAlgo::Md5 => {
            let mut hasher = Md5::new();
            hasher.update(data);
            Fingerprint::digest(algo, hex_lower(&hasher.finalize()))
        }
        FingerprintAlgo::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            Fingerprint::digest(algo, hex_lower(&hasher.finalize()))
        }
    }
}

/// Fingerprint an async byte stream with any supported algorithm.
///
/// This is the stream-and-hash fallback used when a volume cannot produce
/// a fingerprint natively. Reads to EOF; the reader is not closed.
pub async fn digest_reader<R>(algo: FingerprintAlgo, rel: &RelPath, reader: R) -> Result<Fingerprint>
where
    R: AsyncRead + Unpin,
{
    match algo {
        FingerprintAlgo::Cksum => cksum_reader(rel, reader).await,
        FingerprintAlgo::Md5 => hash_reader::<Md5, _>(algo, rel, reader).await,
        FingerprintAlgo::Sha256 => hash_reader::<Sha256, _>(algo, rel, reader).await,
    }
}

/// Stream a reader through a [`Digest`] implementation.
pub async fn hash_reader<D, R>(algo: FingerprintAlgo, rel: &RelPath, mut reader: R) -> Result<Fingerprint>
where
    D: Digest,
    R: AsyncRead + Unpin,
{
    let mut hasher = D::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| Error::Io {
            rel: rel.clone(),
            message: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Fingerprint::digest(algo, hex_lower(&hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_empty_vector() {
        let fp = digest_bytes(FingerprintAlgo::Md5, b"");
        assert_eq!(
            fp,
            Fingerprint::digest(FingerprintAlgo::Md5, "d41d8cd98f00b204e9800998ecf8427e")
        );
    }

    #[test]
    fn md5_abc_vector() {
        let fp = digest_bytes(FingerprintAlgo::Md5, b"abc");
        assert_eq!(
            fp,
            Fingerprint::digest(FingerprintAlgo::Md5, "900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn sha256_empty_vector() {
        let fp = digest_bytes(FingerprintAlgo::Sha256, b"");
        assert_eq!(
            fp,
            Fingerprint::digest(
                FingerprintAlgo::Sha256,
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            )
        );
    }

    #[tokio::test]
    async fn reader_matches_bytes() {
        let data = b"some file content".to_vec();
        let rel = RelPath::new("f").unwrap();
        for algo in [
            FingerprintAlgo::Cksum,
            FingerprintAlgo::Md5,
            FingerprintAlgo::Sha256,
        ] {
            let streamed = digest_reader(algo, &rel, &data[..]).await.unwrap();
            assert_eq!(streamed, digest_bytes(algo, &data));
        }
    }
}
