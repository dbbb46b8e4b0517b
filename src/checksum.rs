//! Content digests used for end-to-end integrity checks
//!
//! The checksum of the original plaintext is computed at encryption time and
//! compared against the reconstructed plaintext after decryption. It detects
//! corruption and wrong keys or IVs; it is not a cryptographic authenticator.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{ErrorCategory, ErrorKind, Result, StreamcryptError};

const READ_BUF_LEN: usize = 8192;

/// Digest algorithms available for checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlgorithm {
    /// 160-bit SHA-1.
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }
}

/// A digest value tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl Checksum {
    pub fn new(algorithm: DigestAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.bytes {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Incremental digest over streamed bytes
#[derive(Clone)]
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            Hasher::Sha1(h) => Checksum::new(DigestAlgorithm::Sha1, h.finalize().to_vec()),
            Hasher::Sha256(h) => Checksum::new(DigestAlgorithm::Sha256, h.finalize().to_vec()),
        }
    }
}

/// Digest of a byte slice.
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Digest everything `reader` yields until end-of-stream.
pub fn digest_reader(algorithm: DigestAlgorithm, reader: &mut dyn Read) -> io::Result<Checksum> {
    let mut hasher = Hasher::new(algorithm);
    let mut buf = [0u8; READ_BUF_LEN];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Digest the contents of a file.
pub fn digest_file(algorithm: DigestAlgorithm, path: &Path) -> Result<Checksum> {
    let mut file = File::open(path).map_err(|e| digest_error(path, e))?;
    digest_reader(algorithm, &mut file).map_err(|e| digest_error(path, e))
}

/// Whether the file at `path` has the `expected` checksum.
///
/// Plain byte equality; the comparison is not constant-time.
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<bool> {
    let actual = digest_file(expected.algorithm(), path)?;
    Ok(actual == *expected)
}

fn digest_error(path: &Path, err: io::Error) -> StreamcryptError {
    StreamcryptError::with_kind_and_source(
        ErrorCategory::Digest,
        ErrorKind::Io,
        format!("failed to digest {}", path.display()),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sha1_known_value() {
        let checksum = digest_bytes(DigestAlgorithm::Sha1, b"abc");
        assert_eq!(
            checksum.to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(checksum.as_bytes().len(), DigestAlgorithm::Sha1.output_len());
    }

    #[test]
    fn test_sha256_known_value() {
        let checksum = digest_bytes(DigestAlgorithm::Sha256, b"");
        assert_eq!(
            checksum.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data: Vec<u8> = (0..=255).cycle().take(3 * READ_BUF_LEN + 17).collect();
        let mut hasher = Hasher::new(DigestAlgorithm::Sha1);
        for piece in data.chunks(1000) {
            hasher.update(piece);
        }
        assert_eq!(hasher.finalize(), digest_bytes(DigestAlgorithm::Sha1, &data));
    }

    #[test]
    fn test_verify_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.bin");
        fs::write(&path, b"{\"unit\":\"test\"}").unwrap();

        let expected = digest_file(DigestAlgorithm::Sha1, &path).unwrap();
        assert!(verify_file(&path, &expected).unwrap());

        let wrong = Checksum::new(DigestAlgorithm::Sha1, vec![0u8; 20]);
        assert!(!verify_file(&path, &wrong).unwrap());
    }

    #[test]
    fn test_digest_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = digest_file(DigestAlgorithm::Sha1, &temp_dir.path().join("nope"))
            .expect_err("expected missing file error");
        assert_eq!(err.category, ErrorCategory::Digest);
        assert_eq!(err.kind, Some(ErrorKind::Io));
    }
}
