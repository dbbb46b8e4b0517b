//! Out-of-band metadata for one encrypted artifact
//!
//! An [`EncryptedFile`] records everything needed to decrypt and verify a
//! ciphertext file except the key: the IV, the checksum of the original
//! plaintext, how many padding bytes encryption added, and where the
//! ciphertext lives. The descriptor references the ciphertext file but does
//! not own it; callers persist the two side by side.
//!
//! The serialized form is JSON with binary fields in unpadded base64url:
//!
//! ```json
//! {"iv":"...","digest":"sha1","checksum":"...","padding":14,"file":"/abs/path.enc"}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::checksum::{Checksum, DigestAlgorithm};
use crate::error::{ErrorCategory, ErrorKind, Result, StreamcryptError};

/// Where the ciphertext of an [`EncryptedFile`] lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiphertextLocation {
    /// Absolute path of an existing ciphertext file.
    File(PathBuf),
    /// The descriptor was persisted without a file reference.
    Detached,
}

impl CiphertextLocation {
    /// Resolves `path` to an absolute path. Fails if nothing exists there.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let resolved = fs::canonicalize(path).map_err(|e| {
            StreamcryptError::with_kind_and_source(
                ErrorCategory::Descriptor,
                ErrorKind::CiphertextMissing,
                format!("ciphertext file {} does not exist", path.display()),
                e,
            )
        })?;
        if !resolved.is_file() {
            return Err(StreamcryptError::with_kind(
                ErrorCategory::Descriptor,
                ErrorKind::CiphertextMissing,
                format!("ciphertext path {} is not a regular file", path.display()),
            ));
        }
        Ok(CiphertextLocation::File(resolved))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            CiphertextLocation::File(path) => Some(path),
            CiphertextLocation::Detached => None,
        }
    }
}

/// Descriptor of an encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EncryptedFileRecord", into = "EncryptedFileRecord")]
pub struct EncryptedFile {
    iv: Vec<u8>,
    checksum: Checksum,
    padding: usize,
    location: CiphertextLocation,
}

impl EncryptedFile {
    /// Builds a descriptor with no padding recorded.
    pub fn new(iv: Vec<u8>, checksum: Checksum, location: CiphertextLocation) -> Self {
        Self {
            iv,
            checksum,
            padding: 0,
            location,
        }
    }

    /// Builds a descriptor for the ciphertext at `path`, which must exist.
    pub fn create(
        iv: Vec<u8>,
        checksum: Checksum,
        padding: usize,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let location = CiphertextLocation::resolve(path)?;
        Ok(Self::new(iv, checksum, location).with_padding(padding))
    }

    /// Returns the descriptor with `padding` recorded.
    pub fn with_padding(self, padding: usize) -> Self {
        Self { padding, ..self }
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Checksum of the original plaintext.
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Number of bytes encryption added on top of the plaintext length.
    pub fn padding(&self) -> usize {
        self.padding
    }

    pub fn location(&self) -> &CiphertextLocation {
        &self.location
    }

    /// Shorthand for `location().path()`.
    pub fn path(&self) -> Option<&Path> {
        self.location.path()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            StreamcryptError::with_kind_and_source(
                ErrorCategory::Descriptor,
                ErrorKind::Serialization,
                "failed to serialize encrypted file descriptor",
                e,
            )
        })
    }

    /// Parses a descriptor. The referenced ciphertext file must exist.
    pub fn from_json(json: &str) -> Result<Self> {
        // Decoded in two steps so a missing ciphertext keeps its error kind.
        let record: EncryptedFileRecord = serde_json::from_str(json).map_err(|e| {
            StreamcryptError::with_kind_and_source(
                ErrorCategory::Descriptor,
                ErrorKind::Serialization,
                "failed to deserialize encrypted file descriptor",
                e,
            )
        })?;
        Self::try_from(record)
    }

    /// Persists the descriptor as JSON at `path`.
    ///
    /// The file is created with mode 0o600 (read/write for owner only) on Unix systems.
    pub fn write_sidecar(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        crate::file_ops::write_file_secure(path, json.as_bytes(), ErrorCategory::Descriptor)
    }

    /// Loads a descriptor previously stored with [`write_sidecar`](Self::write_sidecar).
    pub fn read_sidecar(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            StreamcryptError::with_kind_and_source(
                ErrorCategory::Descriptor,
                ErrorKind::Io,
                format!("failed to read from {}", path.display()),
                e,
            )
        })?;
        Self::from_json(&json)
    }
}

#[derive(Serialize, Deserialize)]
struct EncryptedFileRecord {
    iv: String,
    digest: DigestAlgorithm,
    checksum: String,
    padding: usize,
    file: Option<PathBuf>,
}

impl From<EncryptedFile> for EncryptedFileRecord {
    fn from(encrypted: EncryptedFile) -> Self {
        Self {
            iv: URL_SAFE_NO_PAD.encode(&encrypted.iv),
            digest: encrypted.checksum.algorithm(),
            checksum: URL_SAFE_NO_PAD.encode(encrypted.checksum.as_bytes()),
            padding: encrypted.padding,
            file: match encrypted.location {
                CiphertextLocation::File(path) => Some(path),
                CiphertextLocation::Detached => None,
            },
        }
    }
}

impl TryFrom<EncryptedFileRecord> for EncryptedFile {
    type Error = StreamcryptError;

    fn try_from(record: EncryptedFileRecord) -> Result<Self> {
        let iv = decode_field("iv", &record.iv)?;
        let checksum = Checksum::new(record.digest, decode_field("checksum", &record.checksum)?);
        let location = match record.file {
            Some(path) => CiphertextLocation::resolve(path)?,
            None => CiphertextLocation::Detached,
        };
        Ok(EncryptedFile::new(iv, checksum, location).with_padding(record.padding))
    }
}

fn decode_field(name: &str, encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(encoded).map_err(|e| {
        StreamcryptError::with_kind_and_source(
            ErrorCategory::Descriptor,
            ErrorKind::Serialization,
            format!("base64 decoding of {name} failed: {e}"),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_bytes;
    use tempfile::TempDir;

    fn sample(dir: &TempDir) -> (EncryptedFile, PathBuf) {
        let path = dir.path().join("sample.enc");
        fs::write(&path, [0u8; 32]).unwrap();
        let encrypted = EncryptedFile::create(
            vec![7u8; 16],
            digest_bytes(DigestAlgorithm::Sha1, b"plaintext"),
            14,
            &path,
        )
        .unwrap();
        (encrypted, path)
    }

    #[test]
    fn test_create_resolves_absolute_path() {
        let temp_dir = TempDir::new().unwrap();
        let (encrypted, path) = sample(&temp_dir);

        let stored = encrypted.path().unwrap();
        assert!(stored.is_absolute());
        assert_eq!(stored, fs::canonicalize(&path).unwrap());
        assert_eq!(encrypted.padding(), 14);
    }

    #[test]
    fn test_new_defaults_padding_to_zero() {
        let encrypted = EncryptedFile::new(
            vec![0u8; 16],
            Checksum::new(DigestAlgorithm::Sha1, vec![0u8; 20]),
            CiphertextLocation::Detached,
        );
        assert_eq!(encrypted.padding(), 0);
        assert_eq!(encrypted.path(), None);
    }

    #[test]
    fn test_create_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = EncryptedFile::create(
            vec![0u8; 16],
            Checksum::new(DigestAlgorithm::Sha1, vec![0u8; 20]),
            0,
            temp_dir.path().join("non-existing_file.doc"),
        )
        .expect_err("expected missing file error");

        assert_eq!(err.category, ErrorCategory::Descriptor);
        assert_eq!(err.kind, Some(ErrorKind::CiphertextMissing));
    }

    #[test]
    fn test_create_rejects_directory() {
        let temp_dir = TempDir::new().unwrap();
        let err = EncryptedFile::create(
            vec![0u8; 16],
            Checksum::new(DigestAlgorithm::Sha1, vec![0u8; 20]),
            0,
            temp_dir.path(),
        )
        .expect_err("expected not-a-file error");
        assert_eq!(err.kind, Some(ErrorKind::CiphertextMissing));
    }

    #[test]
    fn test_json_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let (encrypted, _) = sample(&temp_dir);

        let json = encrypted.to_json().unwrap();
        assert!(json.contains("\"digest\":\"sha1\""));
        assert!(json.contains("\"padding\":14"));

        let restored = EncryptedFile::from_json(&json).unwrap();
        assert_eq!(restored, encrypted);
    }

    #[test]
    fn test_detached_roundtrip() {
        let encrypted = EncryptedFile::new(
            vec![1u8; 8],
            Checksum::new(DigestAlgorithm::Sha256, vec![2u8; 32]),
            CiphertextLocation::Detached,
        )
        .with_padding(3);

        let json = encrypted.to_json().unwrap();
        assert!(json.contains("\"file\":null"));
        let restored = EncryptedFile::from_json(&json).unwrap();
        assert_eq!(restored.location(), &CiphertextLocation::Detached);
        assert_eq!(restored, encrypted);
    }

    #[test]
    fn test_deserialize_missing_file_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let (encrypted, path) = sample(&temp_dir);
        let json = encrypted.to_json().unwrap();

        fs::remove_file(&path).unwrap();
        let err = EncryptedFile::from_json(&json).expect_err("expected missing file error");
        assert_eq!(err.category, ErrorCategory::Descriptor);
        assert_eq!(err.kind, Some(ErrorKind::CiphertextMissing));

        // Through serde directly the failure is just as eager.
        assert!(serde_json::from_str::<EncryptedFile>(&json).is_err());
    }

    #[test]
    fn test_deserialize_bad_base64() {
        let json = r#"{"iv":"bad$$","digest":"sha1","checksum":"","padding":0,"file":null}"#;
        let err = EncryptedFile::from_json(json).expect_err("expected decode error");
        assert_eq!(err.kind, Some(ErrorKind::Serialization));
    }

    #[test]
    fn test_sidecar_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let (encrypted, _) = sample(&temp_dir);
        let sidecar = temp_dir.path().join("sample.enc.json");

        encrypted.write_sidecar(&sidecar).unwrap();
        let restored = EncryptedFile::read_sidecar(&sidecar).unwrap();
        assert_eq!(restored, encrypted);
    }
}
