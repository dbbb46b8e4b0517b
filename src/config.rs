//! Engine configuration
//!
//! [`EngineConfig`] is an immutable value: every `with_*` method consumes the
//! config and returns a changed copy. An engine built from a config never
//! observes a later change.

use std::fmt;

use zeroize::Zeroizing;

use crate::checksum::DigestAlgorithm;
use crate::cipher::{self, CipherId, Mode};

/// Default number of bytes moved per iteration of the read/transform/write loop.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Symmetric key material
///
/// The bytes are wiped from memory when the key is dropped and never
/// appear in `Debug` output.
#[derive(Clone)]
pub struct Key(Zeroizing<Vec<u8>>);

impl Key {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key([REDACTED; {}])", self.0.len())
    }
}

/// Everything an engine needs besides its randomness sources.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    key: Key,
    cipher: CipherId,
    mode: Mode,
    chunk_size: usize,
    digest: DigestAlgorithm,
}

impl EngineConfig {
    /// AES-256 in CBC mode, 8192-byte chunks, SHA-1 checksums.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            cipher: CipherId::default(),
            mode: Mode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            digest: DigestAlgorithm::default(),
        }
    }

    pub fn with_key(self, key: Key) -> Self {
        Self { key, ..self }
    }

    pub fn with_cipher(self, cipher: CipherId) -> Self {
        Self { cipher, ..self }
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        Self { mode, ..self }
    }

    /// Zero is treated as one byte.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..self
        }
    }

    pub fn with_digest(self, digest: DigestAlgorithm) -> Self {
        Self { digest, ..self }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn cipher(&self) -> CipherId {
        self.cipher
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// IV and padding unit for the configured (cipher, mode) pair.
    pub fn block_size(&self) -> usize {
        cipher::block_size(self.cipher, self.mode)
    }
}
