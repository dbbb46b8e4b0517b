//! Streamcrypt - Chunked streaming file encryption with out-of-band integrity metadata

#![forbid(unsafe_code)]

pub mod checksum;
pub mod cipher;
pub mod config;
pub mod encrypted_file;
pub mod error;
pub mod file_ops;
pub mod random;
pub mod stream;

pub use checksum::{Checksum, DigestAlgorithm};
pub use cipher::{CipherId, Mode};
pub use config::{EngineConfig, Key};
pub use encrypted_file::{CiphertextLocation, EncryptedFile};
pub use error::{ErrorCategory, ErrorKind, Result, StreamcryptError};
pub use file_ops::{DecryptedChunks, FileEncrypter};
