use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Which part of the pipeline produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Failure anywhere in the encrypt pipeline: reading the source, generating
    /// the IV, running the encrypting transform or writing the ciphertext.
    ///
    /// An error in this category never comes with a usable descriptor.
    Encrypt,

    /// Failure anywhere in the decrypt or stream-decrypt pipeline, including
    /// a checksum mismatch after full decryption.
    Decrypt,

    /// An encrypted file descriptor could not be constructed, serialized or
    /// deserialized.
    Descriptor,

    /// A standalone checksum helper failed. The engine rewraps these into
    /// `Encrypt` or `Decrypt` before they reach its callers.
    Digest,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The plaintext source file does not exist.
    SourceMissing,
    /// The ciphertext referenced by a descriptor does not exist, or the
    /// descriptor carries no ciphertext location at all.
    CiphertextMissing,
    /// The key length does not match what the cipher requires.
    InvalidKey,
    /// The IV length does not match the cipher's block size.
    InvalidIv,
    /// The cipher transform rejected its input (e.g. truncated ciphertext).
    Transform,
    /// The decrypted output does not match the checksum of the original plaintext.
    ChecksumMismatch,
    /// No configured randomness source could produce bytes.
    RandomnessUnavailable,
    /// A descriptor could not be encoded or decoded.
    Serialization,
    /// Unexpected state reached within streamcrypt logic.
    InternalInvariant,
    /// Interaction with the filesystem or another I/O stream failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct StreamcryptError {
    /// Pipeline the error belongs to, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl StreamcryptError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        self.with_category(category, msg)
    }

    /// Like [`with_context`](Self::with_context), but moves the error into
    /// another category. The kind is kept.
    pub fn with_category(self, category: ErrorCategory, msg: impl Into<String>) -> Self {
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Converts an I/O error raised while driving a cipher stream.
    ///
    /// The stream adapters smuggle transform failures through `io::Error`;
    /// those are unwrapped so the original kind survives.
    pub(crate) fn from_io(category: ErrorCategory, err: io::Error, msg: impl Into<String>) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<StreamcryptError>())
        {
            let msg = msg.into();
            return match err.into_inner().map(|inner| inner.downcast::<StreamcryptError>()) {
                Some(Ok(inner)) => inner.with_category(category, msg),
                _ => Self::with_kind(category, ErrorKind::InternalInvariant, msg),
            };
        }
        Self::with_kind_and_source(category, ErrorKind::Io, msg, err)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, StreamcryptError>;
