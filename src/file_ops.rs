//! Streaming file encryption/decryption
//!
//! [`FileEncrypter`] moves files through a cipher transform in fixed-size
//! chunks, so memory use is bounded by the chunk size and not by the file
//! size. Integrity is layered on top: the plaintext checksum recorded at
//! encryption time is checked against the decrypted output.
//!
//! Failure cleanup is deliberately asymmetric:
//! - a failed [`encrypt`](FileEncrypter::encrypt) leaves any partially
//!   written ciphertext in place for the caller to remove;
//! - a [`decrypt`](FileEncrypter::decrypt) whose output fails checksum
//!   verification deletes that output before returning the error.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::checksum::{self, DigestAlgorithm, Hasher};
use crate::cipher::{self, CipherId, Mode};
use crate::config::{EngineConfig, Key};
use crate::encrypted_file::EncryptedFile;
use crate::error::{ErrorCategory, ErrorKind, Result, StreamcryptError};
use crate::random::{IvGenerator, RandomSource};
use crate::stream::{ChunkReader, DecryptingReader, EncryptingWriter};

/// Encrypts and decrypts files with one fixed configuration.
///
/// The configuration cannot change under a running operation: the `with_*`
/// methods consume the engine and return a new one. Share an engine across
/// threads freely, or build one per thread.
#[derive(Debug, Clone)]
pub struct FileEncrypter {
    config: EngineConfig,
    block_size: usize,
    chunk_size: usize,
    ivs: IvGenerator,
}

impl FileEncrypter {
    /// Engine with the default configuration (AES-256-CBC, SHA-1 checksums).
    pub fn new(key: Key) -> Self {
        Self::from_config(EngineConfig::new(key))
    }

    pub fn from_config(config: EngineConfig) -> Self {
        let block_size = config.block_size();
        Self {
            block_size,
            chunk_size: aligned_chunk_size(config.chunk_size(), block_size),
            config,
            ivs: IvGenerator::default(),
        }
    }

    pub fn with_key(self, key: Key) -> Self {
        self.reconfigure(|c| c.with_key(key))
    }

    pub fn with_cipher(self, cipher: CipherId) -> Self {
        self.reconfigure(|c| c.with_cipher(cipher))
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        self.reconfigure(|c| c.with_mode(mode))
    }

    /// See [`chunk_size`](Self::chunk_size) for how the value is aligned.
    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        self.reconfigure(|c| c.with_chunk_size(chunk_size))
    }

    pub fn with_digest(self, digest: DigestAlgorithm) -> Self {
        self.reconfigure(|c| c.with_digest(digest))
    }

    /// Replaces the IV randomness sources, highest priority first.
    pub fn with_random_sources(self, sources: Vec<Arc<dyn RandomSource>>) -> Self {
        Self {
            ivs: IvGenerator::new(sources),
            ..self
        }
    }

    fn reconfigure(self, change: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        let config = change(self.config);
        let block_size = config.block_size();
        Self {
            block_size,
            chunk_size: aligned_chunk_size(config.chunk_size(), block_size),
            config,
            ivs: self.ivs,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// IV size and padding unit of the configured (cipher, mode) pair.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes moved per pipeline iteration: the configured chunk size rounded
    /// up to a whole number of blocks.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt the file at `source` into `target`.
    ///
    /// The target is created (or truncated) with mode 0o600 on Unix systems.
    /// If this fails after the target was opened, the partial ciphertext is
    /// left behind.
    pub fn encrypt(&self, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<EncryptedFile> {
        let source = source.as_ref();
        let target = target.as_ref();
        debug!(source = %source.display(), target = %target.display(), "encrypting file");

        let iv = self
            .ivs
            .generate(self.block_size)
            .map_err(|e| e.with_context("failed to generate IV"))?;
        let input = File::open(source).map_err(|e| read_error(ErrorCategory::Encrypt, source, e))?;
        let transform = cipher::new_encryptor(
            self.config.cipher(),
            self.config.mode(),
            self.config.key().as_bytes(),
            &iv,
        )
        .map_err(|e| e.with_context("failed to set up encryption"))?;

        let output = create_output(target, ErrorCategory::Encrypt)?;
        let mut writer = EncryptingWriter::new(BufWriter::new(output), transform);
        let mut chunks = ChunkReader::new(input, self.chunk_size);
        let mut hasher = Hasher::new(self.config.digest());
        let mut plaintext_len: u64 = 0;

        while let Some(chunk) = chunks
            .next_chunk()
            .map_err(|e| read_error(ErrorCategory::Encrypt, source, e))?
        {
            hasher.update(&chunk.data);
            plaintext_len += chunk.data.len() as u64;
            writer.write_all(&chunk.data).map_err(|e| {
                StreamcryptError::from_io(
                    ErrorCategory::Encrypt,
                    e,
                    format!("failed to write to {}", target.display()),
                )
            })?;
        }
        let (_, ciphertext_len) = writer
            .finish()
            .map_err(|e| e.with_context(format!("failed to write to {}", target.display())))?;

        let padding = ciphertext_len
            .checked_sub(plaintext_len)
            .and_then(|p| usize::try_from(p).ok())
            .ok_or_else(|| {
                StreamcryptError::with_kind(
                    ErrorCategory::Encrypt,
                    ErrorKind::InternalInvariant,
                    format!(
                        "ciphertext ({ciphertext_len} bytes) shorter than plaintext ({plaintext_len} bytes)"
                    ),
                )
            })?;
        debug!(plaintext_len, ciphertext_len, padding, "encryption complete");

        EncryptedFile::create(iv, hasher.finalize(), padding, target)
            .map_err(|e| e.with_category(ErrorCategory::Encrypt, "failed to describe ciphertext"))
    }

    /// Decrypt the ciphertext described by `encrypted` into `target`.
    ///
    /// Only the tail of the final chunk loses the recorded padding. The output
    /// is then checked against the plaintext checksum; on mismatch it is
    /// deleted and a [`ErrorKind::ChecksumMismatch`] error is returned.
    pub fn decrypt(&self, encrypted: &EncryptedFile, target: impl AsRef<Path>) -> Result<PathBuf> {
        let target = target.as_ref();
        let reader = self.open_decrypting(encrypted)?;
        debug!(target = %target.display(), padding = encrypted.padding(), "decrypting file");

        let output = create_output(target, ErrorCategory::Decrypt)?;
        let mut writer = BufWriter::new(output);
        let mut chunks = ChunkReader::new(reader, self.chunk_size);
        let padding = encrypted.padding();

        while let Some(chunk) = chunks.next_chunk().map_err(|e| {
            StreamcryptError::from_io(ErrorCategory::Decrypt, e, "failed to decrypt ciphertext")
        })? {
            let mut data = chunk.data;
            if chunk.last && padding > 0 {
                data.truncate(data.len().saturating_sub(padding));
            }
            writer.write_all(&data).map_err(|e| write_error(target, e))?;
        }
        writer.flush().map_err(|e| write_error(target, e))?;
        drop(writer);

        let valid = checksum::verify_file(target, encrypted.checksum())
            .map_err(|e| e.with_category(ErrorCategory::Decrypt, "failed to verify decrypted file"))?;
        if !valid {
            warn!(target = %target.display(), "checksum mismatch, removing decrypted output");
            if let Err(e) = fs::remove_file(target) {
                warn!(target = %target.display(), "failed to remove invalid output: {e}");
            }
            return Err(StreamcryptError::with_kind(
                ErrorCategory::Decrypt,
                ErrorKind::ChecksumMismatch,
                "invalid checksum on decrypted file",
            ));
        }

        debug!(target = %target.display(), "decryption verified");
        Ok(target.to_path_buf())
    }

    /// Decrypt lazily, one chunk at a time.
    ///
    /// Unlike [`decrypt`](Self::decrypt) this neither strips padding nor
    /// verifies the checksum: the final chunk still carries the pad bytes,
    /// and a wrong key or IV yields garbage without an error. Callers that
    /// need those guarantees must apply them to the collected output.
    pub fn stream_decrypt(&self, encrypted: &EncryptedFile) -> Result<DecryptedChunks> {
        let reader = self.open_decrypting(encrypted)?;
        Ok(DecryptedChunks {
            chunks: ChunkReader::new(reader, self.chunk_size),
            position: 0,
            done: false,
        })
    }

    /// Callback form of [`stream_decrypt`](Self::stream_decrypt): `on_chunk`
    /// runs exactly once per chunk with the chunk and the stream it came from.
    pub fn stream_decrypt_with<F>(&self, encrypted: &EncryptedFile, mut on_chunk: F) -> Result<()>
    where
        F: FnMut(&[u8], &DecryptedChunks),
    {
        let mut chunks = self.stream_decrypt(encrypted)?;
        while let Some(chunk) = chunks.next_chunk()? {
            on_chunk(&chunk, &chunks);
        }
        Ok(())
    }

    fn open_decrypting(&self, encrypted: &EncryptedFile) -> Result<DecryptingReader<BufReader<File>>> {
        let source = encrypted.path().ok_or_else(|| {
            StreamcryptError::with_kind(
                ErrorCategory::Decrypt,
                ErrorKind::CiphertextMissing,
                "encrypted file has no ciphertext location",
            )
        })?;
        let input = File::open(source).map_err(|e| read_error(ErrorCategory::Decrypt, source, e))?;
        let transform = cipher::new_decryptor(
            self.config.cipher(),
            self.config.mode(),
            self.config.key().as_bytes(),
            encrypted.iv(),
        )
        .map_err(|e| e.with_context("failed to set up decryption"))?;
        Ok(DecryptingReader::new(
            BufReader::new(input),
            transform,
            self.chunk_size,
        ))
    }
}

/// Lazy, finite, non-restartable sequence of decrypted chunks.
///
/// Every chunk is exactly [`FileEncrypter::chunk_size`] bytes except the last. After
/// the stream ends or an error is yielded, the iterator stays exhausted.
pub struct DecryptedChunks {
    chunks: ChunkReader<DecryptingReader<BufReader<File>>>,
    position: u64,
    done: bool,
}

impl DecryptedChunks {
    /// Plaintext bytes handed out so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the next chunk, or `None` at end-of-stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        match self.chunks.next_chunk() {
            Ok(Some(chunk)) => {
                self.position += chunk.data.len() as u64;
                if chunk.last {
                    self.done = true;
                }
                Ok(Some(chunk.data))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(StreamcryptError::from_io(
                    ErrorCategory::Decrypt,
                    e,
                    "failed to decrypt ciphertext",
                ))
            }
        }
    }
}

impl Iterator for DecryptedChunks {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// A final chunk of at least one block always holds the whole CBC padding.
fn aligned_chunk_size(chunk_size: usize, block_size: usize) -> usize {
    let block_size = block_size.max(1);
    chunk_size.max(1).div_ceil(block_size) * block_size
}

/// Creates (or truncates) an output file with secure permissions (0o600 on Unix).
fn create_output(path: &Path, category: ErrorCategory) -> Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|e| {
        StreamcryptError::with_kind_and_source(
            category,
            ErrorKind::Io,
            format!("failed to open {}", path.display()),
            e,
        )
    })
}

/// Writes `contents` to `path`, creating the file with mode 0o600 on Unix.
pub(crate) fn write_file_secure(path: &Path, contents: &[u8], category: ErrorCategory) -> Result<()> {
    let mut file = create_output(path, category)?;
    file.write_all(contents).map_err(|e| {
        StreamcryptError::with_kind_and_source(
            category,
            ErrorKind::Io,
            format!("failed to write {}", path.display()),
            e,
        )
    })
}

fn read_error(category: ErrorCategory, path: &Path, err: io::Error) -> StreamcryptError {
    let kind = match (err.kind(), category) {
        (io::ErrorKind::NotFound, ErrorCategory::Encrypt) => ErrorKind::SourceMissing,
        (io::ErrorKind::NotFound, _) => ErrorKind::CiphertextMissing,
        _ => ErrorKind::Io,
    };
    StreamcryptError::with_kind_and_source(
        category,
        kind,
        format!("failed to read from {}", path.display()),
        err,
    )
}

fn write_error(path: &Path, err: io::Error) -> StreamcryptError {
    StreamcryptError::with_kind_and_source(
        ErrorCategory::Decrypt,
        ErrorKind::Io,
        format!("failed to write to {}", path.display()),
        err,
    )
}
