//! Stream adapters that put a cipher transform between a reader or writer
//! and its caller, plus the fixed-size chunker the file pipelines loop over.

use std::io::{self, Read, Write};

use crate::cipher::CipherTransform;
use crate::error::{ErrorCategory, Result, StreamcryptError};

/// Writer that encrypts everything written to it before passing it on.
///
/// [`finish`](Self::finish) must be called to flush the final block and its
/// padding; dropping the writer without finishing loses them.
pub struct EncryptingWriter<W: Write> {
    inner: W,
    transform: Option<Box<dyn CipherTransform>>,
    scratch: Vec<u8>,
    written: u64,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new(inner: W, transform: Box<dyn CipherTransform>) -> Self {
        Self {
            inner,
            transform: Some(transform),
            scratch: Vec::new(),
            written: 0,
        }
    }

    /// Flushes the transform and the inner writer, returning the inner writer
    /// and the total number of ciphertext bytes written.
    pub fn finish(mut self) -> Result<(W, u64)> {
        if let Some(transform) = self.transform.take() {
            self.scratch.clear();
            transform.finish(&mut self.scratch)?;
            self.inner.write_all(&self.scratch).map_err(|e| {
                StreamcryptError::from_io(ErrorCategory::Encrypt, e, "failed to write final block")
            })?;
            self.written += self.scratch.len() as u64;
        }
        self.inner.flush().map_err(|e| {
            StreamcryptError::from_io(ErrorCategory::Encrypt, e, "failed to flush ciphertext")
        })?;
        Ok((self.inner, self.written))
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(transform) = self.transform.as_mut() else {
            return Err(io::Error::other("write after finish"));
        };
        self.scratch.clear();
        transform
            .update(buf, &mut self.scratch)
            .map_err(io::Error::other)?;
        self.inner.write_all(&self.scratch)?;
        self.written += self.scratch.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that decrypts the bytes of an inner ciphertext reader.
///
/// Padding is passed through untouched. Transform failures surface as
/// `io::Error`s wrapping a [`StreamcryptError`].
pub struct DecryptingReader<R: Read> {
    inner: R,
    transform: Option<Box<dyn CipherTransform>>,
    read_buf: Vec<u8>,
    plain: Vec<u8>,
    pos: usize,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(inner: R, transform: Box<dyn CipherTransform>, buf_len: usize) -> Self {
        Self {
            inner,
            transform: Some(transform),
            read_buf: vec![0u8; buf_len.max(1)],
            plain: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.plain.len() {
                let n = out.len().min(self.plain.len() - self.pos);
                out[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            self.plain.clear();
            self.pos = 0;

            if self.transform.is_none() {
                return Ok(0);
            }
            let n = self.inner.read(&mut self.read_buf)?;
            if n == 0 {
                if let Some(transform) = self.transform.take() {
                    transform
                        .finish(&mut self.plain)
                        .map_err(io::Error::other)?;
                }
            } else if let Some(transform) = self.transform.as_mut() {
                transform
                    .update(&self.read_buf[..n], &mut self.plain)
                    .map_err(io::Error::other)?;
            }
        }
    }
}

/// One fixed-size piece of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
    /// Set on the final chunk of the stream.
    pub last: bool,
}

/// Splits a reader into chunks of exactly `chunk_size` bytes (the last one
/// may be shorter), reading one chunk ahead so the final chunk is known to
/// be final when it is handed out. A stream whose length is an exact
/// multiple of the chunk size still gets its last chunk flagged.
pub struct ChunkReader<R: Read> {
    inner: R,
    chunk_size: usize,
    ahead: Option<Vec<u8>>,
    started: bool,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            chunk_size: chunk_size.max(1),
            ahead: None,
            started: false,
        }
    }

    /// Returns the next chunk, or `None` at end-of-stream.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        let current = match self.ahead.take() {
            Some(chunk) => chunk,
            None if !self.started => {
                self.started = true;
                self.fill_chunk()?
            }
            None => return Ok(None),
        };
        if current.is_empty() {
            return Ok(None);
        }

        let next = self.fill_chunk()?;
        let last = next.is_empty();
        if !last {
            self.ahead = Some(next);
        }
        Ok(Some(Chunk {
            data: current,
            last,
        }))
    }

    /// Reads until a full chunk is buffered or the stream ends.
    fn fill_chunk(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
