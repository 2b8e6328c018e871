//! `std::io` adapters that run data through a cipher operation.

use std::io::{self, Read, Write};

use crate::cipher::{CipherOperation, Direction};

/// Read granularity for [`DecryptingReader`].
const READ_CHUNK: usize = 8192;

/// Writer that encrypts everything written to it.
///
/// Dropping the writer without calling [`finish`](Self::finish) loses the
/// final block and the authentication tag.
#[derive(Debug)]
pub struct EncryptingWriter<W: Write> {
    operation: CipherOperation,
    inner: W,
}

impl<W: Write> EncryptingWriter<W> {
    /// Wrap `inner` with an encrypt operation.
    pub fn new(operation: CipherOperation, inner: W) -> Self {
        debug_assert_eq!(operation.direction(), Direction::Encrypt);
        Self { operation, inner }
    }

    /// Write the final block, flush, and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        let tail = self.operation.finish()?;
        self.inner.write_all(&tail)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let ready = self.operation.update(buf)?;
        self.inner.write_all(&ready)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that decrypts everything read through it.
///
/// Authentication failures surface as an `InvalidData` error from the read
/// that reaches end of input. Plaintext returned by earlier reads has not
/// been authenticated yet.
#[derive(Debug)]
pub struct DecryptingReader<R: Read> {
    operation: Option<CipherOperation>,
    inner: R,
    chunk: Vec<u8>,
    buffer: Vec<u8>,
    position: usize,
}

impl<R: Read> DecryptingReader<R> {
    /// Wrap `inner` with a decrypt operation.
    pub fn new(operation: CipherOperation, inner: R) -> Self {
        debug_assert_eq!(operation.direction(), Direction::Decrypt);
        Self {
            operation: Some(operation),
            inner,
            chunk: vec![0u8; READ_CHUNK],
            buffer: Vec::new(),
            position: 0,
        }
    }

    /// Return the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Refill `buffer` from the inner reader. Returns false at end of output.
    fn fill(&mut self) -> io::Result<bool> {
        while self.position == self.buffer.len() {
            if self.operation.is_none() {
                return Ok(false);
            }

            let read = self.inner.read(&mut self.chunk)?;
            let Some(mut operation) = self.operation.take() else {
                return Ok(false);
            };
            self.buffer = if read == 0 {
                operation.finish()?
            } else {
                let out = operation.update(&self.chunk[..read])?;
                self.operation = Some(operation);
                out
            };
            self.position = 0;
        }
        Ok(true)
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || !self.fill()? {
            return Ok(0);
        }

        let available = &self.buffer[self.position..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}
