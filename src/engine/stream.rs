//! Chunked file reading shared by workers (inline reads) and the writer (streamed units).
//!
//! Every chunk boundary checks the cancellation token and the per-file deadline, and bytes
//! are decoded as UTF-8 across boundaries so a multi-byte character is never split.

use std::io::{self, Read, Seek, SeekFrom};
use std::time::Instant;

use crate::engine::format::{TextShape, TextShapeScanner};
use crate::pipeline::CancelToken;
use crate::utils::config::SCAN_BUF_LEN;

/// Why a chunked read stopped early.
#[derive(Debug)]
pub enum ChunkError {
    Io(io::Error),
    /// Per-file deadline passed at a chunk boundary.
    TimedOut,
    /// Run cancellation observed at a chunk boundary.
    Cancelled,
}

impl From<io::Error> for ChunkError {
    fn from(e: io::Error) -> Self {
        ChunkError::Io(e)
    }
}

/// Incremental UTF-8 decoder. Invalid sequences become U+FFFD; an incomplete trailing
/// sequence is held back until the next chunk.
#[derive(Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` appended to any held-back tail. With `last`, nothing is held back.
    pub fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None if last => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.clear();
                            break;
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Reads a source in fixed-size chunks and yields decoded text.
pub struct ChunkReader<R> {
    inner: R,
    buf: Vec<u8>,
    decoder: Utf8ChunkDecoder,
    deadline: Option<Instant>,
    done: bool,
    bytes_read: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R, chunk_size: usize, deadline: Option<Instant>) -> Self {
        Self {
            inner,
            buf: vec![0u8; chunk_size.max(1)],
            decoder: Utf8ChunkDecoder::new(),
            deadline,
            done: false,
            bytes_read: 0,
        }
    }

    /// Next decoded chunk, or `None` at end of input. May return an empty string when a
    /// chunk held only part of a character.
    pub fn next_chunk(&mut self, cancel: &CancelToken) -> Result<Option<String>, ChunkError> {
        if self.done {
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(ChunkError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ChunkError::TimedOut);
        }
        let n = loop {
            match self.inner.read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            self.done = true;
            let tail = self.decoder.decode(&[], true);
            return Ok((!tail.is_empty()).then_some(tail));
        }
        self.bytes_read += n as u64;
        Ok(Some(self.decoder.decode(&self.buf[..n], false)))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

/// Read a whole (small) source through the chunk reader.
pub fn read_to_string_chunked<R: Read>(
    inner: R,
    chunk_size: usize,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> Result<String, ChunkError> {
    let mut reader = ChunkReader::new(inner, chunk_size, deadline);
    let mut out = String::new();
    while let Some(chunk) = reader.next_chunk(cancel)? {
        out.push_str(&chunk);
    }
    Ok(out)
}

/// Scan all of `source` for its [`TextShape`], then rewind it for the real read. Checks the
/// token and the deadline between buffers like [`ChunkReader`].
pub fn scan_text_shape<R: Read + Seek>(
    source: &mut R,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> Result<TextShape, ChunkError> {
    let mut buf = vec![0u8; SCAN_BUF_LEN];
    let mut scanner = TextShapeScanner::default();
    loop {
        if cancel.is_cancelled() {
            return Err(ChunkError::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ChunkError::TimedOut);
        }
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => scanner.feed(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    source.seek(SeekFrom::Start(0))?;
    Ok(scanner.finish())
}
