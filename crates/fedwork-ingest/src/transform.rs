//! Pull-based streaming transform feeding the bulk loader
//!
//! [`TransformStream`] exposes a data file as a finite, non-restartable
//! sequence of byte chunks. Each pull reads just enough whole lines from the
//! source to fill the requested size, rewrites them, and keeps any excess for
//! the next pull. Peak memory is one line plus one requested chunk no matter
//! how many rows the file holds.
//!
//! The header line passes through verbatim. On data lines, an empty value in
//! a numeric column becomes [`NULL_SENTINEL`], which the COPY statement
//! declares as its NULL marker. Everything else is copied byte for byte.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::schema::{ColumnMapping, FIELD_DELIMITER};

/// Token the store interprets as an explicit NULL
pub const NULL_SENTINEL: &str = "REDACTED";

/// Read buffer used when streaming from disk.
pub const SOURCE_BUFFER_SIZE: usize = 1 << 20;

/// A consumer-driven source of byte chunks.
///
/// `next_chunk` returns at most `max_bytes`; an empty chunk ends the stream.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self, max_bytes: usize) -> io::Result<Vec<u8>>;
}

/// Rewrite one data line into `out`.
///
/// `line` may carry its terminator (`\n` or `\r\n`); it is preserved. A
/// final unterminated line gains `fallback`, which should match the header's
/// terminator: COPY rejects a file that mixes line endings.
pub fn rewrite_line(line: &[u8], numeric: &BTreeSet<usize>, fallback: &[u8], out: &mut Vec<u8>) {
    let (body, terminator): (&[u8], &[u8]) = if let Some(body) = line.strip_suffix(b"\r\n") {
        (body, b"\r\n")
    } else if let Some(body) = line.strip_suffix(b"\n") {
        (body, b"\n")
    } else {
        (line, fallback)
    };

    if numeric.is_empty() {
        out.extend_from_slice(body);
    } else {
        for (index, field) in body.split(|b| *b == FIELD_DELIMITER).enumerate() {
            if index > 0 {
                out.push(FIELD_DELIMITER);
            }
            if field.is_empty() && numeric.contains(&index) {
                out.extend_from_slice(NULL_SENTINEL.as_bytes());
            } else {
                out.extend_from_slice(field);
            }
        }
    }
    out.extend_from_slice(terminator);
}

/// Lazily rewritten view of a pipe-delimited data file
pub struct TransformStream<R> {
    source: R,
    numeric: BTreeSet<usize>,
    pending: Vec<u8>,
    line: Vec<u8>,
    header_emitted: bool,
    /// Line ending of the header, reused for an unterminated last line
    terminator: &'static [u8],
    exhausted: bool,
    lines_read: u64,
}

impl TransformStream<BufReader<tokio::fs::File>> {
    /// Open `path` for streaming with the numeric positions of `mapping`
    pub async fn open(path: &Path, mapping: &ColumnMapping) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let reader = BufReader::with_capacity(SOURCE_BUFFER_SIZE, file);
        Ok(Self::new(reader, mapping.numeric_indices().clone()))
    }
}

impl<R: AsyncBufRead + Unpin> TransformStream<R> {
    pub fn new(source: R, numeric: BTreeSet<usize>) -> Self {
        Self {
            source,
            numeric,
            pending: Vec::new(),
            line: Vec::new(),
            header_emitted: false,
            terminator: b"\n",
            exhausted: false,
            lines_read: 0,
        }
    }

    /// Lines consumed from the source so far, header included
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Pull the next chunk of at most `max_bytes`; empty means end of stream
    pub async fn next_chunk(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        if max_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk size must be greater than zero",
            ));
        }

        while self.pending.len() < max_bytes && !self.exhausted {
            self.line.clear();
            let read = self.source.read_until(b'\n', &mut self.line).await?;
            if read == 0 {
                self.exhausted = true;
                break;
            }
            self.lines_read += 1;

            if !self.header_emitted {
                self.header_emitted = true;
                if self.line.ends_with(b"\r\n") {
                    self.terminator = b"\r\n";
                }
                self.pending.extend_from_slice(&self.line);
                continue;
            }
            rewrite_line(&self.line, &self.numeric, self.terminator, &mut self.pending);
        }

        let take = max_bytes.min(self.pending.len());
        let rest = self.pending.split_off(take);
        Ok(std::mem::replace(&mut self.pending, rest))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ChunkSource for TransformStream<R> {
    async fn next_chunk(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        TransformStream::next_chunk(self, max_bytes).await
    }
}
