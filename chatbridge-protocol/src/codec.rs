//! Newline framing for subprocess output
//!
//! Each (process, stream) pair gets its own [`LineCodec`] inside a
//! `FramedRead`, so the carry-over buffer for a half-received line is never
//! shared between streams.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Longest line accepted before the buffered bytes are force-split (64 KiB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder yielding one `String` per `\n`-terminated line
///
/// A trailing `\r` is dropped, invalid UTF-8 is replaced lossily, and an
/// unterminated tail is flushed by `decode_eof` when the stream closes.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Index into the buffer where the next newline search resumes
    next_index: usize,
    max_length: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Create a codec with a custom force-split threshold
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length: max_length.max(1),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();
        let newline = src[self.next_index..read_to]
            .iter()
            .position(|b| *b == b'\n');

        if let Some(offset) = newline {
            let newline_index = self.next_index + offset;
            self.next_index = 0;
            let mut line = src.split_to(newline_index + 1);
            line.truncate(newline_index);
            return Ok(Some(into_line(line)));
        }

        if read_to > self.max_length {
            self.next_index = 0;
            let line = src.split_to(split_point(src, self.max_length));
            return Ok(Some(into_line(line)));
        }

        self.next_index = read_to;
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let line = src.split_to(src.len());
        Ok(Some(into_line(line)))
    }
}

/// Force-split offset at or just below `max`, never inside a UTF-8 sequence
///
/// `buf` must be longer than `max`. Backs off at most three bytes; a run of
/// stray continuation bytes falls back to `max` and is decoded lossily.
fn split_point(buf: &[u8], max: usize) -> usize {
    let floor = max.saturating_sub(3).max(1);
    (floor..=max)
        .rev()
        .find(|i| buf[*i] & 0xC0 != 0x80)
        .unwrap_or(max)
}

fn into_line(mut raw: BytesMut) -> String {
    if raw.last() == Some(&b'\r') {
        raw.truncate(raw.len() - 1);
    }
    String::from_utf8_lossy(&raw).into_owned()
}
