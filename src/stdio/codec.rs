//! NDJSON codec for tool-server stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! tool server that never emits a newline cannot grow a session's buffer
//! without bound.
//!
//! The codec's internal buffer is the session's line buffer: bytes after the
//! last `\n` of one read stay in it and are completed by the next read.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum line length accepted from a tool server: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Inbound line framing for tool-server stdout.
///
/// Outbound lines are written directly by
/// [`write_json_line`](crate::stdio::handshake::write_json_line).
///
/// Oversized inbound lines are discarded up to their terminating newline and
/// decoding resumes with the next line. A decoder error would end the
/// surrounding `FramedRead` stream, so the only error surfaced is
/// [`AppError::Io`].
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use mcp_stdio_gateway::stdio::codec::LineCodec;
///
/// let lines = FramedRead::new(child_stdout, LineCodec::new());
/// ```
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec that discards lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    /// Returns `Ok(None)` while `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                // LinesCodec keeps discarding on the next call.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = self.max_length, "discarding oversized tool server line");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }

    /// Flushes a final unterminated line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(max = self.max_length, "discarding oversized tool server line");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("line too long".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
