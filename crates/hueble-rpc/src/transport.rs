//! Newline-delimited JSON codec for the daemon protocol.
//!
//! One JSON value per line:
//! ```text
//! {"cmd":"brightness","level":40}\n
//! {"ok":true}\n
//! ```

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{Request, Response};

/// Maximum length of a single line, newline excluded (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Codec that decodes `D` and encodes `E`, one JSON value per line
pub struct LineCodec<D, E> {
    /// Bytes already scanned for a newline, so partial reads are not rescanned
    next_index: usize,
    _marker: PhantomData<fn(E) -> D>,
}

/// Daemon side: reads requests, writes responses
pub type ServerCodec = LineCodec<Request, Response>;

/// Client side: writes requests, reads responses
pub type ClientCodec = LineCodec<Response, Request>;

impl<D, E> LineCodec<D, E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_index: 0,
            _marker: PhantomData,
        }
    }
}

impl<D, E> Default for LineCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, E> std::fmt::Debug for LineCodec<D, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineCodec")
            .field("next_index", &self.next_index)
            .finish()
    }
}

fn parse_line<D: DeserializeOwned>(bytes: &[u8]) -> Result<D, CodecError> {
    let line = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(line.trim())?)
}

impl<D: DeserializeOwned, E> Decoder for LineCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.next_index.min(src.len());

        if let Some(offset) = src[start..].iter().position(|b| *b == b'\n') {
            let newline = start + offset;
            self.next_index = 0;

            if newline > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong(newline));
            }

            let line = src.split_to(newline + 1);
            return parse_line(&line[..newline]).map(Some);
        }

        if src.len() > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong(src.len()));
        }

        self.next_index = src.len();
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        self.next_index = 0;
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }

        // Peer closed without a trailing newline; treat the remainder as a line
        let line = src.split_to(src.len());
        parse_line(&line).map(Some)
    }
}

impl<D, E: Serialize> Encoder<E> for LineCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        if json.len() > MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong(json.len()));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Line too long: {0} bytes (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),
}

impl CodecError {
    /// True if the bytes arrived but did not form a valid request.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            CodecError::Json(_) | CodecError::Utf8(_) | CodecError::LineTooLong(_)
        )
    }
}
