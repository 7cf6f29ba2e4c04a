//! Length-Prefixed Frame Decoder
//!
//! Decoding happens in two layers:
//!
//! 1. **Envelope**: [`parse_frame`] looks at the 4-byte length prefix and,
//!    once the whole payload is buffered, hands back the payload slice and
//!    the number of bytes the frame occupies.
//! 2. **Payload**: [`parse_request`] / [`parse_response_payload`] turn the
//!    payload into a [`Request`] or [`Response`].
//!
//! The stream-facing functions return:
//! - `Ok(Some((value, consumed)))` - one complete frame was decoded
//! - `Ok(None)` - the frame is incomplete, read more bytes
//! - `Err(FrameError)` - the bytes violate the protocol, drop the connection
//!
//! Only one frame is decoded per call. The caller advances its buffer by
//! `consumed` and calls again to pick up pipelined frames.

use crate::protocol::types::{Request, Response, Status, HEADER_LEN, MAX_MESSAGE_SIZE};
use bytes::Buf;
use thiserror::Error;

/// Errors that can occur while decoding frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The length prefix declares more than the allowed payload size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A complete frame was expected but the buffer ends early
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    /// The payload is too short to hold its own string count
    #[error("payload missing string count")]
    MissingCount,

    /// The declared string count is larger than any payload could hold
    #[error("too many strings: {count} (max: {max})")]
    TooManyStrings { count: usize, max: usize },

    /// A string header or body runs past the end of the payload
    #[error("string {index} runs past the end of the payload")]
    StringOutOfBounds { index: usize },

    /// Bytes left over after the last declared string
    #[error("{0} trailing bytes after the last string")]
    TrailingBytes(usize),

    /// A response payload without a status code
    #[error("response payload missing status code")]
    MissingStatus,

    /// A response status outside the known set
    #[error("unknown status code: {0}")]
    UnknownStatus(u32),
}

/// Result type for decoding operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Decodes request frames from a connection's read buffer.
///
/// # Example
///
/// ```
/// use pollkv::protocol::{FrameParser, Request};
///
/// let parser = FrameParser::new();
/// let mut buffer = Request::from_parts(["get", "name"]).encode().to_vec();
/// buffer.extend_from_slice(&Request::from_parts(["del", "name"]).encode());
///
/// let (first, consumed) = parser.parse(&buffer).unwrap().unwrap();
/// assert_eq!(first, Request::from_parts(["get", "name"]));
///
/// let (second, _) = parser.parse(&buffer[consumed..]).unwrap().unwrap();
/// assert_eq!(second, Request::from_parts(["del", "name"]));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    max_message_size: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser with the default 4096-byte payload limit.
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Attempts to decode one request from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> FrameResult<Option<(Request, usize)>> {
        match parse_frame(buf, self.max_message_size)? {
            Some((payload, consumed)) => {
                let request = parse_request(payload, self.max_message_size)?;
                Ok(Some((request, consumed)))
            }
            None => Ok(None),
        }
    }
}

/// Splits one frame off the front of `buf`.
///
/// Returns the payload and the total bytes the frame occupies (prefix
/// included). An oversized length prefix is rejected as soon as the prefix
/// itself is buffered, without waiting for the payload.
pub fn parse_frame(buf: &[u8], max_message_size: usize) -> FrameResult<Option<(&[u8], usize)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = (&buf[..HEADER_LEN]).get_u32_le() as usize;
    if len > max_message_size {
        return Err(FrameError::MessageTooLarge {
            size: len,
            max: max_message_size,
        });
    }

    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((&buf[HEADER_LEN..total], total)))
}

/// Decodes a request payload: `nstr` followed by `nstr` length-prefixed
/// strings, with nothing after the last one.
pub fn parse_request(payload: &[u8], max_message_size: usize) -> FrameResult<Request> {
    let mut buf = payload;
    if buf.remaining() < HEADER_LEN {
        return Err(FrameError::MissingCount);
    }

    let count = buf.get_u32_le() as usize;
    if count > max_message_size {
        return Err(FrameError::TooManyStrings {
            count,
            max: max_message_size,
        });
    }

    // Every string needs at least its own header, so the payload bounds
    // what is worth preallocating.
    let mut args = Vec::with_capacity(count.min(buf.remaining() / HEADER_LEN));
    for index in 0..count {
        if buf.remaining() < HEADER_LEN {
            return Err(FrameError::StringOutOfBounds { index });
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(FrameError::StringOutOfBounds { index });
        }
        args.push(buf.copy_to_bytes(len));
    }

    if buf.has_remaining() {
        return Err(FrameError::TrailingBytes(buf.remaining()));
    }

    Ok(Request::new(args))
}

/// Decodes a response payload: a status code followed by the body.
pub fn parse_response_payload(payload: &[u8]) -> FrameResult<Response> {
    let mut buf = payload;
    if buf.remaining() < HEADER_LEN {
        return Err(FrameError::MissingStatus);
    }

    let code = buf.get_u32_le();
    let status = Status::from_code(code).ok_or(FrameError::UnknownStatus(code))?;
    let body = buf.copy_to_bytes(buf.remaining());
    Ok(Response::new(status, body))
}

/// Attempts to decode one response from the front of `buf`.
pub fn parse_response(
    buf: &[u8],
    max_message_size: usize,
) -> FrameResult<Option<(Response, usize)>> {
    match parse_frame(buf, max_message_size)? {
        Some((payload, consumed)) => Ok(Some((parse_response_payload(payload)?, consumed))),
        None => Ok(None),
    }
}

/// Decodes a buffer that must hold exactly one complete request frame.
///
/// Unlike [`FrameParser::parse`], a short buffer is an error: nothing is
/// returned for a frame whose length prefix claims more bytes than exist.
pub fn decode_request(frame: &[u8]) -> FrameResult<Request> {
    match FrameParser::new().parse(frame)? {
        Some((request, consumed)) if consumed == frame.len() => Ok(request),
        Some((_, consumed)) => Err(FrameError::TrailingBytes(frame.len() - consumed)),
        None => Err(FrameError::Incomplete {
            needed: declared_frame_len(frame),
            available: frame.len(),
        }),
    }
}

fn declared_frame_len(buf: &[u8]) -> usize {
    if buf.len() < HEADER_LEN {
        HEADER_LEN
    } else {
        HEADER_LEN + (&buf[..HEADER_LEN]).get_u32_le() as usize
    }
}
