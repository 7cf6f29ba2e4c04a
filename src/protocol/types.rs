//! Wire Protocol Data Types
//!
//! Every message on the wire, in both directions, is a frame: a 4-byte
//! little-endian length followed by exactly that many payload bytes.
//!
//! ## Protocol Format
//!
//! ```text
//! request:   | len: u32 | nstr: u32 | len: u32 | str1 | ... | len: u32 | strn |
//! response:  | len: u32 | status: u32 | body ...                              |
//! ```
//!
//! `len` never counts itself. All integers are little-endian.
//!
//! ## Status Codes
//!
//! - `0` OK
//! - `1` ERROR (unknown command, bad arity; body is a message)
//! - `2` NOT_FOUND

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of every integer field on the wire.
pub const HEADER_LEN: usize = 4;

/// Largest payload (bytes after the outer length prefix) a frame may carry.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Converts a length to its on-wire `u32` form.
///
/// # Panics
///
/// Panics if `len` does not fit in a `u32`. Lengths that large can only
/// come from a caller building an oversized frame, never from the network.
fn wire_len(len: usize) -> u32 {
    match u32::try_from(len) {
        Ok(len) => len,
        Err(_) => panic!("length {} does not fit in a frame", len),
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Error = 1,
    NotFound = 2,
}

impl Status {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            2 => Some(Status::NotFound),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "ERROR"),
            Status::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

/// A decoded request: a list of binary strings, the first being the
/// command name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// Builds a request from anything byte-like.
    ///
    /// # Example
    /// ```
    /// use pollkv::protocol::Request;
    /// let req = Request::from_parts(["set", "k", "v"]);
    /// assert_eq!(req.args.len(), 3);
    /// ```
    pub fn from_parts<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        Self {
            args: parts
                .into_iter()
                .map(|p| Bytes::copy_from_slice(p.as_ref()))
                .collect(),
        }
    }

    /// Length of the payload this request encodes to.
    pub fn payload_len(&self) -> usize {
        HEADER_LEN + self.args.iter().map(|a| HEADER_LEN + a.len()).sum::<usize>()
    }

    /// Encodes the full frame (length prefix included).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload_len());
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(wire_len(self.payload_len()));
        buf.put_u32_le(wire_len(self.args.len()));
        for arg in &self.args {
            buf.put_u32_le(wire_len(arg.len()));
            buf.put_slice(arg);
        }
    }
}

/// A response frame: status plus a status-dependent body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: Status, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Common response for successful writes.
    pub fn ok() -> Self {
        Self::new(Status::Ok, Bytes::new())
    }

    /// Successful read carrying a value.
    pub fn value(data: impl Into<Bytes>) -> Self {
        Self::new(Status::Ok, data)
    }

    pub fn not_found() -> Self {
        Self::new(Status::NotFound, Bytes::new())
    }

    /// Error response with a human-readable message.
    ///
    /// # Example
    /// ```
    /// use pollkv::protocol::{Response, Status};
    /// let err = Response::error("ERR unknown command 'PING'");
    /// assert_eq!(err.status, Status::Error);
    /// ```
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, Bytes::from(message.into()))
    }

    /// Length of the payload (status + body).
    pub fn payload_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    /// Length of the full frame.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(wire_len(self.payload_len()));
        buf.put_u32_le(self.status.code());
        buf.put_slice(&self.body);
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        self.encode_into(&mut buf);
        buf
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.body) {
            Ok(s) if s.is_empty() => write!(f, "({})", self.status),
            Ok(s) => write!(f, "({}) \"{}\"", self.status, s),
            Err(_) => write!(f, "({}) (binary data, {} bytes)", self.status, self.body.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encode_layout() {
        let req = Request::from_parts(["get", "k"]);
        let frame = req.encode();

        let expected: &[u8] = &[
            16, 0, 0, 0, // payload length
            2, 0, 0, 0, // nstr
            3, 0, 0, 0, b'g', b'e', b't', //
            1, 0, 0, 0, b'k',
        ];
        assert_eq!(&frame[..], expected);
        assert_eq!(req.payload_len(), 16);
    }

    #[test]
    fn test_ok_response_encode() {
        assert_eq!(&Response::ok().encode()[..], &[4, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_value_response_encode() {
        let frame = Response::value(Bytes::from("bar")).encode();
        assert_eq!(&frame[..], &[7, 0, 0, 0, 0, 0, 0, 0, b'b', b'a', b'r']);
    }

    #[test]
    fn test_not_found_response_encode() {
        assert_eq!(
            &Response::not_found().encode()[..],
            &[4, 0, 0, 0, 2, 0, 0, 0]
        );
    }

    #[test]
    fn test_error_response_body() {
        let resp = Response::error("ERR boom");
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.body, Bytes::from("ERR boom"));
        assert_eq!(resp.frame_len(), 4 + 4 + 8);
    }

    #[test]
    fn test_wire_len() {
        assert_eq!(wire_len(0), 0);
        assert_eq!(wire_len(u32::MAX as usize), u32::MAX);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic(expected = "does not fit in a frame")]
    fn test_wire_len_rejects_truncation() {
        wire_len(u32::MAX as usize + 1);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Error.code(), 1);
        assert_eq!(Status::NotFound.code(), 2);
        assert_eq!(Status::from_code(2), Some(Status::NotFound));
        assert_eq!(Status::from_code(3), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Response::ok().to_string(), "(OK)");
        assert_eq!(Response::value(Bytes::from("v")).to_string(), "(OK) \"v\"");
        assert_eq!(Response::not_found().to_string(), "(NOT_FOUND)");
    }
}
