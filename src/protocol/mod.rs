//! Wire Protocol Implementation
//!
//! This module provides the length-prefixed binary framing spoken between
//! clients and the server.
//!
//! ## Overview
//!
//! Each frame is a little-endian `u32` payload length followed by the
//! payload. Requests carry a list of binary strings (`GET key`,
//! `SET key value`, `DEL key`); responses carry a status code and a body.
//! Payloads are capped at [`MAX_MESSAGE_SIZE`] bytes.
//!
//! ## Modules
//!
//! - `types`: `Request`, `Response`, `Status` and encoding
//! - `parser`: incremental frame decoder
//!
//! ## Example
//!
//! ```
//! use pollkv::protocol::{FrameParser, Request, Response};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = Request::from_parts(["get", "name"]).encode();
//! let (request, consumed) = FrameParser::new().parse(&data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(request.args[0], Bytes::from("get"));
//!
//! // Creating responses
//! let bytes = Response::value(Bytes::from("pollkv")).encode();
//! assert_eq!(bytes.len(), 4 + 4 + 6);
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    decode_request, parse_frame, parse_request, parse_response, parse_response_payload,
    FrameError, FrameParser, FrameResult,
};
pub use types::{Request, Response, Status, HEADER_LEN, MAX_MESSAGE_SIZE};
