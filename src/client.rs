//! Blocking Client
//!
//! A minimal synchronous client for the wire protocol. Each call writes one
//! request frame in full and then reads one response frame in full, so it
//! is only suitable for tools and tests, not for driving many connections.
//!
//! ## Example
//!
//! ```no_run
//! use pollkv::client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:1234")?;
//! client.set("name", "pollkv")?;
//! assert_eq!(client.get("name")?.as_deref(), Some(&b"pollkv"[..]));
//! assert!(client.del("name")?);
//! # Ok::<(), pollkv::client::ClientError>(())
//! ```

use crate::protocol::{
    parse_response_payload, FrameError, Request, Response, Status, HEADER_LEN, MAX_MESSAGE_SIZE,
};
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use tracing::trace;

/// Errors returned by [`Client`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// I/O error, including the server closing mid-frame
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame we were about to send, or just received, is invalid
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The server answered with `ERROR`
    #[error("Server error: {0}")]
    Server(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// A blocking connection to a server.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    max_message_size: usize,
}

impl Client {
    /// Connects to `addr`.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Ok(Self::from_stream(TcpStream::connect(addr)?))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Writes one request frame in full.
    ///
    /// Requests that would exceed the server's payload limit are rejected
    /// before anything is sent.
    pub fn send(&mut self, request: &Request) -> ClientResult<()> {
        let size = request.payload_len();
        if size > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size,
                max: self.max_message_size,
            }
            .into());
        }

        self.stream.write_all(&request.encode())?;
        trace!(bytes = HEADER_LEN + size, "Sent request");
        Ok(())
    }

    /// Reads one response frame in full.
    pub fn recv(&mut self) -> ClientResult<Response> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header)?;

        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_message_size {
            return Err(FrameError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            }
            .into());
        }

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok(parse_response_payload(&payload)?)
    }

    /// Sends a request and waits for its response.
    pub fn call(&mut self, request: &Request) -> ClientResult<Response> {
        self.send(request)?;
        self.recv()
    }

    /// `GET key`. Returns `None` if the key does not exist.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Option<Bytes>> {
        let response = self.call(&Request::from_parts([b"get".as_slice(), key.as_ref()]))?;
        match response.status {
            Status::Ok => Ok(Some(response.body)),
            Status::NotFound => Ok(None),
            Status::Error => Err(server_error(&response)),
        }
    }

    /// `SET key value`.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ClientResult<()> {
        let response = self.call(&Request::from_parts([
            b"set".as_slice(),
            key.as_ref(),
            value.as_ref(),
        ]))?;
        match response.status {
            Status::Error => Err(server_error(&response)),
            _ => Ok(()),
        }
    }

    /// `DEL key`. Returns whether the key existed.
    pub fn del(&mut self, key: impl AsRef<[u8]>) -> ClientResult<bool> {
        let response = self.call(&Request::from_parts([b"del".as_slice(), key.as_ref()]))?;
        match response.status {
            Status::Ok => Ok(true),
            Status::NotFound => Ok(false),
            Status::Error => Err(server_error(&response)),
        }
    }
}

fn server_error(response: &Response) -> ClientError {
    ClientError::Server(String::from_utf8_lossy(&response.body).into_owned())
}
