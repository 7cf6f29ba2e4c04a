//! Connection State Machine
//!
//! Each accepted socket is wrapped in a [`Connection`]. The event loop
//! calls [`Connection::step`] whenever the socket reports readiness, and
//! the connection makes as much progress as the socket allows without
//! blocking.
//!
//! ## States
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │                              │
//!            ▼        response queued       │ write buffer drained
//!     ┌─────────────┐ ─────────────────> ┌─────────────┐
//!     │   Reading   │                    │   Writing   │
//!     └─────────────┘                    └─────────────┘
//!            │                                  │
//!            │ EOF, I/O error,                  │ I/O error
//!            │ bad or oversized frame           │
//!            ▼                                  ▼
//!     ┌──────────────────────────────────────────────┐
//!     │                   Closing                    │
//!     └──────────────────────────────────────────────┘
//! ```
//!
//! Sockets are registered edge-triggered, so a step only returns once the
//! socket has reported `WouldBlock` (or the connection is closing). Frames
//! left in the read buffer by a pipelined read are decoded before the
//! socket is read again.
//!
//! ## Buffer Management
//!
//! The read buffer is a fixed block of `4 + max_message_size` bytes with a
//! start and end cursor. Decoded frames advance the start cursor; the
//! unread tail is moved to the front only when the end cursor reaches the
//! end of the block. The write buffer holds at most one response.

use crate::commands::CommandHandler;
use crate::protocol::{FrameError, FrameParser, HEADER_LEN};
use bytes::BytesMut;
use mio::event::Source;
use mio::{Interest, Registry, Token};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Statistics for connection handling.
///
/// Owned by the event loop, which is single-threaded, so these are plain
/// counters.
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: u64,
    /// Currently open connections
    pub active_connections: u64,
    /// Total requests processed
    pub commands_processed: u64,
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&mut self) {
        self.connections_accepted += 1;
        self.active_connections += 1;
    }

    pub fn connection_closed(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }

    pub fn command_processed(&mut self) {
        self.commands_processed += 1;
    }

    pub fn bytes_read(&mut self, count: usize) {
        self.bytes_read += count as u64;
    }

    pub fn bytes_written(&mut self, count: usize) {
        self.bytes_written += count as u64;
    }
}

/// Where a connection is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for (more of) a request.
    Reading,
    /// A response is queued and not yet fully sent.
    Writing,
    /// Finished; the event loop will drop it after the current poll cycle.
    Closing,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or oversized frame
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Client closed the connection between frames
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Client closed the connection with a partial frame buffered
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// One client connection and its buffers.
pub struct Connection<S> {
    /// The socket (or any byte stream in tests)
    stream: S,

    /// Client's address (for logging)
    addr: SocketAddr,

    state: ConnState,

    /// Incoming bytes live in `read_buf[read_start..read_end]`
    read_buf: Box<[u8]>,
    read_start: usize,
    read_end: usize,

    /// Outgoing bytes; `write_buf[..write_sent]` has already been sent
    write_buf: BytesMut,
    write_sent: usize,

    parser: FrameParser,

    /// Why the connection moved to `Closing`
    close_reason: Option<ConnectionError>,

    /// Interest currently registered with the poller
    registered: Option<Interest>,
}

impl<S: Read + Write> Connection<S> {
    /// Wraps a freshly accepted stream. The connection starts in
    /// [`ConnState::Reading`] with empty buffers.
    pub fn new(stream: S, addr: SocketAddr, max_message_size: usize) -> Self {
        let capacity = HEADER_LEN + max_message_size;
        Self {
            stream,
            addr,
            state: ConnState::Reading,
            read_buf: vec![0u8; capacity].into_boxed_slice(),
            read_start: 0,
            read_end: 0,
            write_buf: BytesMut::with_capacity(capacity),
            write_sent: 0,
            parser: FrameParser::with_max_message_size(max_message_size),
            close_reason: None,
            registered: None,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn close_reason(&self) -> Option<&ConnectionError> {
        self.close_reason.as_ref()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.read_end - self.read_start
    }

    /// Bytes queued but not yet sent.
    pub fn pending_write(&self) -> usize {
        self.write_buf.len() - self.write_sent
    }

    /// The readiness this connection is waiting for, or `None` once it is
    /// closing.
    pub fn interest(&self) -> Option<Interest> {
        match self.state {
            ConnState::Reading => Some(Interest::READABLE),
            ConnState::Writing => Some(Interest::WRITABLE),
            ConnState::Closing => None,
        }
    }

    /// Moves the connection to `Closing`. The first reason wins.
    pub fn close(&mut self, reason: ConnectionError) {
        if self.close_reason.is_none() {
            self.close_reason = Some(reason);
        }
        self.state = ConnState::Closing;
    }

    /// Drives the connection until the socket would block or the connection
    /// is closing, and returns the resulting state.
    pub fn step(&mut self, handler: &mut CommandHandler, stats: &mut ConnectionStats) -> ConnState {
        loop {
            match self.state {
                ConnState::Reading => {
                    self.process_buffered(handler, stats);
                    if self.state != ConnState::Reading {
                        continue;
                    }
                    if !self.try_fill_buffer(stats) {
                        break;
                    }
                }
                ConnState::Writing => {
                    if !self.flush_pending(stats) {
                        break;
                    }
                }
                ConnState::Closing => break,
            }
        }
        self.state
    }

    /// Reads once (retrying on `Interrupted`) into the free tail of the
    /// read buffer. Returns `true` if bytes arrived.
    fn try_fill_buffer(&mut self, stats: &mut ConnectionStats) -> bool {
        if self.read_start == self.read_end {
            self.read_start = 0;
            self.read_end = 0;
        } else if self.read_end == self.read_buf.len() && self.read_start > 0 {
            self.read_buf.copy_within(self.read_start..self.read_end, 0);
            self.read_end -= self.read_start;
            self.read_start = 0;
        }
        // A full buffer always holds a complete frame, which is decoded
        // before we get here.
        assert!(
            self.read_end < self.read_buf.len(),
            "read buffer full without a complete frame"
        );

        let n = loop {
            match self.stream.read(&mut self.read_buf[self.read_end..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.close(ConnectionError::Io(e));
                    return false;
                }
            }
        };

        if n == 0 {
            if self.buffered() == 0 {
                self.close(ConnectionError::ClientDisconnected);
            } else {
                self.close(ConnectionError::UnexpectedEof);
            }
            return false;
        }

        self.read_end += n;
        stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        true
    }

    /// Decodes buffered frames until one produces a response that cannot
    /// be flushed right away, the buffer runs dry, or a frame is rejected.
    fn process_buffered(&mut self, handler: &mut CommandHandler, stats: &mut ConnectionStats) {
        while self.state == ConnState::Reading && self.try_one_request(handler, stats) {
            self.state = ConnState::Writing;
            self.flush_pending(stats);
        }
    }

    /// Decodes and executes at most one request. Returns `true` if a
    /// response was queued.
    fn try_one_request(&mut self, handler: &mut CommandHandler, stats: &mut ConnectionStats) -> bool {
        let buf = &self.read_buf[self.read_start..self.read_end];
        match self.parser.parse(buf) {
            Ok(Some((request, consumed))) => {
                self.read_start += consumed;
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffered(),
                    "Parsed request"
                );

                let response = handler.execute(&request);
                stats.command_processed();

                debug_assert!(self.write_buf.is_empty());
                response.encode_into(&mut self.write_buf);
                true
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffered(),
                    "Incomplete frame, need more data"
                );
                false
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Frame error");
                self.close(ConnectionError::Frame(e));
                false
            }
        }
    }

    /// Writes until the buffer drains or the socket would block. Returns
    /// `true` once the buffer has drained and the connection is back in
    /// `Reading`.
    fn flush_pending(&mut self, stats: &mut ConnectionStats) -> bool {
        while self.state == ConnState::Writing {
            if !self.try_flush_buffer(stats) {
                return false;
            }
        }
        self.state == ConnState::Reading
    }

    /// Writes once (retrying on `Interrupted`). Returns `false` if the
    /// socket would block or failed.
    fn try_flush_buffer(&mut self, stats: &mut ConnectionStats) -> bool {
        let n = loop {
            match self.stream.write(&self.write_buf[self.write_sent..]) {
                Ok(0) => {
                    self.close(ConnectionError::Io(ErrorKind::WriteZero.into()));
                    return false;
                }
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) => {
                    self.close(ConnectionError::Io(e));
                    return false;
                }
            }
        };

        self.write_sent += n;
        stats.bytes_written(n);
        trace!(client = %self.addr, bytes = n, "Sent response bytes");

        if self.write_sent == self.write_buf.len() {
            self.write_buf.clear();
            self.write_sent = 0;
            self.state = ConnState::Reading;
        }
        true
    }

    /// Logs why the connection ended, at a level matching how unusual the
    /// reason is.
    pub fn log_close(&self) {
        match &self.close_reason {
            None | Some(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Some(ConnectionError::Io(io_err)) if io_err.kind() == ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Some(ConnectionError::UnexpectedEof) => {
                warn!(
                    client = %self.addr,
                    buffered = self.buffered(),
                    "Client disconnected in the middle of a frame"
                )
            }
            Some(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }
    }
}

impl<S: Read + Write + Source> Connection<S> {
    /// Registers the socket for its initial (readable) interest.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let interest = Interest::READABLE;
        registry.register(&mut self.stream, token, interest)?;
        self.registered = Some(interest);
        Ok(())
    }

    /// Re-registers the socket if the state it waits on has changed since
    /// the last call.
    pub fn sync_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self.interest() {
            Some(wanted) if self.registered != Some(wanted) => {
                registry.reregister(&mut self.stream, token, wanted)?;
                self.registered = Some(wanted);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        if self.registered.take().is_some() {
            registry.deregister(&mut self.stream)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_response, Request, Response, MAX_MESSAGE_SIZE};
    use crate::storage::Store;
    use bytes::Bytes;

    /// In-memory stream. Reads drain `input` in chunks of at most
    /// `read_chunk`, then report EOF or `WouldBlock`. Writes are accepted up
    /// to `write_budget` bytes, then report `WouldBlock`.
    struct MockStream {
        input: Vec<u8>,
        read_pos: usize,
        read_chunk: usize,
        eof: bool,
        interrupt_next_read: bool,
        output: Vec<u8>,
        write_budget: usize,
    }

    impl MockStream {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input,
                read_pos: 0,
                read_chunk: usize::MAX,
                eof: false,
                interrupt_next_read: false,
                output: Vec::new(),
                write_budget: usize::MAX,
            }
        }

        fn push_input(&mut self, data: &[u8]) {
            self.input.extend_from_slice(data);
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt_next_read {
                self.interrupt_next_read = false;
                return Err(ErrorKind::Interrupted.into());
            }
            let remaining = self.input.len() - self.read_pos;
            if remaining == 0 {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(ErrorKind::WouldBlock.into())
                };
            }
            let n = remaining.min(buf.len()).min(self.read_chunk);
            buf[..n].copy_from_slice(&self.input[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_budget == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.write_budget);
            self.output.extend_from_slice(&buf[..n]);
            self.write_budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn create_connection(input: Vec<u8>) -> Connection<MockStream> {
        Connection::new(MockStream::new(input), test_addr(), MAX_MESSAGE_SIZE)
    }

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Store::new())
    }

    fn frame(parts: &[&str]) -> Vec<u8> {
        Request::from_parts(parts.iter().copied()).encode().to_vec()
    }

    fn decode_all(mut buf: &[u8]) -> Vec<Response> {
        let mut responses = Vec::new();
        while let Some((response, consumed)) = parse_response(buf, MAX_MESSAGE_SIZE).unwrap() {
            responses.push(response);
            buf = &buf[consumed..];
        }
        assert!(buf.is_empty(), "trailing response bytes");
        responses
    }

    #[test]
    fn test_single_request() {
        let mut conn = create_connection(frame(&["set", "foo", "bar"]));
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        assert_eq!(decode_all(&conn.get_ref().output), vec![Response::ok()]);
        assert_eq!(handler.store().len(), 1);
        assert_eq!(stats.commands_processed, 1);
        assert_eq!(conn.buffered(), 0);
        assert_eq!(conn.interest(), Some(Interest::READABLE));
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut conn = create_connection(frame(&["set", "key", "value"]));
        conn.get_mut().read_chunk = 3;
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        conn.step(&mut handler, &mut stats);
        assert_eq!(decode_all(&conn.get_ref().output), vec![Response::ok()]);
        assert_eq!(stats.bytes_read, frame(&["set", "key", "value"]).len() as u64);
    }

    #[test]
    fn test_frame_arrives_in_two_steps() {
        let data = frame(&["set", "k", "v"]);
        let (head, tail) = data.split_at(6);
        let mut conn = create_connection(head.to_vec());
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        assert!(conn.get_ref().output.is_empty());
        assert_eq!(conn.buffered(), 6);

        conn.get_mut().push_input(tail);
        conn.step(&mut handler, &mut stats);
        assert_eq!(decode_all(&conn.get_ref().output), vec![Response::ok()]);
    }

    #[test]
    fn test_pipelined_requests_with_partial_writes() {
        let mut input = frame(&["set", "k", "v"]);
        input.extend(frame(&["get", "k"]));
        let mut conn = create_connection(input);
        conn.get_mut().write_budget = 3;
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        // Both frames arrive in one read, but only part of the first
        // response fits in the socket.
        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Writing);
        assert_eq!(conn.get_ref().output.len(), 3);
        assert_eq!(conn.interest(), Some(Interest::WRITABLE));
        assert_eq!(stats.commands_processed, 1);

        conn.get_mut().write_budget = usize::MAX;
        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        assert_eq!(
            decode_all(&conn.get_ref().output),
            vec![Response::ok(), Response::value(Bytes::from("v"))]
        );
        assert_eq!(stats.commands_processed, 2);
        assert_eq!(conn.pending_write(), 0);
    }

    #[test]
    fn test_many_pipelined_requests_wrap_the_read_buffer() {
        let mut input = Vec::new();
        for i in 0..300 {
            input.extend(frame(&["set", &format!("key:{}", i), "value"]));
        }
        assert!(input.len() > HEADER_LEN + MAX_MESSAGE_SIZE);

        let mut conn = create_connection(input);
        conn.get_mut().read_chunk = 1000;
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        let responses = decode_all(&conn.get_ref().output);
        assert_eq!(responses.len(), 300);
        assert!(responses.iter().all(|r| *r == Response::ok()));
        assert_eq!(handler.store().len(), 300);
    }

    #[test]
    fn test_oversized_frame_closes_without_response() {
        let mut input = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes().to_vec();
        input.extend_from_slice(&[0u8; 16]);
        let mut conn = create_connection(input);
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Closing);
        assert!(conn.get_ref().output.is_empty());
        assert!(matches!(
            conn.close_reason(),
            Some(ConnectionError::Frame(FrameError::MessageTooLarge { size: 4097, .. }))
        ));
        assert_eq!(conn.interest(), None);
    }

    #[test]
    fn test_malformed_request_closes() {
        // nstr claims two strings, payload holds one
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(b'x');
        let mut input = (payload.len() as u32).to_le_bytes().to_vec();
        input.extend(payload);

        let mut conn = create_connection(input);
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Closing);
        assert!(conn.get_ref().output.is_empty());
        assert!(matches!(conn.close_reason(), Some(ConnectionError::Frame(_))));
    }

    #[test]
    fn test_responses_before_bad_frame_are_sent() {
        let mut input = frame(&["set", "a", "1"]);
        input.extend_from_slice(&u32::MAX.to_le_bytes());
        let mut conn = create_connection(input);
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Closing);
        assert_eq!(decode_all(&conn.get_ref().output), vec![Response::ok()]);
    }

    #[test]
    fn test_clean_eof() {
        let mut conn = create_connection(frame(&["get", "k"]));
        conn.get_mut().eof = true;
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Closing);
        assert_eq!(decode_all(&conn.get_ref().output), vec![Response::not_found()]);
        assert!(matches!(
            conn.close_reason(),
            Some(ConnectionError::ClientDisconnected)
        ));
    }

    #[test]
    fn test_unexpected_eof() {
        let data = frame(&["get", "k"]);
        let mut conn = create_connection(data[..5].to_vec());
        conn.get_mut().eof = true;
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Closing);
        assert!(conn.get_ref().output.is_empty());
        assert!(matches!(conn.close_reason(), Some(ConnectionError::UnexpectedEof)));
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let mut conn = create_connection(frame(&["get", "k"]));
        conn.get_mut().interrupt_next_read = true;
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        assert_eq!(decode_all(&conn.get_ref().output), vec![Response::not_found()]);
    }

    #[test]
    fn test_command_error_keeps_connection_open() {
        let mut input = frame(&["nope"]);
        input.extend(frame(&["set", "k", "v"]));
        let mut conn = create_connection(input);
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        let responses = decode_all(&conn.get_ref().output);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], Response::error("ERR unknown command 'NOPE'"));
        assert_eq!(responses[1], Response::ok());
    }

    #[test]
    fn test_garbage_command_of_maximum_size_gets_bounded_error() {
        // nstr + one string header + name fills the payload exactly
        let name = vec![0xFFu8; MAX_MESSAGE_SIZE - 2 * HEADER_LEN];
        let mut input = Request::new(vec![Bytes::from(name)]).encode().to_vec();
        assert_eq!(input.len(), HEADER_LEN + MAX_MESSAGE_SIZE);
        input.extend(frame(&["set", "k", "v"]));

        let mut conn = create_connection(input);
        let mut handler = create_handler();
        let mut stats = ConnectionStats::new();

        assert_eq!(conn.step(&mut handler, &mut stats), ConnState::Reading);
        let output = &conn.get_ref().output;
        let declared = u32::from_le_bytes([output[0], output[1], output[2], output[3]]) as usize;
        assert!(declared <= MAX_MESSAGE_SIZE);

        // The stream stays in sync: the next response decodes after it
        let responses = decode_all(output);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status, crate::protocol::Status::Error);
        assert_eq!(responses[1], Response::ok());
    }

    #[test]
    fn test_connection_stats() {
        let mut stats = ConnectionStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.bytes_read(10);
        stats.bytes_written(4);

        assert_eq!(stats.connections_accepted, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.bytes_read, 10);
        assert_eq!(stats.bytes_written, 4);
    }
}
