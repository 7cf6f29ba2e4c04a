//! Event Loop
//!
//! A single-threaded readiness loop over the listening socket and every
//! open connection. All store access and every connection transition
//! happens on the thread that calls [`EventLoop::run`]; the only place it
//! waits is inside `poll`.
//!
//! ## One Iteration
//!
//! ```text
//!   poll(timeout)
//!        │
//!        ▼
//!   for each ready connection ──> Connection::step ──> update interest
//!        │
//!        ▼
//!   reap connections that ended up Closing
//!        │
//!        ▼
//!   listener ready? ──> accept until WouldBlock, register as Reading
//! ```
//!
//! Connections are keyed by a [`Token`] that is never handed out twice, so
//! a stale event can never reach a connection that replaced a closed one.

use crate::commands::CommandHandler;
use crate::connection::{ConnState, Connection, ConnectionError, ConnectionStats};
use crate::protocol::MAX_MESSAGE_SIZE;
use crate::storage::Store;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info};

/// Token reserved for the listening socket.
const LISTENER: Token = Token(0);

/// Event loop tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest request or response payload, in bytes
    pub max_message_size: usize,
    /// Upper bound on a single readiness wait
    pub poll_timeout: Duration,
    /// Events drained per `poll` call
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            poll_timeout: Duration::from_secs(1),
            events_capacity: 1024,
        }
    }
}

/// The server: a poller, the listener, open connections and the store.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: HashMap<Token, Connection<TcpStream>>,
    /// Next token to hand out; only ever grows
    next_token: usize,
    handler: CommandHandler,
    stats: ConnectionStats,
    config: ServerConfig,
}

impl EventLoop {
    /// Takes over a bound listener and registers it with a new poller.
    ///
    /// The listener is switched to non-blocking mode.
    pub fn new(
        listener: std::net::TcpListener,
        store: Store,
        config: ServerConfig,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            listener,
            connections: HashMap::new(),
            next_token: LISTENER.0 + 1,
            handler: CommandHandler::with_max_message_size(store, config.max_message_size),
            stats: ConnectionStats::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn store(&self) -> &Store {
        self.handler.store()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs until the poller itself fails.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_message_size = self.config.max_message_size,
            "Event loop started"
        );
        loop {
            self.poll_once()?;
        }
    }

    /// Runs one wait-and-dispatch iteration.
    ///
    /// An interrupted wait counts as an empty iteration. Any other poller
    /// error is returned.
    pub fn poll_once(&mut self) -> io::Result<()> {
        if let Err(e) = self
            .poll
            .poll(&mut self.events, Some(self.config.poll_timeout))
        {
            if e.kind() == ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        let mut listener_ready = false;
        let mut closed = Vec::new();

        for event in self.events.iter() {
            let token = event.token();
            if token == LISTENER {
                listener_ready = true;
                continue;
            }

            // Events for a token reaped earlier are ignored
            let Some(conn) = self.connections.get_mut(&token) else {
                continue;
            };

            if conn.step(&mut self.handler, &mut self.stats) == ConnState::Closing {
                closed.push(token);
                continue;
            }
            if let Err(e) = conn.sync_interest(self.poll.registry(), token) {
                conn.close(ConnectionError::Io(e));
                closed.push(token);
            }
        }

        for token in closed {
            self.reap(token);
        }

        if listener_ready {
            self.accept_connections();
        }

        Ok(())
    }

    /// Accepts every pending connection.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    let mut conn = Connection::new(stream, addr, self.config.max_message_size);
                    if let Err(e) = conn.register(self.poll.registry(), token) {
                        error!(client = %addr, error = %e, "Failed to register connection");
                        continue;
                    }

                    self.stats.connection_opened();
                    info!(client = %addr, "Client connected");
                    self.connections.insert(token, conn);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    break;
                }
            }
        }
    }

    /// Drops a closed connection, which closes its socket.
    fn reap(&mut self, token: Token) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };

        if let Err(e) = conn.deregister(self.poll.registry()) {
            debug!(client = %conn.addr(), error = %e, "Failed to deregister connection");
        }
        conn.log_close();
        self.stats.connection_closed();
    }
}

/// Serves `store` on `listener` with the default configuration.
///
/// Blocks the calling thread. Returns only if the poller fails.
///
/// # Example
///
/// ```no_run
/// use pollkv::{create_store, run_event_loop};
/// use std::net::TcpListener;
///
/// let listener = TcpListener::bind("127.0.0.1:1234")?;
/// run_event_loop(listener, create_store())?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn run_event_loop(listener: std::net::TcpListener, store: Store) -> io::Result<()> {
    run_event_loop_with_config(listener, store, ServerConfig::default())
}

pub fn run_event_loop_with_config(
    listener: std::net::TcpListener,
    store: Store,
    config: ServerConfig,
) -> io::Result<()> {
    EventLoop::new(listener, store, config)?.run()
}
