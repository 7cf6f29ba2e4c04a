//! Command Handler Module
//!
//! Maps decoded requests onto the [`Store`]. The first string of a request
//! is the command name (matched case-insensitively); the rest are its
//! arguments.
//!
//! ## Supported Commands
//!
//! - `GET key` - `OK` with the value, or `NOT_FOUND`
//! - `SET key value` - `OK`
//! - `DEL key` - `OK` if the key existed, `NOT_FOUND` otherwise
//!
//! Anything else, including a known command with the wrong number of
//! arguments, gets an `ERROR` response with a message body. Command errors
//! never close the connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│  cmd_*()    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                            Store            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{Request, Response, Status, HEADER_LEN, MAX_MESSAGE_SIZE};
use crate::storage::Store;
use bytes::Bytes;
use tracing::trace;

/// Longest command name, in characters, echoed back in an error.
const MAX_ECHOED_NAME: usize = 32;

/// Executes requests against the store it owns.
#[derive(Debug)]
pub struct CommandHandler {
    /// The key space
    store: Store,
    /// Responses must fit in a frame of this payload size
    max_message_size: usize,
}

impl CommandHandler {
    /// Creates a new command handler around the given store.
    pub fn new(store: Store) -> Self {
        Self::with_max_message_size(store, MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(store: Store, max_message_size: usize) -> Self {
        Self {
            store,
            max_message_size,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Gives the store back, e.g. when the server shuts down.
    pub fn into_store(self) -> Store {
        self.store
    }

    /// Executes a request and returns the response to send back.
    pub fn execute(&mut self, request: &Request) -> Response {
        let response = match request.args.split_first() {
            Some((name, args)) => {
                let cmd_name = String::from_utf8_lossy(name).to_uppercase();
                trace!(command = %cmd_name, args = args.len(), "Executing command");
                self.dispatch(&cmd_name, args)
            }
            None => Response::error("ERR empty command"),
        };
        self.fit_to_frame(response)
    }

    /// Cuts an error body down so the response frame stays within
    /// `max_message_size`. Values never need this; GET checks them.
    fn fit_to_frame(&self, mut response: Response) -> Response {
        let max_body = self.max_message_size.saturating_sub(HEADER_LEN);
        if response.body.len() > max_body {
            debug_assert_eq!(response.status, Status::Error);
            response.body.truncate(max_body);
        }
        response
    }

    /// Dispatches a command to its handler.
    fn dispatch(&mut self, cmd: &str, args: &[Bytes]) -> Response {
        match cmd {
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),

            // Unknown command
            _ => Response::error(format!("ERR unknown command '{}'", echo_name(cmd))),
        }
    }

    fn wrong_arity(cmd: &str) -> Response {
        Response::error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd
        ))
    }

    /// GET key
    fn cmd_get(&mut self, args: &[Bytes]) -> Response {
        let [key] = args else {
            return Self::wrong_arity("GET");
        };

        match self.store.get(key) {
            Some(value) if HEADER_LEN + value.len() > self.max_message_size => {
                Response::error("ERR value too large for a response frame")
            }
            Some(value) => Response::value(value),
            None => Response::not_found(),
        }
    }

    /// SET key value
    fn cmd_set(&mut self, args: &[Bytes]) -> Response {
        let [key, value] = args else {
            return Self::wrong_arity("SET");
        };

        self.store.set(key.clone(), value.clone());
        Response::ok()
    }

    /// DEL key
    fn cmd_del(&mut self, args: &[Bytes]) -> Response {
        let [key] = args else {
            return Self::wrong_arity("DEL");
        };

        if self.store.delete(key) {
            Response::ok()
        } else {
            Response::not_found()
        }
    }
}

/// The command name as quoted in an error, shortened to
/// [`MAX_ECHOED_NAME`] characters.
fn echo_name(cmd: &str) -> String {
    match cmd.char_indices().nth(MAX_ECHOED_NAME) {
        Some((end, _)) => format!("{}...", &cmd[..end]),
        None => cmd.to_string(),
    }
}
