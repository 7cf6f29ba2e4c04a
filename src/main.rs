//! pollkv - A Single-Threaded In-Memory Key-Value Server
//!
//! This is the main entry point for the pollkv server.
//! It parses arguments, sets up logging, binds the listener and hands it to
//! the event loop.

use anyhow::Context;
use pollkv::server::{run_event_loop_with_config, ServerConfig};
use pollkv::storage::create_store;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Smallest accepted `--max-message-size`; short error replies must fit.
const MIN_MESSAGE_SIZE: usize = 64;

/// Largest accepted `--max-message-size`. Every connection holds two
/// buffers of `4 + size` bytes.
const MAX_MESSAGE_SIZE_LIMIT: usize = 1024 * 1024;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Largest request payload accepted
    max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: pollkv::DEFAULT_HOST.to_string(),
            port: pollkv::DEFAULT_PORT,
            max_message_size: pollkv::protocol::MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = required_value(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = required_value(&args, i, "--port")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--max-message-size" => {
                    let value = required_value(&args, i, "--max-message-size");
                    config.max_message_size = parse_message_size(value).unwrap_or_else(|| {
                        eprintln!(
                            "Error: message size must be between {} and {} bytes",
                            MIN_MESSAGE_SIZE, MAX_MESSAGE_SIZE_LIMIT
                        );
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("pollkv version {}", pollkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses a `--max-message-size` value, rejecting sizes outside
/// `MIN_MESSAGE_SIZE..=MAX_MESSAGE_SIZE_LIMIT`.
fn parse_message_size(value: &str) -> Option<usize> {
    value
        .parse()
        .ok()
        .filter(|size| (MIN_MESSAGE_SIZE..=MAX_MESSAGE_SIZE_LIMIT).contains(size))
}

/// Returns the value following the flag at `i`, or exits.
fn required_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
pollkv - A Single-Threaded In-Memory Key-Value Server

USAGE:
    pollkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>             Host to bind to (default: 0.0.0.0)
    -p, --port <PORT>             Port to listen on (default: 1234)
        --max-message-size <N>    Largest request payload in bytes (default: 4096,
                                  range: 64 to 1048576). Each connection
                                  buffers 2 x (4 + N) bytes.
    -v, --version                 Print version information
        --help                    Print this help message

ENVIRONMENT:
    RUST_LOG                      Log filter (default: info)

EXAMPLES:
    pollkv                        # Start on 0.0.0.0:1234
    pollkv --port 6380            # Start on port 6380
    pollkv --host 127.0.0.1       # Listen on loopback only
"#
    );
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("pollkv v{}", pollkv::VERSION);

    // Bind the listener; the event loop switches it to non-blocking
    let listener = std::net::TcpListener::bind(config.bind_address())
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let server_config = ServerConfig {
        max_message_size: config.max_message_size,
        ..ServerConfig::default()
    };

    // Only returns if the poller fails
    run_event_loop_with_config(listener, create_store(), server_config)
        .context("event loop failed")?;

    Ok(())
}
