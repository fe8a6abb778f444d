//! # respite - A Minimal RESP Server
//!
//! respite speaks the Redis Serialization Protocol (RESP2) over TCP and
//! answers every well-formed command with `+PONG`. It exists to show the
//! moving parts of a readiness-based server: one thread, non-blocking
//! sockets and an edge-triggered event loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              respite                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │ Multiplexer │───>│                 Server loop                  │    │
//! │  │ (mio Poll)  │    │   LISTENER ──> accept until WouldBlock       │    │
//! │  └─────────────┘    │   WAKER    ──> shutdown                      │    │
//! │         ▲           │   conn     ──> Connection::on_ready          │    │
//! │         │           └──────────────────────┬───────────────────────┘    │
//! │         │ interest                         │                            │
//! │         │                                  ▼                            │
//! │  ┌──────┴──────────────────────────────────────────────────────────┐    │
//! │  │ Connection: read buffer ─> RespParser ─> Dispatcher ─> encoder  │    │
//! │  │             ─> write buffer ─> flush                            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use respite::{CommandHandler, Config, Server};
//!
//! fn main() -> Result<(), respite::server::ServerError> {
//!     let config = Config::default();
//!     let server = Server::bind(&config, CommandHandler::new())?;
//!
//!     // Stop from another thread with `handle.shutdown()`.
//!     let _handle = server.handle();
//!     server.run()
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value model, resumable decoder and encoder
//! - [`commands`]: Command extraction and the reply policy
//! - [`connection`]: Per-client buffers and the read/dispatch/write cycle
//! - [`server`]: Event multiplexer, listener and the event loop
//! - [`config`]: Command-line configuration
//!
//! ## Design Highlights
//!
//! ### Resumable Decoding
//!
//! The decoder never keeps state between calls. Given the buffered bytes
//! and a cursor it either returns one complete value and the number of
//! bytes it used, or reports that more input is needed. Partial frames
//! simply stay in the connection's buffer until the next read.
//!
//! ### Drain Until WouldBlock
//!
//! Readiness is edge-triggered, so every read, write and accept loop runs
//! until the socket reports `WouldBlock`. Stopping early would leave data
//! behind with no further notification.
//!
//! ### Backpressure
//!
//! A client that pipelines faster than it reads stops being read once its
//! queued output passes a high watermark, and resumes once the queue
//! drains.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandHandler, Dispatcher};
pub use config::Config;
pub use connection::{Connection, ConnectionError, ConnectionStats};
pub use protocol::{ParseError, ProtocolError, RespParser, RespValue};
pub use server::{Server, ServerError, ServerHandle};

/// The default port respite listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host respite binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 5;

/// Version of respite
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
