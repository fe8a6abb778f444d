//! Connection Handler Module
//!
//! This module holds the per-client state driven by the event loop. A
//! connection never blocks: every read and write is non-blocking, and a
//! `WouldBlock` result is ordinary flow control.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Accepted      (socket accepted, not yet registered)
//!        │
//!        │ register(READABLE)
//!        ▼
//! 2. Registered ◄──────────────────────────────┐
//!    │                                         │
//!    │  READABLE: read until WouldBlock,       │
//!    │            decode every complete frame, │
//!    │            dispatch, queue replies      │
//!    │  WRITABLE: flush queued replies         │
//!    └─────────────────────────────────────────┘
//!        │
//!        │ EOF / socket error / protocol error
//!        ▼
//! 3. Closed        (unregistered, socket released)
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` together with a cursor that
//! marks the parse frontier. Each complete frame advances the cursor; bytes
//! past the cursor are an incomplete frame waiting for more data. Consumed
//! bytes are dropped from the front of the buffer once per read.
//!
//! Replies are encoded straight into an outbound `BytesMut`. Whatever the
//! socket does not accept immediately stays queued and the connection asks
//! for `WRITABLE` interest until the queue drains.

use crate::commands::{Command, Dispatcher};
use crate::protocol::{encode_into, FrameScanner, ProtocolError, RespParser, RespValue};
use crate::server::multiplexer::{Interest, Multiplexer, Readiness};
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Token;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Bytes requested from the socket per read call
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Connections closed because of malformed input
    pub protocol_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Identity of one accepted client.
///
/// The descriptor alone is not unique over time: the OS hands a closed
/// descriptor number to the very next accept. The generation is taken
/// from a counter that never repeats, and it is what the multiplexer
/// token is derived from, so a stale event can never reach a newer
/// connection that happens to share the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub descriptor: RawFd,
    pub generation: u64,
}

impl ConnectionId {
    pub fn token(&self) -> Token {
        Token(self.generation as usize)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}#{}", self.descriptor, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Registered,
    Closed,
}

/// Per-connection resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Largest amount of unparsed input a client may accumulate
    pub max_query_buffer: usize,
    /// Queued output size at which reading pauses until the client catches up
    pub output_high_watermark: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_query_buffer: 1024 * 1024 * 1024,
            output_high_watermark: 1024 * 1024,
        }
    }
}

/// One accepted client link.
pub struct Connection {
    id: ConnectionId,

    /// The TCP stream for this connection
    stream: TcpStream,

    /// Client's address (for logging)
    addr: SocketAddr,

    state: ConnectionState,

    /// Interest currently registered with the multiplexer
    interest: Interest,

    /// Bytes read but not yet fully parsed
    read_buf: BytesMut,

    /// Parse frontier inside `read_buf`
    cursor: usize,

    /// Encoded replies not yet accepted by the socket
    write_buf: BytesMut,

    /// Set while the outbound queue is above the high watermark
    read_paused: bool,

    parser: RespParser,

    /// Progress through the incomplete frame at `cursor`
    scanner: FrameScanner,

    limits: ConnectionLimits,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl Connection {
    /// Wraps a freshly accepted stream. The connection starts in
    /// [`ConnectionState::Accepted`] and must be registered before use.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        generation: u64,
        parser: RespParser,
        limits: ConnectionLimits,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        let id = ConnectionId {
            descriptor: stream.as_raw_fd(),
            generation,
        };
        stats.connection_opened();

        Self {
            id,
            stream,
            addr,
            state: ConnectionState::Accepted,
            interest: Interest::READABLE,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            cursor: 0,
            write_buf: BytesMut::new(),
            read_paused: false,
            parser,
            scanner: FrameScanner::new(),
            limits,
            stats,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn token(&self) -> Token {
        self.id.token()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Bytes buffered past the parse frontier.
    pub fn pending_input(&self) -> usize {
        self.read_buf.len() - self.cursor
    }

    /// Bytes queued for the socket.
    pub fn pending_output(&self) -> usize {
        self.write_buf.len()
    }

    pub fn is_read_paused(&self) -> bool {
        self.read_paused
    }

    /// Arms the connection for `READABLE`.
    pub fn register(&mut self, mux: &mut Multiplexer) -> io::Result<()> {
        debug_assert_eq!(self.state, ConnectionState::Accepted);
        mux.register(&mut self.stream, self.id.token(), Interest::READABLE)?;
        self.interest = Interest::READABLE;
        self.state = ConnectionState::Registered;
        Ok(())
    }

    /// Handles one readiness event and brings the registered interest in
    /// line with the outbound queue. An `Err` means the connection must be
    /// closed.
    pub fn on_ready<D>(
        &mut self,
        readiness: Readiness,
        dispatcher: &mut D,
        mux: &mut Multiplexer,
    ) -> Result<(), ConnectionError>
    where
        D: Dispatcher + ?Sized,
    {
        if readiness.wants_read() {
            self.on_readable(dispatcher)?;
        }
        if readiness.wants_write() {
            self.on_writable(dispatcher)?;
        }
        self.sync_interest(mux)?;
        Ok(())
    }

    /// Drains the socket until `WouldBlock`, dispatching every complete
    /// command on the way.
    pub fn on_readable<D>(&mut self, dispatcher: &mut D) -> Result<(), ConnectionError>
    where
        D: Dispatcher + ?Sized,
    {
        loop {
            if self.read_paused {
                return Ok(());
            }
            if !self.write_buf.is_empty()
                && self.write_buf.len() >= self.limits.output_high_watermark
            {
                // Pick reading back up once the queue drains; see on_writable.
                trace!(
                    client = %self.addr,
                    queued = self.write_buf.len(),
                    "Output above high watermark, pausing reads"
                );
                self.read_paused = true;
                return Ok(());
            }

            let start = self.read_buf.len();
            self.read_buf.resize(start + READ_CHUNK_SIZE, 0);
            let result = self.stream.read(&mut self.read_buf[start..]);

            match result {
                Ok(0) => {
                    self.read_buf.truncate(start);
                    return Err(if self.pending_input() == 0 {
                        ConnectionError::ClientDisconnected
                    } else {
                        ConnectionError::UnexpectedEof
                    });
                }
                Ok(n) => {
                    self.read_buf.truncate(start + n);
                    self.stats.bytes_read(n);
                    trace!(client = %self.addr, bytes = n, "Read data");

                    self.process_frames(dispatcher)?;
                    self.flush()?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.read_buf.truncate(start);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    self.read_buf.truncate(start);
                }
                Err(e) => {
                    self.read_buf.truncate(start);
                    return Err(e.into());
                }
            }
        }
    }

    /// Flushes queued output. Once the queue is empty, reads paused by the
    /// high watermark resume. Edge-triggered readiness does not report the
    /// bytes that arrived meanwhile, so they are drained explicitly here.
    pub fn on_writable<D>(&mut self, dispatcher: &mut D) -> Result<(), ConnectionError>
    where
        D: Dispatcher + ?Sized,
    {
        self.flush()?;
        if self.write_buf.is_empty() && self.read_paused {
            trace!(client = %self.addr, "Output drained, resuming reads");
            self.read_paused = false;
            self.on_readable(dispatcher)?;
        }
        Ok(())
    }

    /// Decodes and dispatches every complete frame in the buffer.
    ///
    /// A frame is only decoded once the scanner has seen all of it, so a
    /// large frame arriving over many reads is walked once, not once per
    /// read.
    fn process_frames<D>(&mut self, dispatcher: &mut D) -> Result<(), ConnectionError>
    where
        D: Dispatcher + ?Sized,
    {
        loop {
            match self.scanner.scan(&self.parser, &self.read_buf, self.cursor) {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => return Err(self.reject(e)),
            }

            match self.parser.feed(&self.read_buf, self.cursor) {
                Ok(Some((value, consumed))) => {
                    self.cursor += consumed;
                    trace!(
                        client = %self.addr,
                        consumed = consumed,
                        remaining = self.pending_input(),
                        "Parsed command"
                    );
                    self.handle_frame(value, dispatcher);
                }
                Ok(None) => break,
                Err(e) => return Err(self.reject(e)),
            }
        }

        self.compact();

        if self.read_buf.len() > self.limits.max_query_buffer {
            warn!(
                client = %self.addr,
                size = self.read_buf.len(),
                "Query buffer limit exceeded"
            );
            return Err(ConnectionError::QueryBufferFull {
                size: self.read_buf.len(),
                max: self.limits.max_query_buffer,
            });
        }
        Ok(())
    }

    fn handle_frame<D>(&mut self, value: RespValue, dispatcher: &mut D)
    where
        D: Dispatcher + ?Sized,
    {
        // Redis ignores a null multibulk without replying.
        if matches!(value, RespValue::NullArray) {
            return;
        }

        let reply = match Command::try_from(value) {
            Ok(command) => {
                debug!(client = %self.addr, command = %command, "Received command");
                self.stats.command_processed();
                dispatcher.handle(command)
            }
            Err(e) => RespValue::error(e.to_string()),
        };
        encode_into(&reply, &mut self.write_buf);
    }

    /// Queues an error reply for a malformed frame and makes one best-effort
    /// attempt to deliver it before the connection is closed.
    fn reject(&mut self, error: ProtocolError) -> ConnectionError {
        warn!(client = %self.addr, error = %error, "Parse error");
        self.stats.protocol_error();

        let reply = RespValue::error(format!("ERR Protocol error: {}", error.reason));
        encode_into(&reply, &mut self.write_buf);
        if let Err(e) = self.flush() {
            debug!(client = %self.addr, error = %e, "Could not deliver protocol error reply");
        }

        ConnectionError::Protocol(error)
    }

    /// Drops consumed bytes from the front of the read buffer.
    fn compact(&mut self) {
        self.read_buf.advance(self.cursor);
        self.cursor = 0;
    }

    /// Writes queued output until the queue is empty or the socket would
    /// block.
    fn flush(&mut self) -> Result<(), ConnectionError> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.write_buf.advance(n);
                    self.stats.bytes_written(n);
                    trace!(client = %self.addr, bytes = n, "Sent response");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Adds `WRITABLE` interest while output is queued and drops it once the
    /// queue is empty.
    fn sync_interest(&mut self, mux: &mut Multiplexer) -> io::Result<()> {
        let desired = if self.write_buf.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if desired != self.interest {
            mux.modify(&mut self.stream, self.id.token(), desired)?;
            trace!(client = %self.addr, interest = ?desired, "Interest changed");
            self.interest = desired;
        }
        Ok(())
    }

    /// Unregisters and releases the socket. Queued output is discarded.
    pub fn close(mut self, mux: &mut Multiplexer, cause: Option<&ConnectionError>) {
        if self.state == ConnectionState::Registered {
            if let Err(e) = mux.unregister(&mut self.stream, self.id.token()) {
                debug!(client = %self.addr, error = %e, "Failed to unregister connection");
            }
        }
        self.state = ConnectionState::Closed;

        match cause {
            None | Some(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, id = %self.id, "Client disconnected")
            }
            Some(ConnectionError::Io(io_err))
                if io_err.kind() == io::ErrorKind::ConnectionReset =>
            {
                info!(client = %self.addr, id = %self.id, "Connection reset by client")
            }
            Some(e) => warn!(client = %self.addr, id = %self.id, error = %e, "Connection closed"),
        }

        if !self.write_buf.is_empty() {
            debug!(
                client = %self.addr,
                discarded = self.write_buf.len(),
                "Discarding unsent output"
            );
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RESP input
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Unparsed input exceeded the query buffer limit
    #[error("Query buffer limit exceeded: {size} bytes (max: {max})")]
    QueryBufferFull { size: usize, max: usize },
}
