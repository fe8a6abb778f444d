//! Server Loop
//!
//! The server owns the listening socket, the [`Multiplexer`] and the table
//! of live connections. Everything runs on the calling thread:
//!
//! ```text
//!           ┌──────────────────────── wait() ◄───────────────────────┐
//!           │                                                         │
//!           ▼                                                         │
//!   ┌───────────────┐   LISTENER   ┌──────────────────────────────┐   │
//!   │ ready events  │─────────────>│ accept until WouldBlock,     │───┤
//!   │  (in order)   │              │ register each for READABLE   │   │
//!   └───────────────┘              └──────────────────────────────┘   │
//!           │ connection token                                        │
//!           ▼                                                         │
//!   ┌──────────────────────────────────────────────────────────────┐  │
//!   │ Connection::on_ready: drain reads, dispatch, flush, re-arm    │──┘
//!   │ (errors close only that connection)                          │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each event is handled to completion before the next one, so no locks
//! are needed: a connection's buffers are only ever touched from inside
//! the loop.

pub mod multiplexer;

pub use multiplexer::{Interest, Multiplexer, Readiness, ReadyEvent};

use crate::commands::Dispatcher;
use crate::config::Config;
use crate::connection::{Connection, ConnectionError, ConnectionLimits, ConnectionStats};
use crate::protocol::RespParser;
use mio::net::{TcpListener, TcpStream};
use mio::{Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Token of the listening socket.
pub const LISTENER: Token = Token(0);

/// Token of the shutdown waker.
pub const WAKER: Token = Token(1);

/// First connection generation; lower values are reserved tokens.
const FIRST_GENERATION: u64 = 2;

/// How long accepting pauses after the process runs out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive accept failures tolerated in one pass before backing off.
const MAX_ACCEPT_ERRORS: usize = 64;

/// Fatal server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("event multiplexer failed: {0}")]
    Multiplexer(#[source] io::Error),
}

/// Creates the listening socket: `SO_REUSEADDR`, bind, listen with the
/// given backlog, non-blocking.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Resolves `host:port` to the first matching socket address.
fn resolve(addr: &str) -> Result<SocketAddr, ServerError> {
    let resolve_error = |source| ServerError::Resolve {
        addr: addr.to_string(),
        source,
    };
    addr.to_socket_addrs()
        .map_err(resolve_error)?
        .next()
        .ok_or_else(|| resolve_error(io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

/// Asks a running server to stop, from any thread.
#[derive(Clone)]
pub struct ServerHandle {
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Makes [`Server::run`] close every connection and return `Ok(())`.
    pub fn shutdown(&self) -> io::Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// A single-threaded RESP server.
pub struct Server<D> {
    listener: TcpListener,
    local_addr: SocketAddr,
    mux: Multiplexer,
    connections: HashMap<Token, Connection>,
    next_generation: u64,
    dispatcher: D,
    parser: RespParser,
    limits: ConnectionLimits,
    stats: Arc<ConnectionStats>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    accept_paused_until: Option<Instant>,
}

impl<D: Dispatcher> Server<D> {
    /// Binds the listener and registers it with a new multiplexer. Any
    /// failure here is fatal.
    pub fn bind(config: &Config, dispatcher: D) -> Result<Self, ServerError> {
        let bind_address = config.bind_address();
        let addr = resolve(&bind_address)?;
        let bind_error = |source| ServerError::Bind {
            addr: bind_address.clone(),
            source,
        };

        let mut listener = bind_listener(addr, config.backlog).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let mut mux = Multiplexer::new().map_err(ServerError::Multiplexer)?;
        mux.register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Multiplexer)?;
        let waker = Arc::new(mux.waker(WAKER).map_err(ServerError::Multiplexer)?);

        Ok(Self {
            listener,
            local_addr,
            mux,
            connections: HashMap::new(),
            next_generation: FIRST_GENERATION,
            dispatcher,
            parser: config.parser(),
            limits: config.connection_limits(),
            stats: Arc::new(ConnectionStats::new()),
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_paused_until: None,
        })
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            waker: Arc::clone(&self.waker),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs the event loop until [`ServerHandle::shutdown`] is called or the
    /// multiplexer fails.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Listening");
        let mut ready = Vec::with_capacity(multiplexer::DEFAULT_EVENT_CAPACITY);

        while !self.shutdown.load(Ordering::Acquire) {
            let timeout = self
                .accept_paused_until
                .map(|until| until.saturating_duration_since(Instant::now()));
            self.mux
                .wait(timeout, &mut ready)
                .map_err(ServerError::Multiplexer)?;

            self.resume_accepting_if_due();

            for event in &ready {
                match event.token {
                    LISTENER => self.accept_pending(),
                    WAKER => trace!("Woken"),
                    token => self.handle_event(token, event.readiness),
                }
            }
        }

        info!("Shutdown requested, closing {} connections", self.connections.len());
        for (_, conn) in self.connections.drain() {
            conn.close(&mut self.mux, None);
        }
        info!("Server shutdown complete");
        Ok(())
    }

    /// Accepts until the listener reports `WouldBlock`. Edge-triggered
    /// readiness reports a burst of connections only once.
    fn accept_pending(&mut self) {
        let mut failures = 0;

        while self.accept_paused_until.is_none() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    failures = 0;
                    self.add_connection(stream, addr);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_resource_exhaustion(&e) => {
                    warn!(error = %e, "Out of resources, pausing accept");
                    self.pause_accepting();
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    failures += 1;
                    if failures >= MAX_ACCEPT_ERRORS {
                        self.pause_accepting();
                    }
                }
            }
        }
    }

    fn pause_accepting(&mut self) {
        self.accept_paused_until = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    /// Connections that queued up while paused produce no new listener
    /// event, so the backlog is drained explicitly once the pause ends.
    fn resume_accepting_if_due(&mut self) {
        if let Some(until) = self.accept_paused_until {
            if Instant::now() >= until {
                debug!("Resuming accept");
                self.accept_paused_until = None;
                self.accept_pending();
            }
        }
    }

    fn add_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let mut conn = Connection::new(
            stream,
            addr,
            generation,
            self.parser.clone(),
            self.limits,
            Arc::clone(&self.stats),
        );

        if let Err(e) = conn.register(&mut self.mux) {
            conn.close(&mut self.mux, Some(&ConnectionError::from(e)));
            return;
        }

        info!(client = %addr, id = %conn.id(), "Client connected");
        self.connections.insert(conn.token(), conn);
    }

    fn handle_event(&mut self, token: Token, readiness: Readiness) {
        let conn = match self.connections.get_mut(&token) {
            Some(conn) => conn,
            None => {
                trace!(token = token.0, "Dropping event for closed connection");
                return;
            }
        };

        if let Err(e) = conn.on_ready(readiness, &mut self.dispatcher, &mut self.mux) {
            if let Some(conn) = self.connections.remove(&token) {
                conn.close(&mut self.mux, Some(&e));
            }
        }
    }
}

/// Accept failures caused by descriptor or memory exhaustion.
fn is_resource_exhaustion(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}
