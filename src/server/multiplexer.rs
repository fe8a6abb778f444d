//! Event Multiplexer
//!
//! A thin layer over the OS readiness facility (epoll on Linux, kqueue on
//! the BSDs and macOS) as exposed by `mio`. It keeps the table of
//! registered tokens and their interest so the event loop can ask what a
//! descriptor is armed for, and it reports readiness as plain
//! [`ReadyEvent`] values.
//!
//! ## Edge-triggered semantics
//!
//! A readiness notification fires once per transition into "ready". After
//! a `READABLE` event the consumer must read until the socket reports
//! `WouldBlock`; otherwise no further notification arrives for the bytes
//! already waiting and the descriptor starves until new data shows up.
//! The same holds for `WRITABLE` and for accepting on a listener.

use bitflags::bitflags;
use mio::event::{Event, Source};
use mio::{Events, Poll, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Default number of events drained per `wait` call.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

bitflags! {
    /// What a registered descriptor should be watched for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

bitflags! {
    /// What a descriptor became ready for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: u8 {
        const READABLE     = 1 << 0;
        const WRITABLE     = 1 << 1;
        /// The peer shut down its write half (or the socket is gone).
        const READ_CLOSED  = 1 << 2;
        const WRITE_CLOSED = 1 << 3;
        /// The socket has a pending error.
        const ERROR        = 1 << 4;
    }
}

impl Interest {
    fn to_mio(self) -> Option<mio::Interest> {
        match (self.contains(Interest::READABLE), self.contains(Interest::WRITABLE)) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        let mut readiness = Readiness::empty();
        readiness.set(Readiness::READABLE, event.is_readable());
        readiness.set(Readiness::WRITABLE, event.is_writable());
        readiness.set(Readiness::READ_CLOSED, event.is_read_closed());
        readiness.set(Readiness::WRITE_CLOSED, event.is_write_closed());
        readiness.set(Readiness::ERROR, event.is_error());
        readiness
    }
}

impl Readiness {
    /// Whether the read side needs attention: data, EOF or a socket error
    /// all surface through `read`.
    pub fn wants_read(self) -> bool {
        self.intersects(Readiness::READABLE | Readiness::READ_CLOSED | Readiness::ERROR)
    }

    pub fn wants_write(self) -> bool {
        self.contains(Readiness::WRITABLE)
    }
}

/// One entry of the ordered sequence returned by [`Multiplexer::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readiness: Readiness,
}

/// Registration table plus the OS poller.
pub struct Multiplexer {
    poll: Poll,
    events: Events,
    registrations: HashMap<Token, Interest>,
}

impl Multiplexer {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a multiplexer that reports at most `capacity` events per wait.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
            registrations: HashMap::new(),
        })
    }

    /// Starts watching `source` under `token`.
    pub fn register<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if self.registrations.contains_key(&token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("token {} is already registered", token.0),
            ));
        }
        let mio_interest = interest.to_mio().ok_or_else(empty_interest)?;
        self.poll.registry().register(source, token, mio_interest)?;
        self.registrations.insert(token, interest);
        Ok(())
    }

    /// Replaces the interest of an existing registration. This also re-arms
    /// the edge trigger, so a descriptor that is already ready reports again.
    pub fn modify<S>(&mut self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        let current = self.registrations.get_mut(&token).ok_or_else(|| not_registered(token))?;
        let mio_interest = interest.to_mio().ok_or_else(empty_interest)?;
        self.poll.registry().reregister(source, token, mio_interest)?;
        *current = interest;
        Ok(())
    }

    /// Stops watching `source`. The table entry is dropped even if the OS
    /// call fails, since the caller is about to release the descriptor.
    pub fn unregister<S>(&mut self, source: &mut S, token: Token) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if self.registrations.remove(&token).is_none() {
            return Err(not_registered(token));
        }
        self.poll.registry().deregister(source)
    }

    /// Interest currently registered for `token`.
    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.registrations.get(&token).copied()
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.registrations.contains_key(&token)
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Creates a waker that makes a blocked [`wait`](Self::wait) return an
    /// event for `token` from any thread.
    pub fn waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), token)
    }

    /// Blocks until at least one registered descriptor is ready or the
    /// timeout elapses, then replaces the contents of `ready` with the
    /// reported events in order.
    ///
    /// An interrupted wait is reported as zero events. Any other error is
    /// returned to the caller, for whom it is fatal.
    pub fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<ReadyEvent>) -> io::Result<()> {
        ready.clear();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        ready.extend(self.events.iter().map(|event| ReadyEvent {
            token: event.token(),
            readiness: Readiness::from(event),
        }));
        Ok(())
    }
}

fn empty_interest() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "interest must not be empty")
}

fn not_registered(token: Token) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("token {} is not registered", token.0),
    )
}
