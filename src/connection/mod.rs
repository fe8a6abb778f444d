//! Connection Module
//!
//! One [`Connection`] per accepted client. It owns the socket, the
//! unparsed input and the queued output, and runs the whole
//! read/decode/dispatch/write cycle when the event loop reports readiness.
//!
//! ## Lifecycle
//!
//! ```text
//!   accept() ──> Accepted ──register──> Registered ──error/EOF──> Closed
//!                                          │    ▲
//!                               on_ready() │    │ sync interest
//!                                          ▼    │ (WRITABLE while output
//!   ┌───────────────────────────────────────────┴──┐      is queued)
//!   │ read until WouldBlock                        │
//!   │   ─> decode every complete frame             │
//!   │   ─> dispatch, encode reply into write_buf   │
//!   │ flush until empty or WouldBlock              │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! Partial frames stay at the tail of the read buffer; decoding is retried
//! from the start of the frame after the next read.

pub mod handler;

// Re-export commonly used types
pub use handler::{
    Connection, ConnectionError, ConnectionId, ConnectionLimits, ConnectionState,
    ConnectionStats,
};
