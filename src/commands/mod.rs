//! Command Dispatch Module
//!
//! This module sits between the connection layer and the command table.
//! A decoded RESP array becomes a [`Command`], which a [`Dispatcher`]
//! turns into a reply.
//!
//! ## Example
//!
//! ```
//! use respite::commands::{Command, CommandHandler, Dispatcher};
//! use respite::protocol::RespValue;
//!
//! let mut handler = CommandHandler::new();
//! let command = Command::try_from(RespValue::bulk_array(["PING"])).unwrap();
//! assert_eq!(handler.handle(command), RespValue::pong());
//! ```

pub mod handler;

// Re-export the handler for convenience
pub use handler::{Command, CommandError, CommandHandler, Dispatcher};
