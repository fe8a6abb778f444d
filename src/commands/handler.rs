//! Command Handler Module
//!
//! The server core hands every decoded command to a [`Dispatcher`] and
//! writes back whatever value it returns. The command table itself lives
//! outside the core; the only implementation shipped here is
//! [`CommandHandler`], which answers every command with `PONG`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Connection                            │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  RespValue  │───>│   Command   │───>│  handle()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                          RespValue          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Errors turning a decoded value into a [`Command`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The frame is valid RESP but not an array of bulk strings
    #[error("ERR Protocol error: expected array of bulk strings")]
    NotBulkArray,
}

/// A client command: the bulk-string elements of a RESP array, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// The command name (first element), if any.
    pub fn name(&self) -> Option<&[u8]> {
        self.args.first().map(|name| &name[..])
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[Bytes] {
        self.args.get(1..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_parts(self) -> Vec<Bytes> {
        self.args
    }
}

impl TryFrom<RespValue> for Command {
    type Error = CommandError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        let items = value.into_array().ok_or(CommandError::NotBulkArray)?;
        let args = items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(data) => Ok(data),
                _ => Err(CommandError::NotBulkArray),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Command { args })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// Maps a decoded command to its reply.
///
/// Called on the event loop thread; implementations must not block.
pub trait Dispatcher {
    fn handle(&mut self, command: Command) -> RespValue;
}

impl<F> Dispatcher for F
where
    F: FnMut(Command) -> RespValue,
{
    fn handle(&mut self, command: Command) -> RespValue {
        self(command)
    }
}

/// Placeholder command table: every command gets `+PONG`.
#[derive(Debug, Default, Clone)]
pub struct CommandHandler;

impl CommandHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Dispatcher for CommandHandler {
    fn handle(&mut self, _command: Command) -> RespValue {
        RespValue::pong()
    }
}
