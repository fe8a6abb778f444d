//! RESP Value Model
//!
//! A decoded RESP value is a closed sum type. Each case carries only its
//! own payload, and nothing mutates a value after the decoder builds it.
//!
//! ## Wire Forms
//!
//! | Case             | Prefix | Example                            |
//! |------------------|--------|------------------------------------|
//! | `SimpleString`   | `+`    | `+PONG\r\n`                        |
//! | `Error`          | `-`    | `-ERR Protocol error: ...\r\n`     |
//! | `Integer`        | `:`    | `:-42\r\n`                         |
//! | `BulkString`     | `$`    | `$4\r\na\r\nb\r\n` (CR/LF are data)  |
//! | `NullBulkString` | `$`    | `$-1\r\n`                          |
//! | `Array`          | `*`    | `*1\r\n$4\r\nPING\r\n`             |
//! | `NullArray`      | `*`    | `*-1\r\n`                          |
//!
//! Lines end in CRLF. Bulk strings are read by their declared length only.

use bytes::Bytes;
use std::fmt;

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Type prefix bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One RESP value.
///
/// The two null forms are kept apart: `$-1\r\n` decodes to
/// [`RespValue::NullBulkString`] and `*-1\r\n` to [`RespValue::NullArray`],
/// and each encodes back to its own wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Single-line text. The encoder writes any CR or LF as a space.
    SimpleString(String),

    /// Single-line error text, conventionally led by a code such as `ERR`.
    Error(String),

    Integer(i64),

    /// Length-prefixed and binary-safe.
    BulkString(Bytes),

    NullBulkString,

    /// Ordered elements of any kind, nested to any depth.
    Array(Vec<RespValue>),

    NullArray,
}

impl RespValue {
    pub fn simple_string(text: impl Into<String>) -> Self {
        RespValue::SimpleString(text.into())
    }

    /// Error reply. The text goes on the wire as-is, so include the code:
    ///
    /// ```
    /// use respite::protocol::RespValue;
    ///
    /// let reply = RespValue::error("ERR Protocol error: unbalanced quotes");
    /// assert!(reply.serialize().starts_with(b"-ERR "));
    /// ```
    pub fn error(text: impl Into<String>) -> Self {
        RespValue::Error(text.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null_bulk_string() -> Self {
        RespValue::NullBulkString
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Builds an array whose elements are all bulk strings, the shape every
    /// client command takes on the wire.
    pub fn bulk_array<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(
            items
                .into_iter()
                .map(|item| RespValue::BulkString(item.into()))
                .collect(),
        )
    }

    pub fn null_array() -> Self {
        RespValue::NullArray
    }

    /// `+PONG`, the reply to every command.
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Canonical wire bytes; see [`encoder::encode`](crate::protocol::encoder::encode).
    pub fn serialize(&self) -> Vec<u8> {
        crate::protocol::encoder::encode(self)
    }

    /// Returns true for either null form.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::NullBulkString | RespValue::NullArray)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Text of a simple string, or of a bulk string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(text) => write!(f, "{}", text),
            RespValue::Error(text) => write!(f, "(error) {}", text),
            RespValue::Integer(value) => write!(f, "(integer) {}", value),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(text) => write!(f, "\"{}\"", text.escape_debug()),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::NullBulkString => write!(f, "(nil)"),
            RespValue::NullArray => write!(f, "(nil array)"),
            RespValue::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}
