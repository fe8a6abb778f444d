//! RESP Protocol Implementation
//!
//! The RESP value model, a resumable decoder and the encoder.
//!
//! ## Overview
//!
//! RESP is a simple, binary-safe protocol used by Redis for client-server
//! communication. Values are self-delimiting: simple values end at CRLF,
//! bulk strings and arrays carry an explicit length.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum
//! - `parser`: Resumable decoder for bytes arriving in arbitrary fragments
//! - `encoder`: Exact wire bytes for a value, plus direct reply builders
//!
//! ## Example
//!
//! ```
//! use respite::protocol::{encoder, parse_message, RespValue};
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(value, RespValue::bulk_array(["GET", "name"]));
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let bytes = encoder::encode(&RespValue::bulk_string("hello"));
//! assert_eq!(bytes, b"$5\r\nhello\r\n");
//! ```

pub mod encoder;
pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use encoder::{encode, encode_into};
pub use parser::{
    parse_message, DecodeResult, FrameScanner, ParseError, ProtocolError, RespParser,
};
pub use types::RespValue;
