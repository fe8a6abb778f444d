//! Incremental RESP Decoder
//!
//! This module decodes RESP values out of a byte buffer that grows as data
//! arrives from the network. It never owns the buffer: the caller keeps the
//! bytes and a cursor marking the parse frontier.
//!
//! ## How the Decoder Works
//!
//! [`RespParser::feed`] looks at `buf[cursor..]` and returns either:
//! - `Ok(Some((value, consumed)))` - a complete value spanning `consumed` bytes
//! - `Ok(None)` - the value is incomplete; nothing was consumed
//! - `Err(ProtocolError)` - the bytes can never form a valid value
//!
//! On `Ok(None)` the caller appends more bytes and calls `feed` again with
//! the same cursor. The decoder keeps no state between calls, so a value
//! split across any number of reads decodes exactly as if it had arrived
//! in one piece.
//!
//! Arrays are decoded with an explicit stack rather than recursion, so the
//! nesting depth of a value is bounded only by the size of its input
//! (or by [`RespParser::with_max_depth`] when the caller wants a cap).

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Reasons a byte sequence cannot be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Integer or length token that is empty or not `[-]digits`
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string payload not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingTerminator,

    /// No CRLF within the allowed length of a header line
    #[error("line exceeds {max} bytes without CRLF")]
    LineTooLong { max: usize },

    /// Declared bulk length exceeds the configured maximum
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Arrays nested deeper than the configured maximum
    #[error("maximum nesting depth exceeded: {0}")]
    NestingTooDeep(usize),
}

/// A decode failure together with the absolute buffer offset where the
/// offending token starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason} (at offset {offset})")]
pub struct ProtocolError {
    pub reason: ParseError,
    pub offset: usize,
}

impl ProtocolError {
    fn new(reason: ParseError, offset: usize) -> Self {
        Self { reason, offset }
    }
}

/// Result of a single [`RespParser::feed`] call.
pub type DecodeResult = Result<Option<(RespValue, usize)>, ProtocolError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a header line (everything between the prefix byte
/// and its CRLF), same as Redis' inline limit.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Upper bound on the capacity reserved up front for an array, so a
/// declared count alone cannot force a large allocation.
const PREALLOC_LIMIT: usize = 1024;

/// A stateless, resumable RESP decoder.
///
/// # Example
///
/// ```
/// use respite::protocol::{RespParser, RespValue};
///
/// let parser = RespParser::new();
/// let mut buffer = b"*1\r\n$4\r\nPI".to_vec();
/// assert_eq!(parser.feed(&buffer, 0).unwrap(), None);
///
/// buffer.extend_from_slice(b"NG\r\n");
/// let (value, consumed) = parser.feed(&buffer, 0).unwrap().unwrap();
/// assert_eq!(value, RespValue::bulk_array(["PING"]));
/// assert_eq!(consumed, buffer.len());
/// ```
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk_len: usize,
    max_line_len: usize,
    max_depth: Option<usize>,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

/// One header line, or a complete scalar value.
enum Token {
    Value(RespValue),
    ArrayHeader(usize),
}

/// What [`RespParser::skip_token`] stepped over.
enum Skipped {
    Scalar,
    ArrayHeader(usize),
}

enum BulkExtent {
    Null { next: usize },
    Data { start: usize, end: usize, next: usize },
}

/// An array whose elements are still being decoded.
struct PendingArray {
    len: usize,
    items: Vec<RespValue>,
}

impl RespParser {
    /// Creates a decoder with Redis' default limits and unbounded nesting.
    pub fn new() -> Self {
        Self {
            max_bulk_len: MAX_BULK_SIZE,
            max_line_len: MAX_LINE_LEN,
            max_depth: None,
        }
    }

    pub fn with_max_bulk_len(mut self, max: usize) -> Self {
        self.max_bulk_len = max;
        self
    }

    pub fn with_max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max;
        self
    }

    /// Caps array nesting. Deeper input is a protocol error.
    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = Some(max);
        self
    }

    /// Attempts to decode one value starting at `buf[cursor]`.
    ///
    /// `consumed` in the returned tuple is relative to `cursor`, while the
    /// offset inside a [`ProtocolError`] is absolute within `buf`.
    pub fn feed(&self, buf: &[u8], cursor: usize) -> DecodeResult {
        let mut pos = cursor;
        let mut stack: Vec<PendingArray> = Vec::new();

        loop {
            let start = pos;
            let (token, next) = match self.parse_token(buf, pos)? {
                Some(parsed) => parsed,
                None => return Ok(None),
            };
            pos = next;

            let mut value = match token {
                Token::Value(value) => value,
                Token::ArrayHeader(len) => {
                    if let Some(max) = self.max_depth {
                        if stack.len() >= max {
                            return Err(ProtocolError::new(ParseError::NestingTooDeep(max), start));
                        }
                    }
                    stack.push(PendingArray {
                        len,
                        items: Vec::with_capacity(len.min(PREALLOC_LIMIT)),
                    });
                    continue;
                }
            };

            // Fold the finished value into its parents until one of them
            // still needs more elements.
            loop {
                match stack.pop() {
                    None => return Ok(Some((value, pos - cursor))),
                    Some(mut parent) => {
                        parent.items.push(value);
                        if parent.items.len() < parent.len {
                            stack.push(parent);
                            break;
                        }
                        value = RespValue::Array(parent.items);
                    }
                }
            }
        }
    }

    /// Parses the token at `pos`: either a full scalar, or the header line
    /// of a non-empty array. Returns the position just past the token.
    fn parse_token(&self, buf: &[u8], pos: usize) -> Result<Option<(Token, usize)>, ProtocolError> {
        let (tag, line, next) = match self.read_header(buf, pos)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let token = match tag {
            prefix::SIMPLE_STRING => Token::Value(RespValue::SimpleString(utf8(line, pos)?)),
            prefix::ERROR => Token::Value(RespValue::Error(utf8(line, pos)?)),
            prefix::INTEGER => Token::Value(RespValue::Integer(integer(line, pos)?)),
            prefix::BULK_STRING => {
                return Ok(self
                    .bulk_extent(buf, pos, integer(line, pos)?, next)?
                    .map(|extent| match extent {
                        BulkExtent::Null { next } => (Token::Value(RespValue::NullBulkString), next),
                        BulkExtent::Data { start, end, next } => {
                            let data = Bytes::copy_from_slice(&buf[start..end]);
                            (Token::Value(RespValue::BulkString(data)), next)
                        }
                    }));
            }
            _ => match array_len(line, pos)? {
                None => Token::Value(RespValue::NullArray),
                Some(0) => Token::Value(RespValue::Array(Vec::new())),
                Some(len) => Token::ArrayHeader(len),
            },
        };

        Ok(Some((token, next)))
    }

    /// Skips the token at `pos` with the same checks as [`parse_token`]
    /// but without building a value.
    ///
    /// [`parse_token`]: Self::parse_token
    fn skip_token(&self, buf: &[u8], pos: usize) -> Result<Option<(Skipped, usize)>, ProtocolError> {
        let (tag, line, next) = match self.read_header(buf, pos)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let skipped = match tag {
            prefix::SIMPLE_STRING | prefix::ERROR => {
                std::str::from_utf8(line)
                    .map_err(|_| ProtocolError::new(ParseError::InvalidUtf8, pos))?;
                Skipped::Scalar
            }
            prefix::INTEGER => {
                integer(line, pos)?;
                Skipped::Scalar
            }
            prefix::BULK_STRING => {
                return Ok(self
                    .bulk_extent(buf, pos, integer(line, pos)?, next)?
                    .map(|extent| match extent {
                        BulkExtent::Null { next } | BulkExtent::Data { next, .. } => {
                            (Skipped::Scalar, next)
                        }
                    }));
            }
            _ => match array_len(line, pos)? {
                None | Some(0) => Skipped::Scalar,
                Some(len) => Skipped::ArrayHeader(len),
            },
        };

        Ok(Some((skipped, next)))
    }

    /// Reads the prefix byte and header line at `pos`. Returns the prefix,
    /// the line without its CRLF, and the position just past the CRLF.
    fn read_header<'a>(&self, buf: &'a [u8], pos: usize) -> Result<Option<(u8, &'a [u8], usize)>, ProtocolError> {
        let tag = match buf.get(pos) {
            Some(&tag) => tag,
            None => return Ok(None),
        };

        if !matches!(
            tag,
            prefix::SIMPLE_STRING | prefix::ERROR | prefix::INTEGER | prefix::BULK_STRING | prefix::ARRAY
        ) {
            return Err(ProtocolError::new(ParseError::UnknownPrefix(tag), pos));
        }

        let line_start = pos + 1;
        let line_end = match self.find_line_end(buf, line_start, pos)? {
            Some(end) => end,
            None => return Ok(None),
        };
        Ok(Some((tag, &buf[line_start..line_end], line_end + CRLF.len())))
    }

    /// Locates the payload of a bulk string whose `$<len>\r\n` header ends
    /// just before `data_start`. `None` until all of it has arrived.
    fn bulk_extent(
        &self,
        buf: &[u8],
        pos: usize,
        length: i64,
        data_start: usize,
    ) -> Result<Option<BulkExtent>, ProtocolError> {
        if length == -1 {
            return Ok(Some(BulkExtent::Null { next: data_start }));
        }
        if length < 0 {
            return Err(ProtocolError::new(ParseError::InvalidBulkLength(length), pos));
        }

        let length = usize::try_from(length).unwrap_or(usize::MAX);
        if length > self.max_bulk_len {
            return Err(ProtocolError::new(
                ParseError::MessageTooLarge {
                    size: length,
                    max: self.max_bulk_len,
                },
                pos,
            ));
        }

        let data_end = data_start.saturating_add(length);
        if buf.len() < data_end.saturating_add(CRLF.len()) {
            return Ok(None);
        }

        // The payload is taken by length alone; CR/LF bytes inside it are data.
        if &buf[data_end..data_end + CRLF.len()] != CRLF {
            return Err(ProtocolError::new(ParseError::MissingTerminator, data_end));
        }

        Ok(Some(BulkExtent::Data {
            start: data_start,
            end: data_end,
            next: data_end + CRLF.len(),
        }))
    }

    /// Finds the CRLF ending the line that starts at `start`.
    ///
    /// Returns the position of `\r`, `None` if the line is still incomplete,
    /// or an error once the line outgrows `max_line_len`.
    fn find_line_end(&self, buf: &[u8], start: usize, token_start: usize) -> Result<Option<usize>, ProtocolError> {
        let window = &buf[start.min(buf.len())..];
        let limit = window.len().min(self.max_line_len + CRLF.len());

        match find_crlf(&window[..limit]) {
            Some(offset) => Ok(Some(start + offset)),
            None if window.len() > self.max_line_len + 1 => Err(ProtocolError::new(
                ParseError::LineTooLong {
                    max: self.max_line_len,
                },
                token_start,
            )),
            None => Ok(None),
        }
    }
}

/// Resumable framing for one value at a time.
///
/// [`RespParser::feed`] is stateless, so calling it again after every read
/// would rebuild the complete prefix of a large frame each time. The
/// scanner instead remembers how far into the current frame it has
/// validated and how many elements each open array still owes, and picks
/// up from there. Once it reports a frame complete, a single `feed` at the
/// same start decodes it.
///
/// The scanner applies the parser's checks in the same order, so it fails
/// on exactly the token `feed` would fail on.
#[derive(Debug, Default, Clone)]
pub struct FrameScanner {
    /// Bytes of the current frame already validated
    scanned: usize,
    /// Elements still owed by each open array, innermost last
    pending: Vec<usize>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of an incomplete frame already accounted for.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Forgets any partial progress.
    pub fn reset(&mut self) {
        self.scanned = 0;
        self.pending.clear();
    }

    /// Continues scanning the frame that starts at `buf[start]`.
    ///
    /// `start` must not move while a frame is in progress (compacting the
    /// buffer is fine as long as `start` tracks the same byte). Returns the
    /// frame length once complete, after which the scanner is reset.
    pub fn scan(&mut self, parser: &RespParser, buf: &[u8], start: usize) -> Result<Option<usize>, ProtocolError> {
        loop {
            let pos = start + self.scanned;
            let (skipped, next) = match parser.skip_token(buf, pos)? {
                Some(token) => token,
                None => return Ok(None),
            };

            if let Skipped::ArrayHeader(len) = skipped {
                if let Some(max) = parser.max_depth {
                    if self.pending.len() >= max {
                        return Err(ProtocolError::new(ParseError::NestingTooDeep(max), pos));
                    }
                }
                self.pending.push(len);
                self.scanned = next - start;
                continue;
            }
            self.scanned = next - start;

            // A finished element may complete its parents as well.
            loop {
                match self.pending.last_mut() {
                    None => {
                        let len = self.scanned;
                        self.reset();
                        return Ok(Some(len));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.pending.pop();
                    }
                }
            }
        }
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}

fn utf8(line: &[u8], pos: usize) -> Result<String, ProtocolError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::new(ParseError::InvalidUtf8, pos))
}

fn integer(line: &[u8], pos: usize) -> Result<i64, ProtocolError> {
    parse_decimal(line).ok_or_else(|| {
        ProtocolError::new(
            ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()),
            pos,
        )
    })
}

/// Element count of an array header; `None` for the null array.
fn array_len(line: &[u8], pos: usize) -> Result<Option<usize>, ProtocolError> {
    match integer(line, pos)? {
        -1 => Ok(None),
        n => usize::try_from(n)
            .map(Some)
            .map_err(|_| ProtocolError::new(ParseError::InvalidArrayLength(n), pos)),
    }
}

/// Parses `[-]digits` with no sign other than a leading minus, no
/// whitespace, and no overflow.
fn parse_decimal(token: &[u8]) -> Option<i64> {
    let (negative, digits) = match token.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, token),
    };
    if digits.is_empty() {
        return None;
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        let digit = i64::from(b - b'0');
        n = n.checked_mul(10)?;
        n = if negative {
            n.checked_sub(digit)?
        } else {
            n.checked_add(digit)?
        };
    }
    Some(n)
}

/// Helper function to decode a single RESP value from the start of a buffer.
pub fn parse_message(buf: &[u8]) -> DecodeResult {
    RespParser::new().feed(buf, 0)
}
