//! RESP Encoder
//!
//! Maps a [`RespValue`] to its exact wire bytes. Encoding is pure and
//! deterministic: every call produces a complete, self-terminated byte
//! sequence and there is no partial-output state to resume.
//!
//! Besides [`encode`] and [`encode_into`], the module exposes a small
//! reply-construction API that writes wire bytes directly, for callers
//! that never need the intermediate value.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::BufMut;

/// Wire form of a null bulk string.
pub const NULL_BULK_STRING: &[u8] = b"$-1\r\n";

/// Wire form of a null array.
pub const NULL_ARRAY: &[u8] = b"*-1\r\n";

/// Encodes a value into a freshly allocated buffer.
pub fn encode(value: &RespValue) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    encode_into(value, &mut buf);
    buf
}

/// Appends the wire bytes of `value` to `buf`.
///
/// Works with any [`BufMut`], so replies can be written straight into a
/// connection's outbound `BytesMut`. Nested arrays are walked with an
/// explicit stack, so any value the decoder accepts can be encoded.
pub fn encode_into<B: BufMut>(value: &RespValue, buf: &mut B) {
    let mut stack = vec![std::slice::from_ref(value).iter()];

    while let Some(level) = stack.last_mut() {
        let value = match level.next() {
            Some(value) => value,
            None => {
                stack.pop();
                continue;
            }
        };

        match value {
            RespValue::SimpleString(s) => write_text(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_text(buf, prefix::ERROR, s),
            RespValue::Integer(n) => write_header(buf, prefix::INTEGER, *n),
            RespValue::BulkString(data) => write_bulk(buf, data),
            RespValue::NullBulkString => buf.put_slice(NULL_BULK_STRING),
            RespValue::Array(values) => {
                write_header(buf, prefix::ARRAY, values.len() as i64);
                stack.push(values.iter());
            }
            RespValue::NullArray => buf.put_slice(NULL_ARRAY),
        }
    }
}

/// Exact number of bytes [`encode`] will produce for `value`.
pub fn encoded_len(value: &RespValue) -> usize {
    let mut total = 0;
    let mut stack = vec![std::slice::from_ref(value).iter()];

    while let Some(level) = stack.last_mut() {
        let value = match level.next() {
            Some(value) => value,
            None => {
                stack.pop();
                continue;
            }
        };

        total += match value {
            RespValue::SimpleString(s) | RespValue::Error(s) => 1 + s.len() + 2,
            RespValue::Integer(n) => 1 + decimal_len(*n) + 2,
            RespValue::BulkString(data) => 1 + decimal_len(data.len() as i64) + 2 + data.len() + 2,
            RespValue::NullBulkString => NULL_BULK_STRING.len(),
            RespValue::Array(values) => {
                stack.push(values.iter());
                1 + decimal_len(values.len() as i64) + 2
            }
            RespValue::NullArray => NULL_ARRAY.len(),
        };
    }
    total
}

/// `+<text>\r\n`
pub fn simple_string(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 3);
    write_text(&mut buf, prefix::SIMPLE_STRING, text);
    buf
}

/// `-<text>\r\n`
pub fn error(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 3);
    write_text(&mut buf, prefix::ERROR, text);
    buf
}

/// `:<n>\r\n`
pub fn integer(n: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    write_header(&mut buf, prefix::INTEGER, n);
    buf
}

/// `$<len>\r\n<data>\r\n`
pub fn bulk_string(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 24);
    write_bulk(&mut buf, data);
    buf
}

pub fn null_bulk_string() -> Vec<u8> {
    NULL_BULK_STRING.to_vec()
}

/// `*<count>\r\n` followed by each element as a bulk string.
pub fn bulk_string_array<T: AsRef<[u8]>>(elements: &[T]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_header(&mut buf, prefix::ARRAY, elements.len() as i64);
    for element in elements {
        write_bulk(&mut buf, element.as_ref());
    }
    buf
}

pub fn null_array() -> Vec<u8> {
    NULL_ARRAY.to_vec()
}

fn write_line<B: BufMut>(buf: &mut B, tag: u8, body: &[u8]) {
    buf.put_u8(tag);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

/// Single-line text. CR and LF would end the line early, so each one is
/// written as a space; the encoded length does not change.
fn write_text<B: BufMut>(buf: &mut B, tag: u8, text: &str) {
    buf.put_u8(tag);
    for (index, segment) in text.as_bytes().split(|&b| b == b'\r' || b == b'\n').enumerate() {
        if index > 0 {
            buf.put_u8(b' ');
        }
        buf.put_slice(segment);
    }
    buf.put_slice(CRLF);
}

fn write_header<B: BufMut>(buf: &mut B, tag: u8, n: i64) {
    let mut digits = itoa::Buffer::new();
    write_line(buf, tag, digits.format(n).as_bytes());
}

fn write_bulk<B: BufMut>(buf: &mut B, data: &[u8]) {
    write_header(buf, prefix::BULK_STRING, data.len() as i64);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

fn decimal_len(n: i64) -> usize {
    itoa::Buffer::new().format(n).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    #[test]
    fn test_simple_string_serialize() {
        let value = RespValue::simple_string("OK");
        assert_eq!(encode(&value), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::error("ERR unknown command");
        assert_eq!(encode(&value), b"-ERR unknown command\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(encode(&RespValue::integer(1000)), b":1000\r\n");
        assert_eq!(encode(&RespValue::integer(-42)), b":-42\r\n");
        assert_eq!(
            encode(&RespValue::integer(i64::MIN)),
            b":-9223372036854775808\r\n"
        );
    }

    #[test]
    fn test_bulk_string_serialize() {
        let value = RespValue::bulk_string(Bytes::from("hello"));
        assert_eq!(encode(&value), b"$5\r\nhello\r\n");
        assert_eq!(encode(&RespValue::bulk_string("")), b"$0\r\n\r\n");
    }

    #[test]
    fn test_bulk_string_with_crlf_payload() {
        let value = RespValue::bulk_string(&b"a\r\nb"[..]);
        assert_eq!(encode(&value), b"$4\r\na\r\nb\r\n");
    }

    #[test]
    fn test_null_duality() {
        assert_eq!(encode(&RespValue::NullBulkString), b"$-1\r\n");
        assert_eq!(encode(&RespValue::NullArray), b"*-1\r\n");
        assert_eq!(null_bulk_string(), b"$-1\r\n");
        assert_eq!(null_array(), b"*-1\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let value = RespValue::bulk_array(["GET", "name"]);
        assert_eq!(encode(&value), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
        assert_eq!(encode(&RespValue::array(vec![])), b"*0\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::array(vec![RespValue::integer(2), RespValue::NullArray]),
        ]);
        assert_eq!(encode(&value), b"*2\r\n:1\r\n*2\r\n:2\r\n*-1\r\n");
    }

    #[test]
    fn test_reply_builders_match_value_encoding() {
        assert_eq!(simple_string("PONG"), encode(&RespValue::pong()));
        assert_eq!(error("ERR x"), encode(&RespValue::error("ERR x")));
        assert_eq!(integer(-7), encode(&RespValue::integer(-7)));
        assert_eq!(bulk_string(b"v"), encode(&RespValue::bulk_string("v")));
        assert_eq!(
            bulk_string_array(&["SET", "k", "v"][..]),
            encode(&RespValue::bulk_array(["SET", "k", "v"]))
        );
    }

    #[test]
    fn test_encode_into_bytes_mut_appends() {
        let mut out = BytesMut::from(&b"+OK\r\n"[..]);
        encode_into(&RespValue::integer(5), &mut out);
        assert_eq!(&out[..], b"+OK\r\n:5\r\n");
    }

    #[test]
    fn test_encoded_len_is_exact() {
        let value = RespValue::array(vec![
            RespValue::simple_string("OK"),
            RespValue::bulk_string(vec![0u8; 1234]),
            RespValue::integer(-99),
            RespValue::NullBulkString,
            RespValue::array(vec![RespValue::error("ERR")]),
        ]);
        assert_eq!(encoded_len(&value), encode(&value).len());
    }

    #[test]
    fn test_line_breaks_in_text_become_spaces() {
        let value = RespValue::error("ERR bad\r\ninput");
        assert_eq!(encode(&value), b"-ERR bad  input\r\n");
        assert_eq!(encoded_len(&value), encode(&value).len());
        assert_eq!(simple_string("a\nb"), b"+a b\r\n");

        let (decoded, _) = crate::protocol::parse_message(&encode(&value)).unwrap().unwrap();
        assert_eq!(decoded, RespValue::error("ERR bad  input"));
    }

    #[test]
    fn test_deep_nesting_encodes_without_recursion() {
        let depth = 100_000;
        let mut value = RespValue::integer(1);
        for _ in 0..depth {
            value = RespValue::array(vec![value]);
        }

        let encoded = encode(&value);
        let mut expected = b"*1\r\n".repeat(depth);
        expected.extend_from_slice(b":1\r\n");
        assert_eq!(encoded, expected);
        assert_eq!(encoded_len(&value), expected.len());

        // Tear down one level at a time; the default drop would recurse.
        while let RespValue::Array(mut items) = value {
            value = items.pop().unwrap();
        }
    }
}
