//! RESP Reply Types
//!
//! The store callbacks answer with client-ready RESP replies written straight
//! into the caller's output buffer. Only the reply shapes the engine produces
//! are modelled here.
//!
//! ## Reply Format
//!
//! - `-` Error: `-ERR value is not an integer or out of range\r\n`
//! - `:` Integer: `:1000\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`
//! - Null Bulk String: `$-1\r\n`

use crate::storage::output::OutputBuffer;
use bytes::Bytes;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
}

/// Error text for INCR/DECR on a value that does not parse as an i64
pub const ERR_NOT_INTEGER: &str = "ERR value is not an integer or out of range";

/// Error text for INCR/DECR that would leave the i64 range
pub const ERR_OVERFLOW: &str = "ERR increment or decrement would overflow";

/// Longest decimal rendering of an i64 (`-9223372036854775808`)
pub const MAX_I64_DIGITS: usize = 20;

/// A reply the engine writes into an output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Format: `-<error message>\r\n`
    Error(String),

    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,
}

impl RespValue {
    /// Creates a new error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new integer reply.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string reply.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Number of bytes [`RespValue::encode`] will write.
    pub fn encoded_len(&self) -> usize {
        match self {
            RespValue::Error(s) => 1 + s.len() + CRLF.len(),
            RespValue::Integer(n) => 1 + decimal_len(*n) + CRLF.len(),
            RespValue::BulkString(data) => bulk_header_len(data.len()) + data.len() + CRLF.len(),
            RespValue::Null => 5,
        }
    }

    /// Encodes the reply into `dst`, which must hold at least
    /// [`RespValue::encoded_len`] bytes. Returns the number of bytes written.
    pub fn encode(&self, dst: &mut [u8]) -> usize {
        let mut cursor = Cursor { dst, pos: 0 };
        match self {
            RespValue::Error(s) => {
                cursor.put(&[prefix::ERROR]);
                cursor.put(s.as_bytes());
                cursor.put(CRLF);
            }
            RespValue::Integer(n) => {
                let mut digits = [0u8; MAX_I64_DIGITS];
                cursor.put(&[prefix::INTEGER]);
                cursor.put(format_i64(*n, &mut digits));
                cursor.put(CRLF);
            }
            RespValue::BulkString(data) => {
                write_bulk_header(&mut cursor, data.len());
                cursor.put(data);
                cursor.put(CRLF);
            }
            RespValue::Null => cursor.put(b"$-1\r\n"),
        }
        cursor.pos
    }

    /// Writes the reply into an output buffer, sizing it exactly.
    pub fn write_to(&self, output: &mut OutputBuffer<'_>) {
        let len = self.encoded_len();
        let dst = output.write(len);
        self.encode(dst);
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }
}

/// Writes `$<len>\r\n<data>\r\n` into an output buffer without first wrapping
/// `data` in [`Bytes`].
pub fn write_bulk(data: &[u8], output: &mut OutputBuffer<'_>) {
    let len = bulk_header_len(data.len()) + data.len() + CRLF.len();
    let mut cursor = Cursor {
        dst: output.write(len),
        pos: 0,
    };
    write_bulk_header(&mut cursor, data.len());
    cursor.put(data);
    cursor.put(CRLF);
}

/// Writes `n` as bare decimal text.
pub fn write_decimal(n: i64, output: &mut OutputBuffer<'_>) {
    let mut digits = [0u8; MAX_I64_DIGITS];
    output.fill(format_i64(n, &mut digits));
}

/// Formats `n` in decimal into `buf`, returning the used suffix.
pub fn format_i64(n: i64, buf: &mut [u8; MAX_I64_DIGITS]) -> &[u8] {
    let mut pos = buf.len();
    // unsigned_abs keeps i64::MIN representable
    let mut value = n.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    if n < 0 {
        pos -= 1;
        buf[pos] = b'-';
    }
    &buf[pos..]
}

fn decimal_len(n: i64) -> usize {
    let mut digits = [0u8; MAX_I64_DIGITS];
    format_i64(n, &mut digits).len()
}

fn bulk_header_len(len: usize) -> usize {
    1 + decimal_len(len as i64) + CRLF.len()
}

fn write_bulk_header(cursor: &mut Cursor<'_>, len: usize) {
    let mut digits = [0u8; MAX_I64_DIGITS];
    cursor.put(&[prefix::BULK_STRING]);
    cursor.put(format_i64(len as i64, &mut digits));
    cursor.put(CRLF);
}

struct Cursor<'a> {
    dst: &'a mut [u8],
    pos: usize,
}

impl Cursor<'_> {
    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.dst[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &RespValue) -> Vec<u8> {
        let mut buf = vec![0u8; value.encoded_len()];
        let written = value.encode(&mut buf);
        assert_eq!(written, buf.len());
        buf
    }

    #[test]
    fn test_encode_integer() {
        assert_eq!(encode(&RespValue::integer(1000)), b":1000\r\n");
        assert_eq!(encode(&RespValue::integer(-2)), b":-2\r\n");
        assert_eq!(encode(&RespValue::integer(0)), b":0\r\n");
    }

    #[test]
    fn test_encode_bulk_string() {
        assert_eq!(
            encode(&RespValue::bulk_string(Bytes::from("hello"))),
            b"$5\r\nhello\r\n"
        );
        assert_eq!(encode(&RespValue::bulk_string(Bytes::new())), b"$0\r\n\r\n");
    }

    #[test]
    fn test_encode_error_and_null() {
        assert_eq!(encode(&RespValue::error("ERR boom")), b"-ERR boom\r\n");
        assert_eq!(encode(&RespValue::Null), b"$-1\r\n");
        assert!(RespValue::error("ERR boom").is_error());
    }

    #[test]
    fn test_format_i64_extremes() {
        let mut buf = [0u8; MAX_I64_DIGITS];
        assert_eq!(format_i64(i64::MIN, &mut buf), b"-9223372036854775808");
        assert_eq!(format_i64(i64::MAX, &mut buf), b"9223372036854775807");
    }

    #[test]
    fn test_write_bulk_into_inline_output() {
        let mut span = [0u8; 32];
        let mut output = OutputBuffer::inline(&mut span);
        write_bulk(b"abc", &mut output);
        assert!(output.is_inline());
        assert_eq!(output.as_slice(), b"$3\r\nabc\r\n");
    }
}
