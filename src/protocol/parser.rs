//! Zero-Copy RESP Reply Reader
//!
//! The session reads back the replies the store callbacks wrote into an
//! output buffer: a bulk string's length header (RENAME copies the value
//! without re-encoding it), integer replies (TTL family, APPEND, SETRANGE)
//! and the bare decimal text INCR/DECR produce.
//!
//! Every function borrows from the input slice; nothing is copied.

use crate::protocol::types::{prefix, CRLF};
use thiserror::Error;

/// Errors that can occur while reading an engine reply.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The reply buffer is empty
    #[error("empty input")]
    EmptyInput,

    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Protocol violation (missing CRLF, truncated payload, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The engine answered with an error reply
    #[error("{0}")]
    ErrorReply(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Reads a `$<len>\r\n` header.
///
/// # Returns
///
/// `(header_len, payload_len)`; `payload_len` is `None` for the null bulk
/// string `$-1\r\n`.
pub fn read_length_header(buf: &[u8]) -> ParseResult<(usize, Option<usize>)> {
    let first = *buf.first().ok_or(ParseError::EmptyInput)?;
    if first != prefix::BULK_STRING {
        return Err(unexpected(buf));
    }

    let (line, header_len) = read_line(&buf[1..])?;
    let len = parse_i64(line)?;
    match len {
        -1 => Ok((header_len + 1, None)),
        n if n < 0 => Err(ParseError::InvalidBulkLength(n)),
        n => Ok((header_len + 1, Some(n as usize))),
    }
}

/// Reads a bulk string reply and returns its payload.
pub fn read_bulk(buf: &[u8]) -> ParseResult<Option<&[u8]>> {
    let (header_len, len) = read_length_header(buf)?;
    let Some(len) = len else {
        return Ok(None);
    };

    let end = header_len + len;
    if buf.len() < end + CRLF.len() || &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::ProtocolError(format!(
            "bulk string of {len} bytes is truncated"
        )));
    }
    Ok(Some(&buf[header_len..end]))
}

/// Reads an integer reply (`:<n>\r\n`).
pub fn read_integer(buf: &[u8]) -> ParseResult<i64> {
    let first = *buf.first().ok_or(ParseError::EmptyInput)?;
    if first != prefix::INTEGER {
        return Err(unexpected(buf));
    }
    let (line, _) = read_line(&buf[1..])?;
    parse_i64(line)
}

/// Reads bare decimal text, or the error reply written in its place.
///
/// A leading `-` followed by a digit is a negative number; followed by
/// anything else it starts an error reply.
pub fn read_decimal(buf: &[u8]) -> ParseResult<i64> {
    match buf {
        [] => Err(ParseError::EmptyInput),
        [b'-', next, ..] if !next.is_ascii_digit() => Err(unexpected(buf)),
        _ => parse_i64(buf),
    }
}

/// Returns the line before the first CRLF and the length consumed
/// including the CRLF.
fn read_line(buf: &[u8]) -> ParseResult<(&[u8], usize)> {
    buf.windows(CRLF.len())
        .position(|w| w == CRLF)
        .map(|pos| (&buf[..pos], pos + CRLF.len()))
        .ok_or_else(|| ParseError::ProtocolError("missing CRLF".to_string()))
}

fn parse_i64(digits: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| ParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned()))?;
    text.parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Maps an unexpected reply to an error, surfacing the engine's own error
/// text when the reply is an error.
fn unexpected(buf: &[u8]) -> ParseError {
    match buf.first() {
        Some(&prefix::ERROR) => {
            let body = &buf[1..];
            let body = read_line(body).map(|(line, _)| line).unwrap_or(body);
            ParseError::ErrorReply(String::from_utf8_lossy(body).into_owned())
        }
        Some(&other) => ParseError::UnknownPrefix(other),
        None => ParseError::EmptyInput,
    }
}
