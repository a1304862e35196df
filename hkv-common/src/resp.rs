//! # RESP2 wire codec
//!
//! Parses the two request framings the protocol supports, inline commands
//! and multi-bulk arrays, and formats the five reply primitives (status,
//! error, integer, bulk, multi-bulk), including multi-bulk replies whose
//! element count isn't known until after the children are written.
//!
//! Parsing is resumable by construction: `parse_request` never blocks on
//! more input, and an incomplete request simply leaves the caller's buffer
//! untouched (`Ok(None)`) so the next `read()` can top it up. The client's
//! query buffer *is* the parser's state, there is no separate parser
//! object to carry across calls.

use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespError {
    /// Malformed framing. The connection is closed after the error reply.
    Protocol(String),
    /// The query buffer (or a single declared bulk length) exceeded the
    /// configured maximum.
    BufferLimitExceeded,
}

impl std::fmt::Display for RespError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RespError::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            RespError::BufferLimitExceeded => write!(f, "Protocol error: invalid bulk length"),
        }
    }
}

/// Placeholder kept only so downstream crates can name a type for "the
/// codec" without reaching for a free function; all the real state lives in
/// the caller's query buffer.
pub struct RespParser;

/// Attempts to parse one complete request from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only a partial request (leaving it
/// untouched), `Ok(Some(argv))` with the consumed bytes removed from `buf`
/// when a full request was parsed, or `Err` on malformed framing / an
/// over-limit bulk length.
pub fn parse_request(buf: &mut BytesMut, max_bytes: usize) -> Result<Option<Vec<Bytes>>, RespError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() > max_bytes {
        return Err(RespError::BufferLimitExceeded);
    }

    if buf[0] == b'*' {
        parse_multibulk(buf, max_bytes)
    } else {
        parse_inline(buf, max_bytes)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_inline(buf: &mut BytesMut, max_bytes: usize) -> Result<Option<Vec<Bytes>>, RespError> {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => {
            if buf.len() > max_bytes {
                return Err(RespError::BufferLimitExceeded);
            }
            return Ok(None);
        }
    };

    let line = buf.split_to(line_end + 2);
    let line = &line[..line.len() - 2];

    let argv: Vec<Bytes> = line
        .split(|&b| b == b' ')
        .filter(|piece| !piece.is_empty())
        .map(|piece| Bytes::copy_from_slice(piece))
        .collect();

    Ok(Some(argv))
}

fn parse_multibulk(buf: &mut BytesMut, max_bytes: usize) -> Result<Option<Vec<Bytes>>, RespError> {
    let mut cursor = 0usize;

    let header_end = match find_crlf(&buf[cursor..]) {
        Some(pos) => cursor + pos,
        None => return Ok(None),
    };
    let count = parse_i64(&buf[cursor + 1..header_end])
        .ok_or_else(|| RespError::Protocol("invalid multibulk length".into()))?;
    cursor = header_end + 2;

    if count <= 0 {
        buf.advance_to(cursor);
        return Ok(Some(Vec::new()));
    }
    if count > 1024 * 1024 {
        return Err(RespError::Protocol("invalid multibulk length".into()));
    }

    let mut argv = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor >= buf.len() {
            return Ok(None);
        }
        if buf[cursor] != b'$' {
            return Err(RespError::Protocol(format!(
                "expected '$', got '{}'",
                buf[cursor] as char
            )));
        }

        let bulk_header_end = match find_crlf(&buf[cursor..]) {
            Some(pos) => cursor + pos,
            None => return Ok(None),
        };
        let len = parse_i64(&buf[cursor + 1..bulk_header_end])
            .ok_or_else(|| RespError::Protocol("invalid bulk length".into()))?;
        if len < 0 || len as usize > max_bytes {
            return Err(RespError::BufferLimitExceeded);
        }
        let len = len as usize;

        let data_start = bulk_header_end + 2;
        let data_end = data_start + len;
        let needed_end = data_end + 2;
        if needed_end > buf.len() {
            if needed_end > max_bytes {
                return Err(RespError::BufferLimitExceeded);
            }
            return Ok(None);
        }
        if &buf[data_end..needed_end] != b"\r\n" {
            return Err(RespError::Protocol("expected CRLF after bulk data".into()));
        }

        argv.push(Bytes::copy_from_slice(&buf[data_start..data_end]));
        cursor = needed_end;
    }

    buf.advance_to(cursor);
    Ok(Some(argv))
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    if data.is_empty() {
        return None;
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as i64)?;
    }
    Some(if negative { -value } else { value })
}

trait AdvanceTo {
    fn advance_to(&mut self, n: usize);
}

impl AdvanceTo for BytesMut {
    fn advance_to(&mut self, n: usize) {
        let _ = self.split_to(n);
    }
}

/// One reply value, rendered to its RESP2 wire form via `encode`.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Multi(Vec<Reply>),
    NullMulti,
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Status("OK".to_string())
    }

    pub fn nil() -> Reply {
        Reply::Bulk(None)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Status(s) => {
                out.extend_from_slice(b"+");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.extend_from_slice(b"-");
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.extend_from_slice(b":");
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                out.extend_from_slice(b"$");
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NullMulti => out.extend_from_slice(b"*-1\r\n"),
            Reply::Multi(items) => {
                out.extend_from_slice(b"*");
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// A reply buffer supporting deferred multi-bulk headers: reserve a chunk,
/// append children, then back-patch the element count once it's known.
/// Models the client's "list of buffered reply chunks" directly, rather than
/// inserting into the middle of one contiguous buffer.
#[derive(Debug, Default)]
pub struct ReplyWriter {
    chunks: Vec<Bytes>,
}

impl ReplyWriter {
    pub fn new() -> Self {
        ReplyWriter { chunks: Vec::new() }
    }

    pub fn push(&mut self, reply: &Reply) {
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        self.chunks.push(buf.freeze());
    }

    /// Reserves a placeholder chunk for a multi-bulk header whose count
    /// isn't known yet, returning a handle to back-patch later.
    pub fn reserve_multibulk(&mut self) -> usize {
        self.chunks.push(Bytes::new());
        self.chunks.len() - 1
    }

    /// Fills in the element count for a header reserved with
    /// `reserve_multibulk`. Pass a negative count to emit `*-1\r\n`.
    pub fn set_multibulk_len(&mut self, handle: usize, count: i64) {
        let mut buf = BytesMut::new();
        if count < 0 {
            buf.extend_from_slice(b"*-1\r\n");
        } else {
            buf.extend_from_slice(b"*");
            buf.extend_from_slice(count.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        self.chunks[handle] = buf.freeze();
    }

    pub fn into_bytes(self) -> BytesMut {
        let mut out = BytesMut::new();
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_multibulk() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n"[..]);
        let argv = parse_request(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(argv, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_partial_multibulk_untouched() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$3\r\nfo"[..]);
        let original = buf.clone();
        let result = parse_request(&mut buf, 1024).unwrap();
        assert!(result.is_none());
        assert_eq!(buf, original);
    }

    #[test]
    fn parses_inline_command() {
        let mut buf = BytesMut::from(&b"PING hello\r\n"[..]);
        let argv = parse_request(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(argv, vec![Bytes::from_static(b"PING"), Bytes::from_static(b"hello")]);
    }

    #[test]
    fn rejects_oversized_bulk_length() {
        let mut buf = BytesMut::from(&b"*1\r\n$999999999\r\n"[..]);
        let err = parse_request(&mut buf, 512).unwrap_err();
        assert_eq!(err, RespError::BufferLimitExceeded);
    }

    #[test]
    fn deferred_multibulk_header_backpatches() {
        let mut writer = ReplyWriter::new();
        let handle = writer.reserve_multibulk();
        writer.push(&Reply::Integer(1));
        writer.push(&Reply::Integer(2));
        writer.set_multibulk_len(handle, 2);

        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..], b"*2\r\n:1\r\n:2\r\n");
    }
}
