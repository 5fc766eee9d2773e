//! # RESP2 Frame Codec
//!
//! Purpose: Encode client commands and replies into RESP2 frames and decode
//! replies incrementally from a growing receive buffer.
//!
//! ## Design Principles
//! 1. **Resumable Decoding**: An incomplete buffer yields `Ok(None)`, never an
//!    error, so the receive loop can keep reading and retry.
//! 2. **Zero-Copy Values**: A complete frame is split off the buffer once and
//!    every payload is a `Bytes` slice of it.
//! 3. **Binary-Safe**: Bulk strings are raw bytes; CRLF inside payloads is fine.
//! 4. **Fail Fast**: Invalid framing returns `MuxError::Protocol` immediately.
//!
//! ## Wire Grammar
//!
//! ```text
//! request : *<argc>\r\n ( $<len>\r\n <bytes>\r\n ){argc}
//! reply   : +<status>\r\n | -<error>\r\n | :<i64>\r\n
//!         | $<len>\r\n<bytes>\r\n | $-1\r\n
//!         | *<count>\r\n <reply>{count} | *-1\r\n
//! ```

use std::ops::Range;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MuxError, MuxResult};

/// Largest bulk payload accepted by the decoder (matches the server default).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 32;

const CRLF: &[u8] = b"\r\n";

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Bytes),
    /// -ERR ... responses.
    Error(Bytes),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Bytes>),
    /// *... arrays, with None for the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Builds a non-null bulk value.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::Bulk(Some(data.into()))
    }

    /// Builds a simple status value.
    pub fn simple(text: &'static str) -> Self {
        RespValue::Simple(Bytes::from_static(text.as_bytes()))
    }
}

/// Encodes a command as a RESP2 array of bulk strings into `out`.
///
/// The buffer is reserved once up front so the encode itself never
/// reallocates mid-frame.
pub fn encode_command(args: &[&[u8]], out: &mut BytesMut) {
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    out.reserve(payload + 16);

    out.put_u8(b'*');
    push_decimal(out, args.len() as u64);
    out.put_slice(CRLF);
    for arg in args {
        out.put_u8(b'$');
        push_decimal(out, arg.len() as u64);
        out.put_slice(CRLF);
        out.put_slice(arg);
        out.put_slice(CRLF);
    }
}

/// Encodes any reply value into `out`.
pub fn encode_value(value: &RespValue, out: &mut BytesMut) {
    match value {
        RespValue::Simple(text) => {
            out.put_u8(b'+');
            out.put_slice(text);
            out.put_slice(CRLF);
        }
        RespValue::Error(text) => {
            out.put_u8(b'-');
            out.put_slice(text);
            out.put_slice(CRLF);
        }
        RespValue::Integer(value) => {
            out.put_u8(b':');
            if *value < 0 {
                out.put_u8(b'-');
            }
            push_decimal(out, value.unsigned_abs());
            out.put_slice(CRLF);
        }
        RespValue::Bulk(None) => out.put_slice(b"$-1\r\n"),
        RespValue::Bulk(Some(data)) => {
            out.reserve(data.len() + 16);
            out.put_u8(b'$');
            push_decimal(out, data.len() as u64);
            out.put_slice(CRLF);
            out.put_slice(data);
            out.put_slice(CRLF);
        }
        RespValue::Array(None) => out.put_slice(b"*-1\r\n"),
        RespValue::Array(Some(items)) => {
            out.put_u8(b'*');
            push_decimal(out, items.len() as u64);
            out.put_slice(CRLF);
            for item in items {
                encode_value(item, out);
            }
        }
    }
}

/// Incremental reply decoder.
///
/// Holds only a length hint: after an incomplete scan it remembers how many
/// bytes the pending frame needs at minimum, so a large bulk arriving over
/// many reads is scanned once instead of once per read.
#[derive(Debug, Default)]
pub struct RespDecoder {
    need: usize,
}

enum Progress {
    /// Frame ends at this offset.
    Complete(usize),
    /// Frame needs at least this many buffered bytes.
    Partial(usize),
}

impl RespDecoder {
    /// Creates a decoder with no pending hint.
    pub fn new() -> Self {
        RespDecoder { need: 0 }
    }

    /// Decodes one reply from the front of `buf`.
    ///
    /// **Input**: receive buffer holding zero or more (possibly partial) frames.
    /// **Output**: `Ok(Some(value))` and the frame removed from `buf`,
    /// `Ok(None)` when more bytes are needed, or a protocol error.
    ///
    /// **Logic**:
    /// 1. Skip work if the buffer is still shorter than the last hint.
    /// 2. Scan for the end of one complete frame without allocating.
    /// 3. Split the frame off, freeze it, and build values as slices of it.
    pub fn decode(&mut self, buf: &mut BytesMut) -> MuxResult<Option<RespValue>> {
        if buf.is_empty() || buf.len() < self.need {
            return Ok(None);
        }

        match scan(&buf[..], 0, 0)? {
            Progress::Partial(need) => {
                self.need = need;
                Ok(None)
            }
            Progress::Complete(end) => {
                self.need = 0;
                let frame = buf.split_to(end).freeze();
                let (value, _) = build(&frame, 0)?;
                Ok(Some(value))
            }
        }
    }
}

fn scan(src: &[u8], pos: usize, depth: usize) -> MuxResult<Progress> {
    if depth > MAX_DEPTH {
        return Err(MuxError::Protocol("reply nesting too deep"));
    }
    let kind = match src.get(pos) {
        Some(&kind) => kind,
        None => return Ok(Progress::Partial(pos + 1)),
    };
    let (line, next) = match find_line(src, pos + 1) {
        Some(found) => found,
        None => return Ok(Progress::Partial(src.len() + 1)),
    };

    match kind {
        b'+' | b'-' => Ok(Progress::Complete(next)),
        b':' => {
            parse_i64(&src[line])?;
            Ok(Progress::Complete(next))
        }
        b'$' => match parse_len(&src[line])? {
            None => Ok(Progress::Complete(next)),
            Some(len) => {
                if len > MAX_BULK_LEN {
                    return Err(MuxError::Protocol("bulk length exceeds limit"));
                }
                let end = next + len + CRLF.len();
                if src.len() < end {
                    return Ok(Progress::Partial(end));
                }
                if &src[next + len..end] != CRLF {
                    return Err(MuxError::Protocol("bulk string missing terminator"));
                }
                Ok(Progress::Complete(end))
            }
        },
        b'*' => match parse_len(&src[line])? {
            None => Ok(Progress::Complete(next)),
            Some(count) => {
                let mut cursor = next;
                for _ in 0..count {
                    match scan(src, cursor, depth + 1)? {
                        Progress::Complete(end) => cursor = end,
                        partial => return Ok(partial),
                    }
                }
                Ok(Progress::Complete(cursor))
            }
        },
        _ => Err(MuxError::Protocol("unknown reply type byte")),
    }
}

// Runs only on frames `scan` has already validated.
fn build(frame: &Bytes, pos: usize) -> MuxResult<(RespValue, usize)> {
    let kind = *frame.get(pos).ok_or(MuxError::Protocol("truncated frame"))?;
    let (line, next) = find_line(frame, pos + 1).ok_or(MuxError::Protocol("truncated frame"))?;

    match kind {
        b'+' => Ok((RespValue::Simple(frame.slice(line)), next)),
        b'-' => Ok((RespValue::Error(frame.slice(line)), next)),
        b':' => Ok((RespValue::Integer(parse_i64(&frame[line])?), next)),
        b'$' => match parse_len(&frame[line])? {
            None => Ok((RespValue::Bulk(None), next)),
            Some(len) => Ok((
                RespValue::Bulk(Some(frame.slice(next..next + len))),
                next + len + CRLF.len(),
            )),
        },
        b'*' => match parse_len(&frame[line])? {
            None => Ok((RespValue::Array(None), next)),
            Some(count) => {
                let mut items = Vec::with_capacity(count);
                let mut cursor = next;
                for _ in 0..count {
                    let (item, end) = build(frame, cursor)?;
                    items.push(item);
                    cursor = end;
                }
                Ok((RespValue::Array(Some(items)), cursor))
            }
        },
        _ => Err(MuxError::Protocol("unknown reply type byte")),
    }
}

/// Returns the content range of the line starting at `start` and the offset
/// just past its CRLF.
fn find_line(src: &[u8], start: usize) -> Option<(Range<usize>, usize)> {
    let rest = src.get(start..)?;
    let offset = rest.windows(2).position(|pair| pair == CRLF)?;
    Some((start..start + offset, start + offset + CRLF.len()))
}

/// Parses a length header; `-1` is the null marker.
fn parse_len(data: &[u8]) -> MuxResult<Option<usize>> {
    match parse_i64(data)? {
        -1 => Ok(None),
        len if len < 0 => Err(MuxError::Protocol("negative length")),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| MuxError::Protocol("length out of range")),
    }
}

fn parse_i64(data: &[u8]) -> MuxResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(MuxError::Protocol("empty integer")),
    };
    if digits.is_empty() {
        return Err(MuxError::Protocol("empty integer"));
    }

    // Accumulate toward the sign so i64::MIN stays representable.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(MuxError::Protocol("invalid integer"));
        }
        let digit = i64::from(b - b'0');
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or(MuxError::Protocol("integer overflow"))?;
    }

    Ok(value)
}

fn push_decimal(out: &mut BytesMut, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.put_slice(&buf[..len]);
}
