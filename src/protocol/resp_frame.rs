// src/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` for network communication.

use crate::errors::SentinelPoolError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Replies this client handles are small control-plane payloads; the limits
// exist to reject garbage input, not to accommodate bulk data transfers.
const MAX_FRAME_ELEMENTS: usize = 64 * 1024;
const MAX_BULK_STRING_SIZE: usize = 64 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 32;

/// An enum representing a single frame in the RESP protocol.
///
/// This is the dynamically-typed reply value of the store's reply grammar:
/// a string, an integer, a nested sequence, or null.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds the standard command representation: an array of bulk strings.
    pub fn command(args: &[&str]) -> RespFrame {
        RespFrame::Array(
            args.iter()
                .map(|a| RespFrame::BulkString(Bytes::copy_from_slice(a.as_bytes())))
                .collect(),
        )
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = SentinelPoolError;

    /// Encodes a `RespFrame` into a `BytesMut` buffer according to the RESP specification.
    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                dst.extend_from_slice(b":");
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                dst.extend_from_slice(b"$");
                dst.extend_from_slice(b.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::NullArray => {
                dst.extend_from_slice(b"*-1\r\n");
            }
            RespFrame::Array(arr) => {
                dst.extend_from_slice(b"*");
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = SentinelPoolError;

    /// Decodes one `RespFrame` from the buffer. Returns `Ok(None)` when the
    /// buffer does not yet hold a complete frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match parse_frame(&src[..], 0)? {
            Some((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

/// Parses one frame from the front of `input`, returning the frame and the
/// number of bytes it occupied, or `None` when the input is incomplete.
fn parse_frame(
    input: &[u8],
    depth: usize,
) -> Result<Option<(RespFrame, usize)>, SentinelPoolError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(SentinelPoolError::UnexpectedReply(
            "RESP recursion depth limit exceeded".to_string(),
        ));
    }

    let Some(&prefix) = input.first() else {
        return Ok(None);
    };

    let Some((line, line_end)) = take_line(&input[1..]) else {
        return Ok(None);
    };
    // Offset of the first byte after the prefix and its line.
    let after_line = 1 + line_end;

    match prefix {
        b'+' => Ok(Some((
            RespFrame::SimpleString(String::from_utf8_lossy(line).into_owned()),
            after_line,
        ))),
        b'-' => Ok(Some((
            RespFrame::Error(String::from_utf8_lossy(line).into_owned()),
            after_line,
        ))),
        b':' => {
            let i = parse_decimal::<i64>(line)?;
            Ok(Some((RespFrame::Integer(i), after_line)))
        }
        b'$' => parse_bulk_string(input, line, after_line),
        b'*' => parse_array(input, line, after_line, depth),
        _ => Err(SentinelPoolError::SyntaxError),
    }
}

/// Parses the body of a bulk string whose length header has already been read.
fn parse_bulk_string(
    input: &[u8],
    header: &[u8],
    body_start: usize,
) -> Result<Option<(RespFrame, usize)>, SentinelPoolError> {
    let declared = parse_decimal::<isize>(header)?;
    if declared == -1 {
        return Ok(Some((RespFrame::Null, body_start)));
    }

    let len = usize::try_from(declared).map_err(|_| SentinelPoolError::SyntaxError)?;
    if len > MAX_BULK_STRING_SIZE {
        return Err(SentinelPoolError::SyntaxError);
    }

    let body_end = body_start + len;
    if input.len() < body_end + CRLF_LEN {
        return Ok(None);
    }
    if &input[body_end..body_end + CRLF_LEN] != CRLF {
        return Err(SentinelPoolError::SyntaxError);
    }

    let data = Bytes::copy_from_slice(&input[body_start..body_end]);
    Ok(Some((RespFrame::BulkString(data), body_end + CRLF_LEN)))
}

/// Parses the elements of an array whose length header has already been read.
fn parse_array(
    input: &[u8],
    header: &[u8],
    elements_start: usize,
    depth: usize,
) -> Result<Option<(RespFrame, usize)>, SentinelPoolError> {
    let declared = parse_decimal::<isize>(header)?;
    if declared == -1 {
        return Ok(Some((RespFrame::NullArray, elements_start)));
    }

    let count = usize::try_from(declared).map_err(|_| SentinelPoolError::SyntaxError)?;
    if count > MAX_FRAME_ELEMENTS {
        return Err(SentinelPoolError::SyntaxError);
    }

    let mut elements = Vec::with_capacity(count);
    let mut offset = elements_start;
    for _ in 0..count {
        match parse_frame(&input[offset..], depth + 1)? {
            Some((frame, consumed)) => {
                elements.push(frame);
                offset += consumed;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespFrame::Array(elements), offset)))
}

/// Finds the next CRLF-terminated line, returning the line and the offset of
/// the first byte past the CRLF.
fn take_line(input: &[u8]) -> Option<(&[u8], usize)> {
    let pos = input.windows(CRLF_LEN).position(|window| window == CRLF)?;
    Some((&input[..pos], pos + CRLF_LEN))
}

fn parse_decimal<T: std::str::FromStr>(line: &[u8]) -> Result<T, SentinelPoolError> {
    std::str::from_utf8(line)
        .map_err(|_| SentinelPoolError::SyntaxError)?
        .parse::<T>()
        .map_err(|_| SentinelPoolError::SyntaxError)
}
