//! Binary Codec and Framing
//!
//! Decoding and framing for the tagged value format defined in
//! [`types`](crate::protocol::types).
//!
//! ## Frames
//!
//! ```text
//! ┌──────────────┬────────────────────────────────┐
//! │ u32 len (LE) │  len bytes: one encoded value  │
//! └──────────────┴────────────────────────────────┘
//! ```
//!
//! ## How the Decoder Works
//!
//! The frame functions look at a buffer and return either:
//! - `Ok(Some((value, consumed)))` - a complete frame was decoded
//! - `Ok(None)` - the frame is incomplete, wait for more data
//! - `Err(CodecError)` - the input is malformed, drop the connection
//!
//! Every declared length is checked against the bytes actually present
//! before anything is read, so hostile input can never cause an
//! out-of-bounds read. A payload that decodes cleanly but leaves bytes
//! behind is rejected as malformed.

use crate::buffer::ByteBuffer;
use crate::protocol::types::{Tag, Value};
use bytes::{Buf, Bytes};
use thiserror::Error;

/// Size of the frame length prefix.
pub const LEN_PREFIX: usize = 4;

/// Maximum payload size of a single frame (32 MiB).
pub const MAX_FRAME_SIZE: usize = 32 << 20;

/// Maximum number of arguments in one request.
pub const MAX_ARGS: usize = 200_000;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Errors that can occur while encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// A declared length runs past the end of the input
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Unknown type tag byte
    #[error("unknown tag: {0:#04x}")]
    UnknownTag(u8),

    /// Arrays nested deeper than [`MAX_NESTING_DEPTH`]
    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),

    /// Bytes left over after a complete value
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// The frame exceeds maximum allowed size
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The request has more arguments than allowed
    #[error("too many arguments: {count} (max: {max})")]
    TooManyArgs { count: usize, max: usize },

    /// A request payload that is not an array
    #[error("expected array, found {0:?}")]
    ExpectedArray(Tag),

    /// A request argument that is not a string
    #[error("expected string argument, found {0:?}")]
    ExpectedString(Tag),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Size limits applied to incoming frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Largest accepted payload, in bytes
    pub max_frame: usize,
    /// Largest accepted argument count
    pub max_args: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame: MAX_FRAME_SIZE,
            max_args: MAX_ARGS,
        }
    }
}

#[inline]
fn ensure(buf: &[u8], needed: usize) -> CodecResult<()> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn read_tag(buf: &mut &[u8]) -> CodecResult<Tag> {
    ensure(buf, 1)?;
    Tag::try_from(buf.get_u8())
}

fn read_len(buf: &mut &[u8]) -> CodecResult<usize> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le() as usize)
}

fn read_slice<'a>(buf: &mut &'a [u8], len: usize) -> CodecResult<&'a [u8]> {
    ensure(buf, len)?;
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}

fn decode_value(buf: &mut &[u8], depth: usize) -> CodecResult<Value> {
    match read_tag(buf)? {
        Tag::Nil => Ok(Value::Nil),
        Tag::Error => {
            let len = read_len(buf)?;
            Ok(Value::Error(Bytes::copy_from_slice(read_slice(buf, len)?)))
        }
        Tag::Str => {
            let len = read_len(buf)?;
            Ok(Value::Str(Bytes::copy_from_slice(read_slice(buf, len)?)))
        }
        Tag::Int => {
            ensure(buf, 8)?;
            Ok(Value::Int(buf.get_i64_le()))
        }
        Tag::Double => {
            ensure(buf, 8)?;
            Ok(Value::Double(buf.get_f64_le()))
        }
        Tag::Array => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(CodecError::TooDeep(MAX_NESTING_DEPTH));
            }
            let count = read_len(buf)?;
            // Every element takes at least one byte.
            let mut values = Vec::with_capacity(count.min(buf.remaining()));
            for _ in 0..count {
                values.push(decode_value(buf, depth + 1)?);
            }
            Ok(Value::Array(values))
        }
    }
}

/// Decodes exactly one value from `payload`.
///
/// # Example
///
/// ```
/// use nimbuskv::protocol::{decode, Value};
///
/// assert_eq!(decode(&[0]), Ok(Value::Nil));
/// assert!(decode(&[0, 0]).is_err()); // trailing byte
/// ```
pub fn decode(payload: &[u8]) -> CodecResult<Value> {
    let mut buf = payload;
    let value = decode_value(&mut buf, 0)?;
    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }
    Ok(value)
}

/// Decodes a request payload: an array of at most `max_args` strings.
pub fn decode_request(payload: &[u8], max_args: usize) -> CodecResult<Vec<Bytes>> {
    let mut buf = payload;
    match read_tag(&mut buf)? {
        Tag::Array => {}
        other => return Err(CodecError::ExpectedArray(other)),
    }

    let count = read_len(&mut buf)?;
    if count > max_args {
        return Err(CodecError::TooManyArgs {
            count,
            max: max_args,
        });
    }

    let mut args = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        match read_tag(&mut buf)? {
            Tag::Str => {}
            other => return Err(CodecError::ExpectedString(other)),
        }
        let len = read_len(&mut buf)?;
        args.push(Bytes::copy_from_slice(read_slice(&mut buf, len)?));
    }

    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }
    Ok(args)
}

/// Reads the length prefix and returns the payload length once the whole
/// frame is buffered.
fn complete_frame(buf: &[u8], max_frame: usize) -> CodecResult<Option<usize>> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_frame {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: max_frame,
        });
    }
    if buf.len() < LEN_PREFIX + len {
        return Ok(None);
    }
    Ok(Some(len))
}

/// Attempts to take one request frame from the front of `buf`.
///
/// On success returns the arguments and the number of bytes to consume.
pub fn try_request_frame(
    buf: &[u8],
    limits: FrameLimits,
) -> CodecResult<Option<(Vec<Bytes>, usize)>> {
    let Some(len) = complete_frame(buf, limits.max_frame)? else {
        return Ok(None);
    };
    let payload = &buf[LEN_PREFIX..LEN_PREFIX + len];
    let args = decode_request(payload, limits.max_args)?;
    Ok(Some((args, LEN_PREFIX + len)))
}

/// Attempts to take one value frame from the front of `buf`.
pub fn try_frame(buf: &[u8], max_frame: usize) -> CodecResult<Option<(Value, usize)>> {
    let Some(len) = complete_frame(buf, max_frame)? else {
        return Ok(None);
    };
    let value = decode(&buf[LEN_PREFIX..LEN_PREFIX + len])?;
    Ok(Some((value, LEN_PREFIX + len)))
}

/// Appends `value` to `out` as one frame.
///
/// Fails without writing anything if the payload would exceed `max_frame`.
pub fn write_frame(out: &mut ByteBuffer, value: &Value, max_frame: usize) -> CodecResult<()> {
    let len = value.encoded_len();
    if len > max_frame {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: max_frame,
        });
    }
    out.append(&(len as u32).to_le_bytes());
    value.encode_into(out);
    Ok(())
}

/// Appends a request frame built from `args` to `out`.
pub fn write_request<A: AsRef<[u8]>>(
    out: &mut ByteBuffer,
    args: &[A],
    max_frame: usize,
) -> CodecResult<()> {
    let request = Value::array(
        args.iter()
            .map(|arg| Value::string(Bytes::copy_from_slice(arg.as_ref())))
            .collect(),
    );
    write_frame(out, &request, max_frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_payload(args: &[&str]) -> Vec<u8> {
        Value::array(
            args.iter()
                .map(|s| Value::string(Bytes::from(s.to_string())))
                .collect(),
        )
        .encode()
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_roundtrip_every_tag() {
        let original = Value::array(vec![
            Value::Nil,
            Value::error("key not found"),
            Value::string(Bytes::from_static(b"bin\x00ary")),
            Value::int(i64::MIN),
            Value::double(-0.25),
            Value::array(vec![]),
        ]);
        assert_eq!(decode(&original.encode()), Ok(original));
    }

    #[test]
    fn test_error_body_is_raw_bytes() {
        assert_eq!(
            decode(&[1, 2, 0, 0, 0, 0xff, 0xfe]),
            Ok(Value::Error(Bytes::from_static(&[0xff, 0xfe])))
        );

        let original = Value::array(vec![Value::error(Bytes::from_static(b"\x80oops\x00"))]);
        assert_eq!(decode(&original.encode()), Ok(original));
    }

    #[test]
    fn test_decode_rejects_every_truncation() {
        let encoded = Value::array(vec![
            Value::string(Bytes::from("hello")),
            Value::int(7),
            Value::error("e"),
        ])
        .encode();

        for cut in 0..encoded.len() {
            assert!(
                decode(&encoded[..cut]).is_err(),
                "prefix of {} bytes decoded",
                cut
            );
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = Value::int(1).encode();
        encoded.push(0);
        assert_eq!(decode(&encoded), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        // String claims 1000 bytes, carries 2
        let input = [2, 0xe8, 0x03, 0, 0, b'h', b'i'];
        assert!(matches!(
            decode(&input),
            Err(CodecError::Truncated { needed: 1000, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        assert_eq!(decode(&[9]), Err(CodecError::UnknownTag(9)));
    }

    #[test]
    fn test_decode_limits_nesting() {
        let mut value = Value::Nil;
        for _ in 0..=MAX_NESTING_DEPTH {
            value = Value::array(vec![value]);
        }
        assert_eq!(
            decode(&value.encode()),
            Err(CodecError::TooDeep(MAX_NESTING_DEPTH))
        );
    }

    #[test]
    fn test_huge_array_count_does_not_preallocate() {
        // Claims u32::MAX elements but has none
        let input = [5, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode(&input), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_decode_request() {
        let payload = request_payload(&["set", "k", "v"]);
        let args = decode_request(&payload, MAX_ARGS).unwrap();
        assert_eq!(
            args,
            vec![Bytes::from("set"), Bytes::from("k"), Bytes::from("v")]
        );
    }

    #[test]
    fn test_decode_request_rejects_non_strings() {
        let payload = Value::array(vec![Value::string(Bytes::from("get")), Value::int(1)]).encode();
        assert_eq!(
            decode_request(&payload, MAX_ARGS),
            Err(CodecError::ExpectedString(Tag::Int))
        );

        let payload = Value::string(Bytes::from("get")).encode();
        assert_eq!(
            decode_request(&payload, MAX_ARGS),
            Err(CodecError::ExpectedArray(Tag::Str))
        );
    }

    #[test]
    fn test_decode_request_enforces_arg_limit() {
        let payload = request_payload(&["get", "a", "b"]);
        assert_eq!(
            decode_request(&payload, 2),
            Err(CodecError::TooManyArgs { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_decode_request_rejects_trailing_bytes() {
        let mut payload = request_payload(&["get", "a"]);
        payload.push(0);
        assert_eq!(
            decode_request(&payload, MAX_ARGS),
            Err(CodecError::TrailingBytes(1))
        );
    }

    #[test]
    fn test_request_frame_incomplete() {
        let frame = framed(&request_payload(&["get", "key"]));
        for cut in 0..frame.len() {
            assert_eq!(
                try_request_frame(&frame[..cut], FrameLimits::default()),
                Ok(None)
            );
        }
    }

    #[test]
    fn test_request_frame_pipelined() {
        let mut input = framed(&request_payload(&["get", "a"]));
        let first_len = input.len();
        input.extend(framed(&request_payload(&["del", "b"])));

        let (args, consumed) = try_request_frame(&input, FrameLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(args, vec![Bytes::from("get"), Bytes::from("a")]);
        assert_eq!(consumed, first_len);

        let (args, _) = try_request_frame(&input[consumed..], FrameLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(args, vec![Bytes::from("del"), Bytes::from("b")]);
    }

    #[test]
    fn test_request_frame_too_large() {
        let header = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        assert!(matches!(
            try_request_frame(&header, FrameLimits::default()),
            Err(CodecError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_write_frame_roundtrip() {
        let mut out = ByteBuffer::new();
        let value = Value::array(vec![Value::string(Bytes::from("1")), Value::error("null")]);
        write_frame(&mut out, &value, MAX_FRAME_SIZE).unwrap();

        let (decoded, consumed) = try_frame(out.as_slice(), MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, out.size());
    }

    #[test]
    fn test_write_frame_refuses_oversized() {
        let mut out = ByteBuffer::new();
        let value = Value::string(Bytes::from(vec![0u8; 100]));
        assert!(matches!(
            write_frame(&mut out, &value, 64),
            Err(CodecError::FrameTooLarge { size: 105, max: 64 })
        ));
        assert!(out.empty());
    }

    #[test]
    fn test_write_request() {
        let mut out = ByteBuffer::new();
        write_request(&mut out, &["set", "k", "v"], MAX_FRAME_SIZE).unwrap();
        let (args, _) = try_request_frame(out.as_slice(), FrameLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(args.len(), 3);
    }
}
