//! Tagged Value Types
//!
//! Every payload on the wire is one self-describing value: a one-byte tag
//! followed by a tag-specific body. Multi-byte integers are little-endian.
//!
//! ## Value Format
//!
//! | Tag | Name   | Body                                         |
//! |-----|--------|----------------------------------------------|
//! | 0   | nil    | (none)                                       |
//! | 1   | error  | `u32` length + UTF-8 message                 |
//! | 2   | string | `u32` length + raw bytes                     |
//! | 3   | int64  | 8 bytes, two's complement                    |
//! | 4   | double | 8 bytes, IEEE 754                            |
//! | 5   | array  | `u32` element count + that many values       |
//!
//! ## Examples
//!
//! nil: `00`
//! string "hi": `02 02 00 00 00 68 69`
//! array [nil]: `05 01 00 00 00 00`

use crate::buffer::ByteBuffer;
use crate::protocol::codec::CodecError;
use bytes::Bytes;
use std::fmt;

/// Wire tags, one per [`Value`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Nil = 0,
    Error = 1,
    Str = 2,
    Int = 3,
    Double = 4,
    Array = 5,
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(Tag::Nil),
            1 => Ok(Tag::Error),
            2 => Ok(Tag::Str),
            3 => Ok(Tag::Int),
            4 => Ok(Tag::Double),
            5 => Ok(Tag::Array),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

/// Represents a value in the wire protocol.
///
/// Requests are always an `Array` of `Str`. Responses can be any variant:
/// `Nil` signals success, `Error` carries a human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value; also the success marker.
    Nil,

    /// A command-level failure; the message is raw bytes on the wire.
    Error(Bytes),

    /// Binary-safe string.
    Str(Bytes),

    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit float.
    Double(f64),

    /// Ordered list of nested values.
    Array(Vec<Value>),
}

impl Value {
    /// The success response.
    pub fn ok() -> Self {
        Value::Nil
    }

    /// Creates a new error response.
    ///
    /// # Example
    /// ```
    /// use nimbuskv::protocol::Value;
    /// let err = Value::error("key not found");
    /// assert!(err.is_error());
    /// ```
    pub fn error(msg: impl Into<Bytes>) -> Self {
        Value::Error(msg.into())
    }

    /// Creates a new string value.
    pub fn string(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }

    /// Creates a new integer value.
    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    /// Creates a new double value.
    pub fn double(n: f64) -> Self {
        Value::Double(n)
    }

    /// Creates an array value.
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(values)
    }

    /// The wire tag of this value.
    pub fn tag(&self) -> Tag {
        match self {
            Value::Nil => Tag::Nil,
            Value::Error(_) => Tag::Error,
            Value::Str(_) => Tag::Str,
            Value::Int(_) => Tag::Int,
            Value::Double(_) => Tag::Double,
            Value::Array(_) => Tag::Array,
        }
    }

    /// Number of bytes [`encode_into`](Self::encode_into) will write.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Nil => 0,
            Value::Error(msg) => 4 + msg.len(),
            Value::Str(data) => 4 + data.len(),
            Value::Int(_) | Value::Double(_) => 8,
            Value::Array(values) => 4 + values.iter().map(Value::encoded_len).sum::<usize>(),
        }
    }

    /// Encodes the value into a fresh vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.as_slice().to_vec()
    }

    /// Appends the encoded value to `buf`.
    ///
    /// Lengths are written as `u32`; callers bound the total size through
    /// the frame limit before encoding.
    pub fn encode_into(&self, buf: &mut ByteBuffer) {
        buf.append(&[self.tag() as u8]);
        match self {
            Value::Nil => {}
            Value::Error(msg) => {
                buf.append(&(msg.len() as u32).to_le_bytes());
                buf.append(msg);
            }
            Value::Str(data) => {
                buf.append(&(data.len() as u32).to_le_bytes());
                buf.append(data);
            }
            Value::Int(n) => buf.append(&n.to_le_bytes()),
            Value::Double(n) => buf.append(&n.to_le_bytes()),
            Value::Array(values) => {
                buf.append(&(values.len() as u32).to_le_bytes());
                for value in values {
                    value.encode_into(buf);
                }
            }
        }
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "(nil)"),
            Value::Error(msg) => write!(f, "(error) {}", String::from_utf8_lossy(msg)),
            Value::Str(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            Value::Int(n) => write!(f, "(integer) {}", n),
            Value::Double(n) => write!(f, "(double) {}", n),
            Value::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            writeln!(f)?;
                        }
                        write!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}
