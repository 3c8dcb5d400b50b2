//! Wire Protocol Implementation
//!
//! NimbusKV speaks a compact binary protocol over TCP: every message is a
//! little-endian `u32` length followed by one tagged value.
//!
//! ## Modules
//!
//! - `types`: Defines the `Value` enum, its wire tags and its encoding
//! - `codec`: Bounds-checked decoder and frame reader/writer
//!
//! ## Example
//!
//! ```
//! use nimbuskv::buffer::ByteBuffer;
//! use nimbuskv::protocol::{try_request_frame, write_request, FrameLimits, MAX_FRAME_SIZE};
//!
//! let mut out = ByteBuffer::new();
//! write_request(&mut out, &["get", "name"], MAX_FRAME_SIZE).unwrap();
//!
//! let (args, consumed) = try_request_frame(out.as_slice(), FrameLimits::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(args.len(), 2);
//! assert_eq!(consumed, out.size());
//! ```

pub mod codec;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{
    decode, decode_request, try_frame, try_request_frame, write_frame, write_request, CodecError,
    CodecResult, FrameLimits, LEN_PREFIX, MAX_ARGS, MAX_FRAME_SIZE, MAX_NESTING_DEPTH,
};
pub use types::{Tag, Value};
