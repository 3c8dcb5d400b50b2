//! Async Client
//!
//! A small `tokio` client for the binary protocol. It frames requests,
//! writes them, and decodes responses one frame at a time, so callers can
//! pipeline by sending several requests before reading.
//!
//! ## Example
//!
//! ```no_run
//! use nimbuskv::client::Client;
//!
//! # async fn demo() -> Result<(), nimbuskv::client::ClientError> {
//! let mut client = Client::connect("127.0.0.1:1234").await?;
//! client.request(&["set", "name", "nimbus"]).await?;
//! let value = client.request(&["get", "name"]).await?;
//! println!("{}", value);
//! # Ok(())
//! # }
//! ```

use crate::buffer::ByteBuffer;
use crate::protocol::{try_frame, write_request, CodecError, Value, MAX_FRAME_SIZE};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors returned by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request could not be encoded or the response could not be decoded
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed by server")]
    ConnectionClosed,
}

/// A connection to a NimbusKV server.
pub struct Client<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
    max_frame: usize,
}

impl Client<TcpStream> {
    /// Connects to the server at `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_frame: MAX_FRAME_SIZE,
        }
    }

    /// Sends one request and waits for its response.
    pub async fn request<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Value, ClientError> {
        self.send(args).await?;
        self.read_response().await
    }

    /// Writes one request without waiting for the response.
    pub async fn send<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<(), ClientError> {
        let mut out = ByteBuffer::new();
        write_request(&mut out, args, self.max_frame)?;
        self.stream.write_all(out.as_slice()).await?;
        self.stream.flush().await?;
        trace!(bytes = out.size(), "Sent request");
        Ok(())
    }

    /// Reads the next response frame.
    pub async fn read_response(&mut self) -> Result<Value, ClientError> {
        loop {
            if let Some((value, consumed)) = try_frame(&self.buffer, self.max_frame)? {
                self.buffer.advance(consumed);
                return Ok(value);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}
