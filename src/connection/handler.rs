//! Connection Handler Module
//!
//! Per-client state for the event loop. A [`Connection`] never blocks: the
//! server calls into it when the poller reports readiness and the
//! connection does as much work as the socket allows, then returns.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. accept()  ──>  want_read
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────┐
//!    │  readable                        │
//!    │   read until WouldBlock          │
//!    │   decode complete frames         │
//!    │   execute, queue each response   │
//!    └───────────────┬──────────────────┘
//!                    │ responses pending
//!                    ▼
//! 3. ┌──────────────────────────────────┐
//!    │  want_write                      │
//!    │   write until empty/WouldBlock   │
//!    └───────────────┬──────────────────┘
//!                    │ drained
//!                    ▼
//!               back to 2
//!
//! EOF, I/O error or protocol violation  ──>  want_close  ──>  destroyed
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream protocol: a single read can hold half a frame or
//! several pipelined frames. Incoming bytes accumulate in a [`ByteBuffer`]
//! until a complete frame is present; responses accumulate in another
//! until the socket accepts them.

use crate::buffer::ByteBuffer;
use crate::commands::CommandHandler;
use crate::connection::registry::NodeId;
use crate::protocol::{try_request_frame, write_frame, CodecError, FrameLimits, Value};
use crate::storage::StorageEngine;
use bytes::Buf;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Size of each socket read
const READ_CHUNK: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Maximum pending response bytes per connection (64 MiB)
pub const MAX_WRITE_BUFFER: usize = 64 << 20;

/// Error returned instead of a response that cannot fit in one frame.
pub const ERR_RESPONSE_TOO_BIG: &str = "response too big";

/// Statistics for connection handling
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: u64,
    /// Currently active connections
    pub active_connections: u64,
    /// Total commands processed
    pub commands_processed: u64,
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&mut self) {
        self.connections_accepted += 1;
        self.active_connections += 1;
    }

    pub fn connection_closed(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }

    pub fn command_processed(&mut self) {
        self.commands_processed += 1;
    }

    pub fn bytes_read(&mut self, count: usize) {
        self.bytes_read += count as u64;
    }

    pub fn bytes_written(&mut self, count: usize) {
        self.bytes_written += count as u64;
    }
}

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Incoming frame limits
    pub frame: FrameLimits,
    /// Pending response bytes before the connection is dropped
    pub max_write_buffer: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            frame: FrameLimits::default(),
            max_write_buffer: MAX_WRITE_BUFFER,
        }
    }
}

/// Everything a connection needs from the server to execute requests.
pub struct Context<'a> {
    pub storage: &'a mut StorageEngine,
    pub commands: &'a CommandHandler,
    pub limits: ConnectionLimits,
    pub stats: &'a mut ConnectionStats,
    pub now: Instant,
}

/// One client connection driven by the event loop.
pub struct Connection {
    /// The non-blocking socket
    stream: TcpStream,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// This connection's slot in the recency list
    node: NodeId,

    want_read: bool,
    want_write: bool,
    want_close: bool,

    /// The peer shut down its write half
    eof: bool,

    /// Interest currently registered with the poller
    registered: Option<Interest>,

    /// Buffer for incoming data
    read_buf: ByteBuffer,

    /// Buffer for outgoing responses
    write_buf: ByteBuffer,

    /// Last time this connection did any I/O
    last_active: Instant,
}

impl Connection {
    /// Creates a connection that starts out waiting for a request.
    pub fn new(stream: TcpStream, addr: SocketAddr, node: NodeId, now: Instant) -> Self {
        Self {
            stream,
            addr,
            node,
            want_read: true,
            want_write: false,
            want_close: false,
            eof: false,
            registered: None,
            read_buf: ByteBuffer::with_capacity(INITIAL_BUFFER_SIZE),
            write_buf: ByteBuffer::with_capacity(INITIAL_BUFFER_SIZE),
            last_active: now,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_active = now;
    }

    pub fn want_read(&self) -> bool {
        self.want_read
    }

    pub fn want_write(&self) -> bool {
        self.want_write
    }

    pub fn want_close(&self) -> bool {
        self.want_close
    }

    /// Marks the connection for destruction at the end of this iteration.
    pub fn close(&mut self) {
        self.want_close = true;
    }

    /// Bytes waiting to be written.
    pub fn pending_output(&self) -> usize {
        self.write_buf.size()
    }

    /// The poller interest matching the current state.
    fn interest(&self) -> Option<Interest> {
        match (self.want_read, self.want_write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Registers the socket, or updates its registration if the wanted
    /// interest changed since the last call.
    pub fn sync_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let wanted = self.interest();
        if wanted == self.registered {
            return Ok(());
        }
        match (self.registered, wanted) {
            (None, Some(interest)) => registry.register(&mut self.stream, token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(&mut self.stream, token, interest)?,
            (Some(_), None) => registry.deregister(&mut self.stream)?,
            (None, None) => {}
        }
        self.registered = wanted;
        Ok(())
    }

    /// Removes the socket from the poller.
    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        if self.registered.take().is_some() {
            registry.deregister(&mut self.stream)?;
        }
        Ok(())
    }

    /// Handles a readable event.
    ///
    /// Reads until the socket would block, executing every complete request
    /// as soon as it is buffered. Responses are queued and a write is
    /// attempted right away.
    pub fn handle_readable(&mut self, ctx: &mut Context<'_>) -> Result<(), ConnectionError> {
        if !self.want_read {
            return Ok(());
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    ctx.stats.bytes_read(n);
                    trace!(client = %self.addr, bytes = n, "Read data");
                    self.read_buf.append(&chunk[..n]);
                    self.process_requests(ctx)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if self.eof {
            self.want_read = false;
            if !self.read_buf.empty() {
                return Err(ConnectionError::UnexpectedEof);
            }
            if self.write_buf.empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
        }

        if !self.write_buf.empty() {
            self.want_read = false;
            self.want_write = true;
            return self.handle_writable(ctx.stats);
        }
        Ok(())
    }

    /// Handles a writable event.
    ///
    /// Writes until the buffer is empty or the socket would block. Once
    /// drained the connection goes back to reading, or closes if the peer
    /// has already hung up.
    pub fn handle_writable(&mut self, stats: &mut ConnectionStats) -> Result<(), ConnectionError> {
        if !self.want_write {
            return Ok(());
        }

        while self.write_buf.has_remaining() {
            match self.stream.write(self.write_buf.chunk()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.write_buf.advance(n);
                    stats.bytes_written(n);
                    trace!(client = %self.addr, bytes = n, "Sent response");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.want_write = false;
        if self.eof {
            self.want_close = true;
        } else {
            self.want_read = true;
        }
        Ok(())
    }

    /// Executes every complete request in the read buffer, in order.
    fn process_requests(&mut self, ctx: &mut Context<'_>) -> Result<(), ConnectionError> {
        while let Some((args, consumed)) =
            try_request_frame(self.read_buf.as_slice(), ctx.limits.frame)?
        {
            self.read_buf.consume(consumed);
            trace!(
                client = %self.addr,
                consumed = consumed,
                remaining = self.read_buf.size(),
                "Parsed request"
            );

            let response = ctx.commands.execute(ctx.storage, &args, ctx.now);
            ctx.stats.command_processed();
            self.queue_response(&response, ctx.limits)?;
        }
        Ok(())
    }

    /// Appends a framed response to the write buffer.
    fn queue_response(
        &mut self,
        response: &Value,
        limits: ConnectionLimits,
    ) -> Result<(), ConnectionError> {
        let max_frame = limits.frame.max_frame;
        if let Err(e) = write_frame(&mut self.write_buf, response, max_frame) {
            debug!(client = %self.addr, error = %e, "Response replaced");
            write_frame(&mut self.write_buf, &Value::error(ERR_RESPONSE_TOO_BIG), max_frame)?;
        }

        if self.write_buf.size() > limits.max_write_buffer {
            warn!(
                client = %self.addr,
                size = self.write_buf.size(),
                "Write buffer limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Malformed or oversized frame
    #[error("Protocol error: {0}")]
    CodecError(#[from] CodecError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Too many responses the client is not reading
    #[error("Write buffer limit exceeded")]
    BufferFull,
}

impl ConnectionError {
    /// Returns `true` for the ordinary ways a client goes away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::ClientDisconnected => true,
            ConnectionError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
