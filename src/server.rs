//! Event Loop
//!
//! The whole server runs on one thread. A single `mio::Poll` reports
//! readiness for the listening socket, every client socket, and a waker
//! used for shutdown. Each iteration:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ 1. timeout = min(idle deadline of least recent connection,   │
//! │                  earliest key expiration) - now              │
//! │ 2. poll(timeout)                                             │
//! │ 3. listener ready   → accept until WouldBlock                │
//! │    connection ready → read/execute/write, move to the front  │
//! │                       of the recency list                    │
//! │ 4. close idle connections, walking from the back of the list │
//! │ 5. evict every key whose deadline has passed                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in the loop blocks except the poll itself, and the poll never
//! sleeps past the next moment something has to be cleaned up.
//!
//! ## Example
//!
//! ```no_run
//! use nimbuskv::config::ServerConfig;
//! use nimbuskv::server::Server;
//!
//! let mut server = Server::bind(ServerConfig::default())?;
//! let shutdown = server.shutdown_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     let _ = shutdown.shutdown();
//! });
//! server.run()?;
//! # Ok::<(), nimbuskv::server::ServerError>(())
//! ```

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::{
    Connection, ConnectionError, ConnectionLimits, ConnectionRegistry, ConnectionStats, Context,
};
use crate::storage::StorageEngine;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Token of the listening socket. Connection tokens are slab keys.
const LISTENER: Token = Token(usize::MAX - 1);

/// Token of the shutdown waker
const WAKER: Token = Token(usize::MAX - 2);

/// Readiness events handled per poll
const EVENT_CAPACITY: usize = 1024;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not resolve bind address {0}")]
    Resolve(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Stops a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Asks the server to stop; it returns from `run` on its next wake-up.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// The single-threaded cache server.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,

    connections: Slab<Connection>,
    registry: ConnectionRegistry<Token>,

    storage: StorageEngine,
    commands: CommandHandler,
    limits: ConnectionLimits,
    idle_timeout: Duration,
    stats: ConnectionStats,
}

impl Server {
    /// Binds the listening socket and sets up the poller.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let address = config.bind_address();
        let addr = address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ServerError::Resolve(address.clone()))?;

        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        info!(
            addr = %local_addr,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            default_ttl_ms = config.default_ttl.as_millis() as u64,
            "Server bound"
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            shutdown: ShutdownHandle {
                waker: Arc::new(waker),
                requested: Arc::new(AtomicBool::new(false)),
            },
            connections: Slab::new(),
            registry: ConnectionRegistry::new(),
            storage: StorageEngine::with_load_factor(config.max_load_factor),
            commands: CommandHandler::new(config.default_ttl),
            limits: config.limits,
            idle_timeout: config.idle_timeout,
            stats: ConnectionStats::new(),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Runs the event loop until shutdown is requested.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "Ready to accept connections");
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        while !self.shutdown.is_requested() {
            let timeout = self.next_timeout(Instant::now());
            trace!(timeout_ms = ?timeout.map(|t| t.as_millis()), "Polling");

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Poll(e));
            }

            let now = Instant::now();
            self.dispatch(&events, now);

            self.close_idle(now);
            let expired = self.storage.evict_expired(now);
            if expired > 0 {
                debug!(count = expired, "Evicted expired keys");
            }
        }

        info!(
            connections = self.connections.len(),
            "Shutdown requested, closing connections"
        );
        let tokens: Vec<Token> = self.connections.iter().map(|(key, _)| Token(key)).collect();
        for token in tokens {
            self.destroy(token);
        }
        Ok(())
    }

    /// How long the next poll may sleep; `None` means until an event.
    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        let idle = self
            .registry
            .least_recent()
            .and_then(|(_, token)| self.connections.get(token.0))
            .map(|conn| conn.last_active() + self.idle_timeout);
        let expiry = self.storage.next_expiry();

        let deadline = match (idle, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Handles one batch of readiness events: new connections are accepted
    /// before any ready connection is serviced.
    fn dispatch(&mut self, events: &Events, now: Instant) {
        if events.iter().any(|event| event.token() == LISTENER) {
            self.accept_all(now);
        }
        for event in events.iter() {
            match event.token() {
                LISTENER | WAKER => {}
                token => self.service(token, event, now),
            }
        }
    }

    /// Accepts every pending connection.
    fn accept_all(&mut self, now: Instant) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.register(stream, addr, now),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    break;
                }
            }
        }
    }

    fn register(&mut self, stream: TcpStream, addr: SocketAddr, now: Instant) {
        if let Err(e) = stream.set_nodelay(true) {
            trace!(client = %addr, error = %e, "Could not set TCP_NODELAY");
        }

        let entry = self.connections.vacant_entry();
        let token = Token(entry.key());
        let node = self.registry.insert(token);
        let mut conn = Connection::new(stream, addr, node, now);

        if let Err(e) = conn.sync_interest(self.poll.registry(), token) {
            warn!(client = %addr, error = %e, "Failed to register connection");
            self.registry.remove(node);
            return;
        }

        entry.insert(conn);
        self.stats.connection_opened();
        debug!(client = %addr, token = token.0, "Client connected");
    }

    /// Advances one connection after a readiness event.
    fn service(&mut self, token: Token, event: &Event, now: Instant) {
        let Some(conn) = self.connections.get_mut(token.0) else {
            return;
        };

        conn.touch(now);
        self.registry.touch(conn.node());

        let mut ctx = Context {
            storage: &mut self.storage,
            commands: &self.commands,
            limits: self.limits,
            stats: &mut self.stats,
            now,
        };

        if let Err(e) = drive(conn, event, &mut ctx) {
            if e.is_disconnect() {
                debug!(client = %conn.addr(), "Client disconnected");
            } else {
                warn!(client = %conn.addr(), error = %e, "Connection error");
            }
            conn.close();
        }

        if event.is_error() {
            conn.close();
        }

        if !conn.want_close() {
            if let Err(e) = conn.sync_interest(self.poll.registry(), token) {
                warn!(client = %conn.addr(), error = %e, "Failed to update interest");
                conn.close();
            }
        }

        if conn.want_close() {
            self.destroy(token);
        }
    }

    /// Closes connections idle for at least `idle_timeout`, least recently
    /// active first. Stops at the first connection that is still fresh.
    fn close_idle(&mut self, now: Instant) {
        while let Some((node, &token)) = self.registry.least_recent() {
            let Some(conn) = self.connections.get(token.0) else {
                self.registry.remove(node);
                continue;
            };
            if conn.last_active() + self.idle_timeout > now {
                break;
            }
            debug!(client = %conn.addr(), token = token.0, "Closing idle connection");
            self.destroy(token);
        }
    }

    /// Tears a connection down: deregisters it from the poller, unlinks it
    /// from the recency list, and drops the socket and its buffers.
    fn destroy(&mut self, token: Token) {
        if !self.connections.contains(token.0) {
            return;
        }
        let mut conn = self.connections.remove(token.0);

        if let Err(e) = conn.deregister(self.poll.registry()) {
            trace!(client = %conn.addr(), error = %e, "Deregister failed");
        }
        self.registry.remove(conn.node());
        self.stats.connection_closed();
        trace!(
            client = %conn.addr(),
            token = token.0,
            unsent = conn.pending_output(),
            "Connection destroyed"
        );
    }
}

fn drive(conn: &mut Connection, event: &Event, ctx: &mut Context<'_>) -> Result<(), ConnectionError> {
    if event.is_readable() {
        conn.handle_readable(ctx)?;
    }
    if event.is_writable() {
        conn.handle_writable(ctx.stats)?;
    }
    Ok(())
}
