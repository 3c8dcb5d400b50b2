//! # NimbusKV - A Single-Threaded In-Memory Cache Server
//!
//! NimbusKV is an in-memory key-value cache reachable over a compact,
//! length-prefixed binary protocol. Keys carry an optional time-to-live and
//! idle client connections are reclaimed automatically.
//!
//! ## Features
//!
//! - **Binary Protocol**: Tagged values in little-endian frames, fully bounds-checked
//! - **One Thread, No Locks**: A `mio` readiness loop owns all state
//! - **TTL Support**: O(log n) expiry install, refresh and cancel
//! - **Idle Reclamation**: Quiet connections are closed after a timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              NimbusKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (mio loop)  │    │ (state m/c) │    │  Handler    │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │         │                  │                  │                         │
//! │         ▼                  ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │ Connection  │    │ ByteBuffer  │    │        StorageEngine         │ │
//! │  │  Registry   │    │ + WireCodec │    │  HashIndex + ExpirationQueue │ │
//! │  └─────────────┘    └─────────────┘    └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use nimbuskv::config::ServerConfig;
//! use nimbuskv::server::Server;
//!
//! fn main() -> Result<(), nimbuskv::server::ServerError> {
//!     let mut server = Server::bind(ServerConfig::default())?;
//!     server.run()
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `get key [key ...]`
//! - `set key value [ttl_ms]`
//! - `del key`
//! - `expire key ttl_ms`
//! - `persist key`
//!
//! ## Module Overview
//!
//! - [`buffer`]: Growable FIFO byte buffer
//! - [`protocol`]: Tagged value format and frame codec
//! - [`storage`]: Hash index, expiration queue and the keyspace built on them
//! - [`commands`]: Command dispatch
//! - [`connection`]: Per-client state machine and the idle-tracking registry
//! - [`server`]: The event loop
//! - [`client`]: Async client used by `nimbuskv-cli`
//! - [`config`]: Command-line configuration
//!
//! ## Design Highlights
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: When a key is read, we check if it's expired
//! 2. **Active**: After every wake-up the loop pops all due keys from the heap
//!
//! The loop's poll timeout is the nearer of the next key expiration and the
//! next idle-connection deadline, so both are enforced on time without a
//! background task.

use std::time::Duration;

pub mod buffer;
pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use buffer::ByteBuffer;
pub use client::{Client, ClientError};
pub use commands::CommandHandler;
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use protocol::{CodecError, Value};
pub use server::{Server, ServerError, ShutdownHandle};
pub use storage::StorageEngine;

/// The default port NimbusKV listens on
pub const DEFAULT_PORT: u16 = 1234;

/// The default host NimbusKV binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Connections silent for this long are closed
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// TTL applied by `set` when none is given
pub const DEFAULT_TTL: Duration = Duration::from_millis(20_000);

/// Version of NimbusKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
