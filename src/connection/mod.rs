//! Connection Module
//!
//! Client connections as seen by the single-threaded event loop. There is
//! no task per client: every [`Connection`] is a small state machine that
//! the server advances whenever the poller reports the socket ready.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Server (event loop)                       │
//! │                                                             │
//! │   Slab<Connection>             ConnectionRegistry<Token>    │
//! │   ┌─────┬─────┬─────┐          HEAD ⇄ c2 ⇄ c0 ⇄ c1 ⇄ TAIL   │
//! │   │ c0  │ c1  │ c2  │                            ▲          │
//! │   └─────┴─────┴─────┘                            │          │
//! │      │                                  idle sweep starts   │
//! │      │ readable / writable                      here        │
//! │      ▼                                                      │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Decode      │───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Queue resp  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking I/O**: `mio` sockets, drained until `WouldBlock`
//! - **Pipelining**: Multiple requests in a single read are answered in order
//! - **Idle tracking**: O(1) recency updates through the registry
//! - **Statistics**: Tracks connection and command metrics

pub mod handler;
pub mod registry;

// Re-export commonly used types
pub use handler::{
    Connection, ConnectionError, ConnectionLimits, ConnectionStats, Context, MAX_WRITE_BUFFER,
};
pub use registry::{ConnectionRegistry, NodeId};
