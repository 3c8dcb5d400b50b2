//! Command Handler Module
//!
//! This module implements the command processing layer for NimbusKV.
//! It receives decoded requests, executes them against the storage engine,
//! and returns the response value.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Frame decoder  │  (protocol module)
//! └────────┬────────┘
//!          │ Vec<Bytes>
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `GET`, `SET`, `DEL`
//! - `EXPIRE`, `PERSIST`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
