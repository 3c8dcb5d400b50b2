//! Command Handler Module
//!
//! Takes a decoded request (an array of byte strings) and executes it
//! against the storage engine. Command names are matched ASCII
//! case-insensitively; keys and values are opaque bytes.
//!
//! ## Supported Commands
//!
//! - `GET key [key ...]` - Array with one result per key: the value, or the
//!   error `null` when the key is missing
//! - `SET key value [ttl_ms]` - Upsert; without `ttl_ms` the default TTL applies
//! - `DEL key` - Remove a key and cancel its expiration
//! - `EXPIRE key ttl_ms` - Reset the TTL of an existing key
//! - `PERSIST key` - Cancel the expiration of an existing key
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  execute()  │───>│  dispatch   │───>│  cmd_*()    │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      &mut StorageEngine     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures are reported as [`Value::Error`] and never close the connection.

use crate::protocol::Value;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Error returned for a missing key on `DEL`, `EXPIRE` and `PERSIST`.
pub const ERR_KEY_NOT_FOUND: &str = "key not found";

/// Per-key marker returned by `GET` for a missing key.
pub const ERR_NULL: &str = "null";

/// Error returned for a zero or negative TTL.
pub const ERR_TTL_NEGATIVE: &str = "ttl cannot be negative";

/// Error returned when a TTL argument is not a decimal integer.
pub const ERR_TTL_NOT_INTEGER: &str = "ttl is not an integer";

/// Error returned for any unrecognised request shape.
pub const ERR_INVALID_COMMAND: &str = "invalid command";

/// Executes requests against a [`StorageEngine`].
#[derive(Debug, Clone, Copy)]
pub struct CommandHandler {
    /// TTL applied by `SET` when the request carries none
    default_ttl: Duration,
}

impl CommandHandler {
    /// Creates a new command handler with the given default key TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    /// TTL used by `SET` without an explicit `ttl_ms`.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `storage` - The keyspace to operate on
    /// * `args` - The decoded request, command name first
    /// * `now` - The current time, used for every TTL computation
    ///
    /// # Returns
    ///
    /// The value to send back to the client.
    pub fn execute(&self, storage: &mut StorageEngine, args: &[Bytes], now: Instant) -> Value {
        let Some((name, rest)) = args.split_first() else {
            return Value::error(ERR_INVALID_COMMAND);
        };

        let is = |cmd: &str| name.eq_ignore_ascii_case(cmd.as_bytes());

        match rest {
            keys if is("get") && !keys.is_empty() => self.cmd_get(storage, keys, now),
            [key, value] if is("set") => self.cmd_set(storage, key, value, None, now),
            [key, value, ttl] if is("set") => self.cmd_set(storage, key, value, Some(ttl), now),
            [key] if is("del") => self.cmd_del(storage, key),
            [key, ttl] if is("expire") => self.cmd_expire(storage, key, ttl, now),
            [key] if is("persist") => self.cmd_persist(storage, key),
            _ => Value::error(ERR_INVALID_COMMAND),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    /// Parses a TTL argument in milliseconds; it must be a positive integer.
    fn parse_ttl(arg: &[u8]) -> Result<Duration, Value> {
        let ms: i64 = std::str::from_utf8(arg)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Value::error(ERR_TTL_NOT_INTEGER))?;

        if ms <= 0 {
            return Err(Value::error(ERR_TTL_NEGATIVE));
        }
        Ok(Duration::from_millis(ms as u64))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// GET key [key ...]
    fn cmd_get(&self, storage: &mut StorageEngine, keys: &[Bytes], now: Instant) -> Value {
        let values = keys
            .iter()
            .map(|key| match storage.get(key, now) {
                Some(value) => Value::Str(value),
                None => Value::error(ERR_NULL),
            })
            .collect();
        Value::array(values)
    }

    /// SET key value [ttl_ms]
    fn cmd_set(
        &self,
        storage: &mut StorageEngine,
        key: &Bytes,
        value: &Bytes,
        ttl: Option<&Bytes>,
        now: Instant,
    ) -> Value {
        let ttl = match ttl.map(|arg| Self::parse_ttl(arg)).transpose() {
            Ok(ttl) => ttl.unwrap_or(self.default_ttl),
            Err(err) => return err,
        };

        storage.set(key.clone(), value.clone(), Some(ttl), now);
        Value::ok()
    }

    /// DEL key
    fn cmd_del(&self, storage: &mut StorageEngine, key: &Bytes) -> Value {
        if storage.delete(key) {
            Value::ok()
        } else {
            Value::error(ERR_KEY_NOT_FOUND)
        }
    }

    /// EXPIRE key ttl_ms
    fn cmd_expire(
        &self,
        storage: &mut StorageEngine,
        key: &Bytes,
        ttl: &Bytes,
        now: Instant,
    ) -> Value {
        let ttl = match Self::parse_ttl(ttl) {
            Ok(ttl) => ttl,
            Err(err) => return err,
        };

        if storage.expire(key, ttl, now) {
            Value::ok()
        } else {
            Value::error(ERR_KEY_NOT_FOUND)
        }
    }

    /// PERSIST key
    fn cmd_persist(&self, storage: &mut StorageEngine, key: &Bytes) -> Value {
        if storage.persist(key) {
            Value::ok()
        } else {
            Value::error(ERR_KEY_NOT_FOUND)
        }
    }
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handler() -> (CommandHandler, StorageEngine) {
        (CommandHandler::default(), StorageEngine::new())
    }

    fn make_command(args: &[&str]) -> Vec<Bytes> {
        args.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    fn strings(values: &[&str]) -> Value {
        Value::array(
            values
                .iter()
                .map(|s| Value::string(Bytes::from(s.to_string())))
                .collect(),
        )
    }

    #[test]
    fn test_set_get() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        let response = handler.execute(&mut storage, &make_command(&["set", "key", "value"]), now);
        assert_eq!(response, Value::ok());

        let response = handler.execute(&mut storage, &make_command(&["get", "key"]), now);
        assert_eq!(response, strings(&["value"]));
    }

    #[test]
    fn test_get_multiple_with_missing() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        handler.execute(&mut storage, &make_command(&["set", "a", "1"]), now);
        let response = handler.execute(&mut storage, &make_command(&["get", "a", "b"]), now);
        assert_eq!(
            response,
            Value::array(vec![Value::string(Bytes::from("1")), Value::error("null")])
        );
    }

    #[test]
    fn test_command_names_case_insensitive() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        assert_eq!(
            handler.execute(&mut storage, &make_command(&["SeT", "k", "v"]), now),
            Value::ok()
        );
        assert_eq!(
            handler.execute(&mut storage, &make_command(&["GET", "k"]), now),
            strings(&["v"])
        );
    }

    #[test]
    fn test_set_applies_default_ttl() {
        let handler = CommandHandler::new(Duration::from_millis(500));
        let mut storage = StorageEngine::new();
        let now = Instant::now();

        handler.execute(&mut storage, &make_command(&["set", "k", "v"]), now);
        assert_eq!(storage.expires_at(b"k"), Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn test_set_with_ttl() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        let response = handler.execute(&mut storage, &make_command(&["set", "a", "1", "100"]), now);
        assert_eq!(response, Value::ok());

        let later = now + Duration::from_millis(150);
        assert_eq!(
            handler.execute(&mut storage, &make_command(&["get", "a"]), later),
            Value::array(vec![Value::error("null")])
        );
    }

    #[test]
    fn test_set_rejects_bad_ttl() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        for ttl in ["0", "-5"] {
            let response = handler.execute(&mut storage, &make_command(&["set", "k", "v", ttl]), now);
            assert_eq!(response, Value::error("ttl cannot be negative"));
        }
        let response = handler.execute(&mut storage, &make_command(&["set", "k", "v", "soon"]), now);
        assert_eq!(response, Value::error("ttl is not an integer"));

        // Nothing was written
        assert!(!storage.contains(b"k"));
    }

    #[test]
    fn test_set_overwrites_value_and_refreshes_ttl() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        handler.execute(&mut storage, &make_command(&["set", "k", "old", "100"]), now);
        handler.execute(&mut storage, &make_command(&["set", "k", "new", "1000"]), now);

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.expires_at(b"k"), Some(now + Duration::from_millis(1000)));
        assert_eq!(
            handler.execute(&mut storage, &make_command(&["get", "k"]), now),
            strings(&["new"])
        );
    }

    #[test]
    fn test_del() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        handler.execute(&mut storage, &make_command(&["set", "k", "v"]), now);

        let response = handler.execute(&mut storage, &make_command(&["del", "k"]), now);
        assert_eq!(response, Value::ok());

        let response = handler.execute(&mut storage, &make_command(&["del", "k"]), now);
        assert_eq!(response, Value::error("key not found"));
        assert!(storage.next_expiry().is_none());
    }

    #[test]
    fn test_expire() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        handler.execute(&mut storage, &make_command(&["set", "k", "v"]), now);

        let response = handler.execute(&mut storage, &make_command(&["expire", "k", "50"]), now);
        assert_eq!(response, Value::ok());
        assert_eq!(storage.expires_at(b"k"), Some(now + Duration::from_millis(50)));

        let response = handler.execute(&mut storage, &make_command(&["expire", "k", "0"]), now);
        assert_eq!(response, Value::error("ttl cannot be negative"));
        assert_eq!(storage.expires_at(b"k"), Some(now + Duration::from_millis(50)));

        let response = handler.execute(&mut storage, &make_command(&["expire", "nope", "50"]), now);
        assert_eq!(response, Value::error("key not found"));
    }

    #[test]
    fn test_persist() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        handler.execute(&mut storage, &make_command(&["set", "a", "1", "100"]), now);
        let response = handler.execute(&mut storage, &make_command(&["persist", "a"]), now);
        assert_eq!(response, Value::ok());
        assert!(storage.expires_at(b"a").is_none());

        let later = now + Duration::from_millis(150);
        assert_eq!(storage.evict_expired(later), 0);
        assert_eq!(
            handler.execute(&mut storage, &make_command(&["get", "a"]), later),
            strings(&["1"])
        );

        let response = handler.execute(&mut storage, &make_command(&["persist", "b"]), now);
        assert_eq!(response, Value::error("key not found"));
    }

    #[test]
    fn test_invalid_shapes() {
        let (handler, mut storage) = create_handler();
        let now = Instant::now();

        for cmd in [
            vec![],
            vec!["get"],
            vec!["set", "k"],
            vec!["set", "k", "v", "1", "extra"],
            vec!["del"],
            vec!["del", "a", "b"],
            vec!["expire", "k"],
            vec!["persist"],
            vec!["unknown", "k"],
        ] {
            let response = handler.execute(&mut storage, &make_command(&cmd), now);
            assert_eq!(response, Value::error("invalid command"), "{:?}", cmd);
        }
    }
}
