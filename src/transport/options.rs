//! Connection, client and server configuration.
//!
//! All timings default to the values a browser-facing deployment expects:
//!
//! | Setting | Default |
//! |---------|---------|
//! | write wait | 10 s |
//! | pong wait | 60 s |
//! | ping period | 54 s (9/10 of pong wait) |
//! | max message size | 102 400 bytes |
//! | request timeout | 10 s |
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use wsrest::{ClientOptions, ConnOptions, ServerOptions};
//!
//! let server = ServerOptions::new()
//!     .with_upgrade_path("/socket")
//!     .with_conn(ConnOptions::new().with_max_message_size(1 << 20));
//!
//! let client = ClientOptions::new().with_request_timeout(Duration::from_secs(2));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed to write one frame.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between pongs before the peer is considered dead.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Interval between pings. Must stay below the pong wait.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// Largest inbound message accepted from a peer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 102_400;

/// Outbound frames buffered per connection before writers wait.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1;

/// Handler tasks allowed to run at once on one connection.
pub const DEFAULT_MAX_INFLIGHT_HANDLERS: usize = 8192;

/// Time a client call waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a closing client waits for the server to echo the close.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Path that upgrades to WebSocket.
pub const DEFAULT_UPGRADE_PATH: &str = "/ws";

// ============================================================================
// ConnOptions
// ============================================================================

/// Per-connection limits of the server-side pumps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnOptions {
    /// Deadline for each outbound frame write.
    pub write_wait: Duration,

    /// Read deadline, extended whenever a pong arrives.
    pub pong_wait: Duration,

    /// Keepalive ping interval.
    pub ping_period: Duration,

    /// Inbound message size limit in bytes.
    pub max_message_size: usize,

    /// Capacity of the outbound frame queue.
    pub send_queue_capacity: usize,

    /// Concurrent handler limit; the read pump waits once it is reached.
    pub max_inflight_handlers: usize,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnOptions {
    /// Creates options with the default limits.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            max_inflight_handlers: DEFAULT_MAX_INFLIGHT_HANDLERS,
        }
    }

    /// Sets the write deadline.
    #[inline]
    #[must_use]
    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }

    /// Sets the pong wait and derives the ping period (9/10 of it).
    #[inline]
    #[must_use]
    pub fn with_pong_wait(mut self, wait: Duration) -> Self {
        self.pong_wait = wait;
        self.ping_period = wait * 9 / 10;
        self
    }

    /// Overrides the ping period.
    #[inline]
    #[must_use]
    pub fn with_ping_period(mut self, period: Duration) -> Self {
        self.ping_period = period;
        self
    }

    /// Sets the inbound message size limit.
    #[inline]
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Sets the outbound queue capacity.
    #[inline]
    #[must_use]
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }

    /// Sets the concurrent handler limit.
    #[inline]
    #[must_use]
    pub fn with_max_inflight_handlers(mut self, limit: usize) -> Self {
        self.max_inflight_handlers = limit;
        self
    }

    /// Validates the combination of settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a limit is zero or the ping period does
    /// not fit inside the pong wait.
    pub fn validate(&self) -> Result<()> {
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(Error::config(format!(
                "ping period {:?} must be non-zero and below pong wait {:?}",
                self.ping_period, self.pong_wait
            )));
        }
        if self.write_wait.is_zero() {
            return Err(Error::config("write wait must be non-zero"));
        }
        if self.max_message_size == 0 {
            return Err(Error::config("max message size must be non-zero"));
        }
        if self.send_queue_capacity == 0 {
            return Err(Error::config("send queue capacity must be non-zero"));
        }
        if self.max_inflight_handlers == 0 {
            return Err(Error::config("max inflight handlers must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Settings of the correlating client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Time a call waits for its reply.
    pub request_timeout: Duration,

    /// Deadline for writing one request frame.
    pub write_wait: Duration,

    /// Time `close` waits for the server to finish the close handshake.
    pub close_grace: Duration,

    /// Upper bound on outstanding calls; `None` means unbounded.
    pub max_pending_requests: Option<usize>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientOptions {
    /// Creates options with the default timings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            write_wait: DEFAULT_WRITE_WAIT,
            close_grace: DEFAULT_CLOSE_GRACE,
            max_pending_requests: None,
        }
    }

    /// Sets the reply timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the write deadline.
    #[inline]
    #[must_use]
    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }

    /// Sets the close grace period.
    #[inline]
    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Bounds the number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = Some(max);
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero timeout or a zero pending bound.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::config("request timeout must be non-zero"));
        }
        if self.write_wait.is_zero() {
            return Err(Error::config("write wait must be non-zero"));
        }
        if self.max_pending_requests == Some(0) {
            return Err(Error::config("max pending requests must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Settings of the dual-transport server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Path whose requests are upgraded to WebSocket.
    pub upgrade_path: String,

    /// Accept upgrades regardless of the `Origin` header.
    pub allow_any_origin: bool,

    /// Limits applied to every socket connection.
    pub conn: ConnOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerOptions {
    /// Creates options with the default upgrade path and limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            upgrade_path: DEFAULT_UPGRADE_PATH.to_string(),
            allow_any_origin: true,
            conn: ConnOptions::new(),
        }
    }

    /// Sets the upgrade path.
    #[inline]
    #[must_use]
    pub fn with_upgrade_path(mut self, path: impl Into<String>) -> Self {
        self.upgrade_path = path.into();
        self
    }

    /// Only accepts upgrades whose `Origin` matches the `Host` header.
    #[inline]
    #[must_use]
    pub fn with_same_origin_only(mut self) -> Self {
        self.allow_any_origin = false;
        self
    }

    /// Replaces the per-connection limits.
    #[inline]
    #[must_use]
    pub fn with_conn(mut self, conn: ConnOptions) -> Self {
        self.conn = conn;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the upgrade path is not absolute or the
    /// connection limits are invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.upgrade_path.starts_with('/') {
            return Err(Error::config(format!(
                "upgrade path {:?} must start with '/'",
                self.upgrade_path
            )));
        }
        self.conn.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let conn = ConnOptions::default();
        assert_eq!(conn.write_wait, Duration::from_secs(10));
        assert_eq!(conn.pong_wait, Duration::from_secs(60));
        assert_eq!(conn.ping_period, Duration::from_secs(54));
        assert_eq!(conn.max_message_size, 102_400);
        assert_ok!(conn.validate());

        let server = ServerOptions::default();
        assert_eq!(server.upgrade_path, "/ws");
        assert!(server.allow_any_origin);
        assert_ok!(server.validate());

        let client = ClientOptions::default();
        assert_eq!(client.request_timeout, Duration::from_secs(10));
        assert_eq!(client.max_pending_requests, None);
        assert_ok!(client.validate());
    }

    #[test]
    fn test_pong_wait_derives_ping_period() {
        let conn = ConnOptions::new().with_pong_wait(Duration::from_secs(10));
        assert_eq!(conn.ping_period, Duration::from_secs(9));
        assert_ok!(conn.validate());
    }

    #[test]
    fn test_ping_period_must_be_below_pong_wait() {
        let conn = ConnOptions::new()
            .with_pong_wait(Duration::from_secs(5))
            .with_ping_period(Duration::from_secs(5));
        assert!(matches!(conn.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert_err!(ConnOptions::new().with_max_message_size(0).validate());
        assert_err!(ConnOptions::new().with_send_queue_capacity(0).validate());
        assert_err!(ConnOptions::new().with_max_inflight_handlers(0).validate());
        assert_err!(ClientOptions::new().with_max_pending_requests(0).validate());
        assert_err!(ClientOptions::new().with_request_timeout(Duration::ZERO).validate());
    }

    #[test]
    fn test_upgrade_path_must_be_absolute() {
        let options = ServerOptions::new().with_upgrade_path("ws");
        assert_err!(options.validate());
    }
}
