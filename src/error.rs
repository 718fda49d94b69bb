//! Error types for wsrest.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsrest::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let reply = client.get("/go", &()).await?;
//!     println!("{}", reply.payload_to_string());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Payload | [`Error::Decode`], [`Error::Encoding`] |
//! | Routing | [`Error::NotFound`], [`Error::AlreadyResponded`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::ClosedByPeer`], [`Error::Transport`] |
//! | Calls | [`Error::RequestTimeout`], [`Error::TooManyPending`] |
//! | External | [`Error::Io`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

/// WebSocket close code for a normal closure handshake.
pub const CLOSE_NORMAL: u16 = 1000;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection, client or server options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// URL could not be parsed.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Parser message.
        message: String,
    },

    // ========================================================================
    // Payload Errors
    // ========================================================================
    /// Inbound frame or HTTP body could not be decoded.
    ///
    /// Never fatal to a connection: the frame or request is skipped.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// Payload could not be serialized.
    #[error("Encoding error: {message}")]
    Encoding {
        /// Description of the encoding failure.
        message: String,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// No route for the requested path and method.
    ///
    /// An unknown path and a method-filter mismatch are indistinguishable.
    #[error("Not found: {method} {path}")]
    NotFound {
        /// Requested path.
        path: String,
        /// Requested method.
        method: String,
    },

    /// An HTTP exchange has already been answered.
    ///
    /// Plain HTTP carries exactly one response per request.
    #[error("Request {request_id} already responded")]
    AlreadyResponded {
        /// Identifier of the request.
        request_id: RequestId,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Write attempted after shutdown was initiated.
    ///
    /// Surfaced immediately, never retried.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer sent a close frame.
    #[error("Connection closed by peer: code={code} reason={reason}")]
    ClosedByPeer {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },

    /// Read or write failure on the underlying socket.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// Call did not receive a reply in time.
    ///
    /// Local only: nothing is sent to the peer.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many calls awaiting replies.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Calls currently waiting.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl ToString) -> Self {
        Self::Decode {
            message: message.to_string(),
        }
    }

    /// Creates an encoding error.
    #[inline]
    pub fn encoding(message: impl ToString) -> Self {
        Self::Encoding {
            message: message.to_string(),
        }
    }

    /// Creates a not found error.
    #[inline]
    pub fn not_found(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self::NotFound {
            path: path.into(),
            method: method.into(),
        }
    }

    /// Creates an already responded error.
    #[inline]
    pub fn already_responded(request_id: RequestId) -> Self {
        Self::AlreadyResponded { request_id }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a closed-by-peer error.
    #[inline]
    pub fn closed_by_peer(code: u16, reason: impl Into<String>) -> Self {
        Self::ClosedByPeer {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl ToString) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a too many pending error.
    #[inline]
    pub fn too_many_pending(pending: usize, max: usize) -> Self {
        Self::TooManyPending { pending, max }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if the connection is gone.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::ClosedByPeer { .. })
    }

    /// Returns `true` for a peer close frame carrying the normal closure code.
    #[inline]
    #[must_use]
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, Self::ClosedByPeer { code, .. } if *code == CLOSE_NORMAL)
    }

    /// Returns `true` if this is a decode error.
    #[inline]
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns `true` if this is a not found error.
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this error is fatal to the connection it occurred on.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Connection { .. }
                | Self::ClosedByPeer { .. }
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
