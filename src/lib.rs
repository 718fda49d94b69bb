//! wsrest - one router for plain HTTP and framed WebSocket requests.
//!
//! Handlers are written once and served over both transports: a request
//! arriving as HTTP and a request arriving as a WebSocket frame reach the
//! same handler with the same [`Envelope`], and the handler answers through
//! the same [`Conn::respond`]. A correlating [`Client`] turns the socket
//! into request/response calls.
//!
//! # Architecture
//!
//! - **Envelope**: identifier, method, resource, status code, payload
//! - **Router**: exact path plus optional method filter to a handler
//! - **Conn**: per-client context backed by either one HTTP exchange or a
//!   socket with a read pump and a write pump
//! - **Client**: dials the socket, correlates replies by identifier
//!
//! # Quick Start
//!
//! ```no_run
//! use axum::http::StatusCode;
//! use wsrest::{Client, Conn, Envelope, Result, Router, Server, simple_msg};
//!
//! async fn go(conn: Conn, request: Envelope) {
//!     let _ = conn.respond(request, &simple_msg("Hello"), StatusCode::OK).await;
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut router = Router::new();
//!     router.handle("/go", go);
//!
//!     let bound = Server::new(router).bind("127.0.0.1:0".parse().unwrap()).await?;
//!     let url = bound.ws_url();
//!     tokio::spawn(bound.serve());
//!
//!     let client = Client::dial(url).await?;
//!     let reply = client.get("/go", &()).await?;
//!     assert_eq!(reply.payload(), br#"{"message":"Hello"}"#);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`helpers`] | Resource-building helpers |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelope and payload marshaling |
//! | [`router`] | Exact-path routing table |
//! | [`transport`] | Server, connection, pumps and client |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result alias.
pub mod error;

/// Resource-building helpers.
pub mod helpers;

/// Type-safe identifier wrappers.
pub mod identifiers;

/// Envelope and payload marshaling.
pub mod protocol;

/// Exact-path routing table.
pub mod router;

/// Server, connection, pumps and client.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{CLOSE_NORMAL, Error, Result};
pub use helpers::url_component_encode;
pub use identifiers::{ConnectionId, RequestId};
pub use protocol::{Envelope, JsonMarshaler, Marshaler, Payload, SimpleMessage, simple_msg};
pub use router::{Handler, HandlerFuture, Route, Router};
pub use transport::{
    BoundServer, Client, ClientBuilder, ClientOptions, CloseHook, Conn, ConnOptions,
    ConnectHook, MessageHandler, ServerCloseHandler, ServerOptions, Server,
};
