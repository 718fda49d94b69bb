//! Socket and HTTP transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐        HTTP request          ┌─────────────────┐
//! │                 │─────────────────────────────►│  Server         │
//! │  HTTP client    │◄─────────────────────────────│   rest_handler  │──┐
//! └─────────────────┘        status + payload      │                 │  │  Router
//! ┌─────────────────┐                              │                 │  ├─► Handler(Conn, Envelope)
//! │  Client         │         WebSocket            │   upgrade       │  │
//! │   call / read   │◄────────────────────────────►│   read pump     │──┘
//! │   loop          │      Envelope frames         │   write pump    │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Server::bind` binds the listener
//! 2. An upgrade creates a socket [`Conn`] and starts its pumps
//! 3. The read pump exits on error, deadline or close frame and fires the stop signal
//! 4. The write pump sees the stop signal and closes the socket
//! 5. `Conn::close` runs the close hooks
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | Correlating WebSocket client |
//! | `conn` | Connection shared by both transports |
//! | `options` | Connection, client and server options |
//! | `pump` | Read and write pumps of a socket connection |
//! | `server` | Listener serving both transports |

// ============================================================================
// Submodules
// ============================================================================

/// Correlating WebSocket client.
pub mod client;

/// Connection shared by both transports.
pub mod conn;

/// Connection, client and server options.
pub mod options;

mod pump;

/// Listener serving both transports.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{Client, ClientBuilder, MessageHandler, ServerCloseHandler};
pub use conn::{CloseHook, Conn};
pub use options::{ClientOptions, ConnOptions, ServerOptions};
pub use server::{BoundServer, ConnectHook, Server};
