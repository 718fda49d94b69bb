//! Wire protocol types.
//!
//! Both transports carry the same record:
//!
//! | Transport | Inbound | Outbound |
//! |-----------|---------|----------|
//! | HTTP | method + target + body → [`Envelope`] | status + payload bytes |
//! | WebSocket | text frame → [`Envelope`] | [`Envelope`] → text frame |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope, payload, `{"message": ...}` bodies |
//! | `marshal` | Pluggable payload encoding |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope and payload types.
pub mod envelope;

/// Payload marshaling.
pub mod marshal;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, Payload, SimpleMessage, simple_msg};
pub use marshal::{JsonMarshaler, Marshaler};
