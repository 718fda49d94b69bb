//! Payload marshaling.
//!
//! Handlers and clients hand arbitrary `Serialize` values to the crate;
//! a [`Marshaler`] decides how those values become payload bytes.
//! The envelope frame itself is always JSON, only the payload format is
//! pluggable.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Marshaler
// ============================================================================

/// Encodes structured values into payload bytes.
///
/// Implementations receive the value already lowered to a
/// [`serde_json::Value`], so they stay object safe and can be shared as
/// `Arc<dyn Marshaler>` between connections.
pub trait Marshaler: Send + Sync + fmt::Debug {
    /// Encodes a value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value cannot be represented.
    fn marshal(&self, value: &Value) -> Result<Vec<u8>>;

    /// Media type advertised on plain HTTP responses.
    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Compact JSON, the default payload encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl Marshaler for JsonMarshaler {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(Error::encoding)
    }
}

/// Lowers any serializable value to a JSON value tree.
///
/// # Errors
///
/// Returns [`Error::Encoding`] for values JSON cannot express
/// (e.g. maps with non-string keys).
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(Error::encoding)
}

// ============================================================================
// Tests
// ============================================================================
