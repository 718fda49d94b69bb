//! Envelope: the request/response record shared by both transports.
//!
//! The same [`Envelope`] is produced from an inbound HTTP request or an
//! inbound WebSocket frame, is handed to the route handler, and is sent
//! back (with status and payload filled in) as the response.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::de::{DeserializeOwned, Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::marshal::{self, JsonMarshaler, Marshaler};

// ============================================================================
// Constants
// ============================================================================

/// `encoding` marker of a frame whose `data` is base64 text.
const ENCODING_BASE64: &str = "base64";

// ============================================================================
// Payload
// ============================================================================

/// Opaque payload bytes.
///
/// On the wire the payload is embedded verbatim when it is exactly one JSON
/// value. Any other bytes travel as a base64 string flagged by
/// `"encoding":"base64"`, so every payload decodes to the bytes that were
/// sent. An empty payload is omitted from the frame, and a `null` payload
/// decodes as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Returns `true` if there is no payload.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Borrows the payload as JSON if the bytes are one value and nothing else.
    fn as_json(&self) -> Option<&RawValue> {
        let text = std::str::from_utf8(&self.0).ok()?;
        let raw = serde_json::from_str::<&RawValue>(text).ok()?;
        // Surrounding whitespace would be lost by embedding.
        (raw.get().len() == text.len()).then_some(raw)
    }

    fn to_wire(&self) -> (Option<WireData<'_>>, Option<&'static str>) {
        if self.is_empty() {
            return (None, None);
        }
        match self.as_json() {
            Some(raw) => (Some(WireData::Json(raw)), None),
            None => (
                Some(WireData::Base64(Base64Standard.encode(&self.0))),
                Some(ENCODING_BASE64),
            ),
        }
    }

    fn from_wire<E: DeError>(
        data: Option<Box<RawValue>>,
        encoding: Option<&str>,
    ) -> std::result::Result<Self, E> {
        let Some(raw) = data else {
            return Ok(Self::default());
        };

        match encoding {
            None => Ok(Self(raw.get().as_bytes().to_vec())),
            Some(ENCODING_BASE64) => {
                let text: String = serde_json::from_str(raw.get()).map_err(E::custom)?;
                let bytes = Base64Standard.decode(text).map_err(E::custom)?;
                Ok(Self(bytes))
            }
            Some(other) => Err(E::custom(format!("unsupported payload encoding '{other}'"))),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// ============================================================================
// Wire Frame
// ============================================================================

#[derive(Serialize)]
#[serde(untagged)]
enum WireData<'a> {
    Json(&'a RawValue),
    Base64(String),
}

/// Outbound frame borrowing from an [`Envelope`].
#[derive(Serialize)]
struct WireFrameRef<'a> {
    requestid: &'a RequestId,
    method: &'a str,
    resource: &'a str,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<WireData<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
}

/// Inbound frame; every field is optional.
#[derive(Deserialize)]
struct WireFrame {
    #[serde(default)]
    requestid: RequestId,
    #[serde(default)]
    method: String,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    code: u16,
    #[serde(default)]
    data: Option<Box<RawValue>>,
    #[serde(default)]
    encoding: Option<String>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let (data, encoding) = self.data.to_wire();
        WireFrameRef {
            requestid: &self.id,
            method: &self.method,
            resource: &self.resource,
            code: self.code,
            data,
            encoding,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let frame = WireFrame::deserialize(deserializer)?;
        let data = Payload::from_wire(frame.data, frame.encoding.as_deref())?;

        Ok(Self {
            id: frame.requestid,
            method: frame.method,
            resource: frame.resource,
            code: frame.code,
            data,
        })
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A request or response travelling over either transport.
///
/// # Format
///
/// ```json
/// {
///   "requestid": "uuid",
///   "method": "GET",
///   "resource": "/object?id=1",
///   "code": 200,
///   "data": { ... }
/// }
/// ```
///
/// A payload that is not JSON is sent as `"data": "<base64>"` together with
/// `"encoding": "base64"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// Correlation identifier, set once at creation.
    id: RequestId,

    /// Request method (e.g. `GET`).
    method: String,

    /// Path plus optional query.
    resource: String,

    /// Status code, filled in by the responder.
    code: u16,

    /// Encoded payload.
    data: Payload,
}

// ============================================================================
// Envelope - Constructors
// ============================================================================

impl Envelope {
    /// Creates an envelope with a fresh identifier and no payload.
    #[must_use]
    pub fn new(method: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            id: RequestId::generate(),
            method: method.into(),
            resource: resource.into(),
            code: 0,
            data: Payload::default(),
        }
    }

    /// Creates an envelope with a fresh identifier and a JSON payload.
    ///
    /// See [`Envelope::create_with`] for how the payload is interpreted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the payload cannot be encoded.
    pub fn create<T: Serialize + ?Sized>(
        method: impl Into<String>,
        resource: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Self::create_with(&JsonMarshaler, method, resource, payload)
    }

    /// Creates an envelope with a fresh identifier, encoding the payload
    /// with `marshaler`.
    ///
    /// - `()` / `None` leave the payload empty.
    /// - A string is pre-encoded text and passes through untouched;
    ///   an empty string becomes `{}`.
    /// - Anything else is marshaled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the payload cannot be encoded.
    pub fn create_with<T: Serialize + ?Sized>(
        marshaler: &dyn Marshaler,
        method: impl Into<String>,
        resource: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        let data = match marshal::to_value(payload)? {
            Value::Null => Vec::new(),
            Value::String(text) if text.is_empty() => b"{}".to_vec(),
            Value::String(text) => text.into_bytes(),
            value => marshaler.marshal(&value)?,
        };

        let mut envelope = Self::new(method, resource);
        envelope.data = Payload(data);
        Ok(envelope)
    }

    /// Builds an envelope from a plain HTTP request.
    ///
    /// `target` is the raw request target (path plus query). The body is
    /// decoded leniently: an empty body yields an empty payload, otherwise
    /// the first JSON value of the body becomes the payload verbatim.
    /// The identifier stays empty, HTTP has no correlation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the body is not JSON.
    pub fn from_http(method: &str, target: &str, body: &[u8]) -> Result<Self> {
        let data = if body.iter().all(u8::is_ascii_whitespace) {
            Vec::new()
        } else {
            let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Box<RawValue>>();
            match values.next() {
                Some(Ok(raw)) => raw.get().as_bytes().to_vec(),
                Some(Err(e)) => return Err(Error::decode(e)),
                None => Vec::new(),
            }
        };

        Ok(Self {
            id: RequestId::default(),
            method: method.to_string(),
            resource: target.to_string(),
            code: 0,
            data: Payload(data),
        })
    }

    /// Decodes an envelope from a WebSocket frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the frame is not an envelope.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        serde_json::from_slice(frame).map_err(Error::decode)
    }

    /// Encodes the envelope as a WebSocket frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the envelope cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::encoding)
    }
}

// ============================================================================
// Envelope - Accessors
// ============================================================================

impl Envelope {
    /// Returns the correlation identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Returns the method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the raw resource (path plus query).
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the status code (0 until responded).
    #[inline]
    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Returns the status code as an HTTP status, if valid.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.code).ok()
    }

    /// Sets the status code.
    #[inline]
    pub fn set_code(&mut self, code: u16) {
        self.code = code;
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Returns `true` if a payload is present.
    #[inline]
    #[must_use]
    pub fn has_payload(&self) -> bool {
        !self.data.is_empty()
    }

    /// Path component of the resource, used for routing.
    ///
    /// The query and fragment are dropped and percent-escapes decoded,
    /// except when the path contains an escaped `/`, which is returned raw.
    /// Absolute URLs contribute their path only.
    #[must_use]
    pub fn path(&self) -> String {
        if self.resource.contains("://")
            && let Ok(url) = Url::parse(&self.resource)
        {
            return decode_path(url.path()).into_owned();
        }

        let raw = self
            .resource
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        decode_path(raw).into_owned()
    }
}

fn decode_path(raw: &str) -> Cow<'_, str> {
    if raw.contains("%2F") || raw.contains("%2f") {
        return Cow::Borrowed(raw);
    }
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

// ============================================================================
// Envelope - Payload Helpers
// ============================================================================

impl Envelope {
    /// Replaces the payload with pre-encoded bytes.
    #[inline]
    pub fn set_payload_raw(&mut self, bytes: impl Into<Vec<u8>>) {
        self.data = Payload(bytes.into());
    }

    /// Replaces the payload with `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value cannot be represented; the
    /// previous payload is kept.
    pub fn marshal_payload<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.marshal_payload_with(&JsonMarshaler, value)
    }

    /// Replaces the payload with `value` encoded by `marshaler`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the value cannot be represented; the
    /// previous payload is kept.
    pub fn marshal_payload_with<T: Serialize + ?Sized>(
        &mut self,
        marshaler: &dyn Marshaler,
        value: &T,
    ) -> Result<()> {
        let bytes = marshaler.marshal(&marshal::to_value(value)?)?;
        self.data = Payload(bytes);
        Ok(())
    }

    /// Decodes the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is empty or does not match `T`.
    pub fn unmarshal_payload<T: DeserializeOwned>(&self) -> Result<T> {
        if self.data.is_empty() {
            return Err(Error::decode("trying to unmarshal empty payload"));
        }
        serde_json::from_slice(self.data.as_bytes()).map_err(Error::decode)
    }

    /// Returns the payload as text.
    ///
    /// A JSON string payload is unquoted; anything else is returned as-is.
    #[must_use]
    pub fn payload_to_string(&self) -> String {
        match serde_json::from_slice::<String>(self.data.as_bytes()) {
            Ok(text) => text,
            Err(_) => String::from_utf8_lossy(self.data.as_bytes()).into_owned(),
        }
    }
}

// ============================================================================
// SimpleMessage
// ============================================================================

/// `{"message": "..."}` body used for not-found and error replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleMessage {
    /// Human-readable message.
    pub message: String,
}

/// Builds a [`SimpleMessage`]; use `format!` for interpolation.
#[inline]
#[must_use]
pub fn simple_msg(message: impl Into<String>) -> SimpleMessage {
    SimpleMessage {
        message: message.into(),
    }
}

// ============================================================================
// Tests
// ============================================================================
