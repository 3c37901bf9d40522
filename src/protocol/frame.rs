//! Inbound and outbound frame types.
//!
//! # Inbound (text only)
//!
//! ```json
//! { "event": "custom_com.example.calls_signal", "data": { "connID": "abc", ... } }
//! ```
//!
//! # Outbound
//!
//! ```json
//! { "action": "custom_com.example.calls_ping", "seq": 0, "data": { "n": 1 } }
//! ```
//!
//! Outbound frames go out as JSON text or as MessagePack with named fields.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Handshake payload key holding the issued connection identifier.
const HANDSHAKE_ID_KEY: &str = "connection_id";

/// Application payload key echoing the connection identifier.
const FRAME_ID_KEY: &str = "connID";

// ============================================================================
// Encoding
// ============================================================================

/// Serialization used for an outbound frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// JSON text frame.
    #[default]
    Text,
    /// MessagePack binary frame.
    Binary,
}

// ============================================================================
// Payload
// ============================================================================

/// A serialized frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the text content, if this is a text frame.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the payload carries no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// OutboundFrame
// ============================================================================

/// An application action sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundFrame {
    /// Namespaced action name.
    pub action: String,

    /// Per-session sequence number.
    pub seq: u64,

    /// Action payload. JSON omits it when absent, MessagePack writes nil.
    pub data: Option<Value>,
}

/// JSON view of an [`OutboundFrame`] that leaves out a missing payload.
#[derive(Serialize)]
struct TextFrame<'a> {
    action: &'a str,
    seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

impl OutboundFrame {
    /// Creates an outbound frame.
    #[inline]
    #[must_use]
    pub fn new(action: impl Into<String>, seq: u64, data: Option<Value>) -> Self {
        Self {
            action: action.into(),
            seq,
            data,
        }
    }

    /// Serializes the frame with the requested encoding.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`](crate::Error::Json) if text encoding fails
    /// - [`Error::Encode`](crate::Error::Encode) if MessagePack encoding fails
    pub fn encode(&self, encoding: Encoding) -> Result<Payload> {
        match encoding {
            Encoding::Text => {
                let frame = TextFrame {
                    action: &self.action,
                    seq: self.seq,
                    data: self.data.as_ref(),
                };
                Ok(Payload::Text(serde_json::to_string(&frame)?))
            }
            Encoding::Binary => Ok(Payload::Binary(rmp_serde::to_vec_named(self)?)),
        }
    }
}

// ============================================================================
// InboundFrame
// ============================================================================

/// An event frame received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Event name (never empty).
    pub event: String,

    /// Event payload (never null, `false`, `0` or `""`).
    pub data: Value,
}

impl InboundFrame {
    /// Parses a text payload.
    ///
    /// Returns `Ok(None)` for well-formed JSON that lacks an event name or a
    /// usable payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the text is not JSON.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let mut value: Value = serde_json::from_str(text)?;

        let Some(event) = value
            .get("event")
            .and_then(Value::as_str)
            .filter(|event| !event.is_empty())
            .map(str::to_owned)
        else {
            return Ok(None);
        };

        let data = match value.get_mut("data").map(Value::take) {
            Some(data) if is_truthy(&data) => data,
            _ => return Ok(None),
        };

        Ok(Some(Self { event, data }))
    }

    /// Connection identifier carried by a handshake payload.
    ///
    /// Only string ids count. A handshake whose `connection_id` is a number
    /// or any other non-string value yields `None`, so the session keeps an
    /// empty id and drops every later frame until the next handshake.
    #[inline]
    #[must_use]
    pub fn handshake_id(&self) -> Option<&str> {
        self.data.get(HANDSHAKE_ID_KEY).and_then(Value::as_str)
    }

    /// Connection identifier echoed by an application payload.
    #[inline]
    #[must_use]
    pub fn conn_id(&self) -> Option<&str> {
        self.data.get(FRAME_ID_KEY).and_then(Value::as_str)
    }
}

/// Truthiness as the peer's JSON producers treat it.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Tests
// ============================================================================
