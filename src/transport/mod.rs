//! Transport layer.
//!
//! The multiplexer never touches sockets directly. A [`Connector`] opens a
//! [`Transport`] and reports everything the socket does as
//! [`TransportEvent`]s on an [`EventSink`]. Tests substitute their own
//! transport; production code uses [`WebSocketConnector`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   send / close    ┌──────────────────┐
//! │   RelayClient    │──────────────────►│    Transport     │
//! │                  │                   │  (event loop)    │◄──► server
//! │  dispatch task   │◄──────────────────│                  │
//! └──────────────────┘  TransportEvent   └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | tokio-tungstenite client transport |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Payload;

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use websocket::{WebSocketConnector, WebSocketTransport};

// ============================================================================
// Constants
// ============================================================================

/// Close code reported when the peer closed without a status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// Types
// ============================================================================

/// Sending half of a transport's event channel.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport's event channel.
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates a transport event channel.
#[inline]
#[must_use]
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Something the transport observed.
#[derive(Debug)]
pub enum TransportEvent {
    /// Socket is open.
    Open,
    /// Text frame received.
    Message(String),
    /// Socket failed.
    Error(Error),
    /// Socket closed, with the reported close code.
    Close(Option<u16>),
}

// ============================================================================
// ReadyState
// ============================================================================

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Connection is being established.
    Connecting = 0,
    /// Frames can be sent.
    Open = 1,
    /// Close requested, waiting for the peer.
    Closing = 2,
    /// Closed or never opened.
    Closed = 3,
}

impl ReadyState {
    /// Converts the raw representation back into a state.
    ///
    /// Unknown values map to [`ReadyState::Closed`].
    #[inline]
    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// A duplex text/binary socket.
pub trait Transport: Send + Sync {
    /// Returns the current lifecycle state.
    fn ready_state(&self) -> ReadyState;

    /// Queues a frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket is gone.
    fn send(&self, payload: Payload) -> Result<()>;

    /// Requests closure. Completion is reported as [`TransportEvent::Close`].
    fn close(&self);
}

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Starts connecting to `url`; progress is reported on `events`.
    ///
    /// Must return without waiting for the connection to open.
    fn connect(&self, url: &Url, events: EventSink) -> Arc<dyn Transport>;
}

// ============================================================================
// Tests
// ============================================================================
