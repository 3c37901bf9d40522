//! Plugin WebSocket relay - event multiplexer for host plugin systems.
//!
//! This library wraps a single WebSocket connection and turns it into a
//! handful of named plugin notifications, keyed by the connection id the
//! server issues during the handshake.
//!
//! # Architecture
//!
//! - **Transport**: an injected [`Connector`] opens a [`Transport`] and
//!   reports socket activity as [`TransportEvent`]s
//! - **Multiplexer**: [`RelayClient`] filters frames by connection id and
//!   emits [`Notification`]s to subscribers
//!
//! Key design principles:
//!
//! - Nothing is accepted before the handshake
//! - Frames tagged with a foreign connection id are dropped
//! - Actions and events are namespaced `custom_<plugin_id>_<name>`
//! - No retries: an error or close ends the session
//!
//! # Quick Start
//!
//! ```no_run
//! use plugin_ws_relay::{ClientConfig, EventKind, Notification, RelayClient, Result, WebSocketConnector};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::builder()
//!         .site_url(&Url::parse("https://chat.example.com")?)
//!         .plugin_id("com.example.calls")
//!         .build()?;
//!
//!     let client = RelayClient::connect(config, &WebSocketConnector::new());
//!
//!     let sender = client.clone();
//!     client.on(EventKind::Open, move |_: &Notification| {
//!         let _ = sender.send("join", None);
//!     });
//!
//!     let mut notifications = client.notifications();
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{notification:?}");
//!         if let Notification::Close(_) = notification {
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Connection multiplexer |
//! | [`config`] | Configuration and address resolution |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Notifications and subscription lists |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frames and namespacing |
//! | [`session`] | Connection id and sequence counter |
//! | [`telemetry`] | Batched usage telemetry |
//! | [`transport`] | Transport traits and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Connection multiplexer.
pub mod client;

/// Client configuration and address resolution.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Notifications and subscription lists.
pub mod events;

/// Type-safe identifiers.
pub mod identifiers;

/// WebSocket protocol frames.
pub mod protocol;

/// Per-connection session state.
pub mod session;

/// Batched usage telemetry.
pub mod telemetry;

/// Transport layer.
///
/// Traits for injected transports plus the tokio-tungstenite client.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Notifications, RelayClient, SendOutcome};

// Configuration
pub use config::{ClientConfig, ClientConfigBuilder, resolve_ws_url};

// Error types
pub use error::{Error, Result};

// Notification types
pub use events::{ErrorPayload, EventKind, Notification};

// Identifier types
pub use identifiers::{ConnectionId, SubscriptionId};

// Protocol types
pub use protocol::{Encoding, Namespace};

// Transport types
pub use transport::{
    Connector, ReadyState, Transport, TransportEvent, WebSocketConnector, WebSocketTransport,
};
