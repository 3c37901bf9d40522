//! Connection multiplexer.
//!
//! [`RelayClient`] owns one transport, performs the handshake and turns
//! inbound frames into `open`/`join`/`error`/`message`/`close` notifications.
//!
//! # Inbound Handling
//!
//! 1. Empty payloads are ignored
//! 2. Non-JSON payloads are logged and dropped
//! 3. Frames without event name or payload are dropped
//! 4. The handshake frame stores the connection id and emits `open`
//! 5. Anything before the handshake is dropped
//! 6. Frames tagged with another connection id are dropped
//! 7. `<prefix>_join`, `<prefix>_error`, `<prefix>_signal` are emitted
//!
//! # Example
//!
//! ```no_run
//! use plugin_ws_relay::{ClientConfig, EventKind, Notification, RelayClient, WebSocketConnector};
//! use serde_json::json;
//!
//! # async fn example() -> plugin_ws_relay::Result<()> {
//! let config = ClientConfig::builder()
//!     .url("wss://chat.example.com/api/v4/websocket")
//!     .plugin_id("com.example.calls")
//!     .build()?;
//!
//! let client = RelayClient::connect(config, &WebSocketConnector::new());
//!
//! client.on(EventKind::Message, |n: &Notification| println!("{n:?}"));
//! client.send("join", Some(json!({"channelID": "town-square"})))?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{ErrorPayload, EventKind, Handler, Notification, Subscribers};
use crate::identifiers::{ConnectionId, SubscriptionId};
use crate::protocol::{AppEvent, Encoding, InboundFrame, Namespace, OutboundFrame};
use crate::session::Session;
use crate::transport::{Connector, EventStream, ReadyState, Transport, TransportEvent, event_channel};

// ============================================================================
// SendOutcome
// ============================================================================

/// Result of [`RelayClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame handed to an open transport.
    Sent {
        /// Sequence number the frame carried.
        seq: u64,
    },
    /// Transport missing or not open; the frame was dropped.
    NotSent {
        /// Sequence number the frame would have carried.
        seq: u64,
    },
}

impl SendOutcome {
    /// Returns `true` if the frame was transmitted.
    #[inline]
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Returns the sequence number consumed by the call.
    #[inline]
    #[must_use]
    pub const fn seq(&self) -> u64 {
        match self {
            Self::Sent { seq } | Self::NotSent { seq } => *seq,
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Stream of every notification, returned by [`RelayClient::notifications`].
///
/// Yields `None` once the client and all its clones are dropped.
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Notification>,
    ids: Vec<SubscriptionId>,
    client: Weak<ClientInner>,
}

impl Notifications {
    /// Waits for the next notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Returns a notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

impl fmt::Debug for Notifications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifications")
            .field("subscriptions", &self.ids)
            .field("queued", &self.rx.len())
            .finish()
    }
}

impl Drop for Notifications {
    fn drop(&mut self) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        for id in self.ids.drain(..) {
            client.subscribers.off(id);
        }
    }
}

// ============================================================================
// ClientInner
// ============================================================================

/// State shared between the handle and the dispatch task.
struct ClientInner {
    /// Namespace for actions and events.
    namespace: Namespace,
    /// Handshake event name.
    handshake_event: String,
    /// Connection id and sequence counter.
    session: Mutex<Session>,
    /// Live transport; `None` once closed.
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Notification handlers.
    subscribers: Subscribers,
}

// ============================================================================
// RelayClient
// ============================================================================

/// Multiplexes one WebSocket into plugin notifications.
///
/// Cloning is cheap; clones share the session.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("RelayClient")
            .field("namespace", &self.inner.namespace.prefix())
            .field("connection_id", session.connection_id())
            .field("sequence_number", &session.sequence_number())
            .field("subscribers", &self.inner.subscribers)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RelayClient - Construction
// ============================================================================

impl RelayClient {
    /// Opens a transport and starts dispatching its events.
    ///
    /// Returns immediately; `open` is emitted once the handshake arrives.
    /// Must be called from within a tokio runtime.
    pub fn connect(config: ClientConfig, connector: &dyn Connector) -> Self {
        let (events_tx, events_rx) = event_channel();

        debug!(url = %config.url, plugin_id = %config.plugin_id, "Connecting");
        let transport = connector.connect(&config.url, events_tx);

        let client = Self::with_transport(config, transport);
        tokio::spawn(run_dispatch(Arc::downgrade(&client.inner), events_rx));
        client
    }

    /// Wraps an existing transport.
    ///
    /// The caller feeds transport events through [`RelayClient::dispatch`].
    #[must_use]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = ClientInner {
            namespace: config.namespace(),
            handshake_event: config.handshake_event,
            session: Mutex::new(Session::new()),
            transport: Mutex::new(Some(transport)),
            subscribers: Subscribers::new(),
        };

        Self {
            inner: Arc::new(inner),
        }
    }
}

// ============================================================================
// RelayClient - Subscriptions
// ============================================================================

impl RelayClient {
    /// Registers a handler for one notification kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.subscribers.on(kind, Arc::new(handler))
    }

    /// Cancels a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.off(id)
    }

    /// Delivers a notification to the handlers of its kind.
    pub fn emit(&self, notification: &Notification) {
        self.inner.emit(notification);
    }

    /// Returns a receiver fed with every notification.
    ///
    /// Its handlers are removed when the receiver is dropped.
    #[must_use]
    pub fn notifications(&self) -> Notifications {
        let (tx, rx) = mpsc::unbounded_channel();

        let ids = EventKind::ALL
            .into_iter()
            .map(|kind| {
                let tx = tx.clone();
                let handler: Handler = Arc::new(move |n: &Notification| {
                    let _ = tx.send(n.clone());
                });
                self.inner.subscribers.on(kind, handler)
            })
            .collect();

        Notifications {
            rx,
            ids,
            client: Arc::downgrade(&self.inner),
        }
    }
}

// ============================================================================
// RelayClient - Operations
// ============================================================================

impl RelayClient {
    /// Sends an action as a JSON text frame.
    ///
    /// See [`RelayClient::send_with`].
    ///
    /// # Errors
    ///
    /// See [`RelayClient::send_with`].
    pub fn send(&self, action: &str, data: Option<Value>) -> Result<SendOutcome> {
        self.send_with(action, data, Encoding::Text)
    }

    /// Sends an action with the chosen encoding.
    ///
    /// The sequence number is consumed even when the transport is not open;
    /// in that case the frame is dropped and [`SendOutcome::NotSent`] is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] / [`Error::Encode`] if serialization fails
    /// - [`Error::ConnectionClosed`] if the open transport refused the frame
    pub fn send_with(
        &self,
        action: &str,
        data: Option<Value>,
        encoding: Encoding,
    ) -> Result<SendOutcome> {
        let seq = self.inner.session.lock().next_sequence();
        let frame = OutboundFrame::new(self.inner.namespace.action(action), seq, data);

        let transport = self.inner.transport.lock().clone();
        let Some(transport) = transport.filter(|t| t.ready_state() == ReadyState::Open) else {
            trace!(action = %frame.action, seq, "Transport not open, dropping frame");
            return Ok(SendOutcome::NotSent { seq });
        };

        let payload = frame.encode(encoding)?;
        transport.send(payload)?;

        trace!(action = %frame.action, seq, ?encoding, "Frame sent");
        Ok(SendOutcome::Sent { seq })
    }

    /// Closes the session.
    ///
    /// With a live transport this requests closure and `close` follows once
    /// the transport reports it. Without one, `close(code)` is emitted now.
    /// Either way the sequence number and connection id are reset.
    pub fn close(&self, code: Option<u16>) {
        self.inner.close(code);
    }

    /// Feeds one transport event into the multiplexer.
    ///
    /// [`RelayClient::connect`] does this from its dispatch task.
    pub fn dispatch(&self, event: TransportEvent) {
        self.inner.dispatch(event);
    }
}

// ============================================================================
// RelayClient - Accessors
// ============================================================================

impl RelayClient {
    /// Returns the connection id (empty before the handshake).
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.session.lock().connection_id().clone()
    }

    /// Returns the sequence number of the next frame.
    #[inline]
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.inner.session.lock().sequence_number()
    }

    /// Returns `true` if a transport exists and is open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .transport
            .lock()
            .as_ref()
            .is_some_and(|t| t.ready_state() == ReadyState::Open)
    }

    /// Returns the action/event namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }
}

// ============================================================================
// ClientInner - Event Handling
// ============================================================================

impl ClientInner {
    fn emit(&self, notification: &Notification) {
        self.subscribers.emit(notification);
    }

    fn close(&self, code: Option<u16>) {
        let transport = self.transport.lock().take();

        match transport {
            Some(transport) => {
                debug!("Closing transport");
                transport.close();
            }
            None => self.emit(&Notification::Close(code)),
        }

        self.session.lock().reset();
    }

    fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => trace!("Transport open, waiting for handshake"),
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Error(err) => self.handle_error(err),
            TransportEvent::Close(code) => self.handle_close(code),
        }
    }

    /// Transport failure: `error`, then `close(None)`.
    fn handle_error(&self, err: Error) {
        warn!(error = %err, "Transport error");
        self.emit(&Notification::Error(ErrorPayload::Transport(Arc::new(err))));
        self.transport.lock().take();
        self.close(None);
    }

    /// Transport closed: `close(code)`.
    fn handle_close(&self, code: Option<u16>) {
        debug!(?code, "Transport closed");
        self.transport.lock().take();
        self.close(code);
    }

    fn handle_message(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        let frame = match InboundFrame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("Dropping frame without event or data");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse incoming message");
                return;
            }
        };

        if frame.event == self.handshake_event {
            let id = ConnectionId::new(frame.handshake_id().unwrap_or_default());
            debug!(connection_id = %id, "Handshake received");
            self.session.lock().establish(id);
            self.emit(&Notification::Open);
            return;
        }

        {
            let session = self.session.lock();

            if !session.is_established() {
                debug!(event = %frame.event, "Message received while waiting for handshake");
                return;
            }

            if !session.accepts(frame.conn_id()) {
                trace!(
                    event = %frame.event,
                    conn_id = ?frame.conn_id(),
                    "Dropping frame for other connection"
                );
                return;
            }
        }

        for event in self.namespace.classify(&frame.event) {
            match event {
                AppEvent::Join => self.emit(&Notification::Join),
                AppEvent::Error => {
                    self.emit(&Notification::Error(ErrorPayload::Remote(frame.data.clone())));
                }
                AppEvent::Signal => self.emit(&Notification::Message(frame.data.clone())),
            }
        }
    }
}

// ============================================================================
// Dispatch Task
// ============================================================================

/// Drains transport events until the channel or the client goes away.
async fn run_dispatch(inner: Weak<ClientInner>, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(client) = inner.upgrade() else {
            break;
        };
        client.dispatch(event);
    }

    debug!("Dispatch loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
