//! Notifications and subscription lists.
//!
//! The multiplexer exposes five notifications to the host:
//!
//! | Kind | Payload | Raised by |
//! |------|---------|-----------|
//! | `open` | none | handshake frame |
//! | `join` | none | `<prefix>_join` |
//! | `error` | [`ErrorPayload`] | `<prefix>_error`, transport failure |
//! | `message` | JSON payload | `<prefix>_signal` |
//! | `close` | close code | transport close, [`RelayClient::close`](crate::RelayClient::close) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::error::Error;
use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Notification handler callback type.
///
/// Handlers run on whichever task dispatches the notification and must not
/// block.
pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

// ============================================================================
// EventKind
// ============================================================================

/// Notification name used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Handshake completed.
    Open,
    /// Peer joined.
    Join,
    /// Application or transport error.
    Error,
    /// Signalling message.
    Message,
    /// Session closed.
    Close,
}

impl EventKind {
    /// All notification kinds.
    pub const ALL: [Self; 5] = [
        Self::Open,
        Self::Join,
        Self::Error,
        Self::Message,
        Self::Close,
    ];

    /// Returns the notification name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Join => "join",
            Self::Error => "error",
            Self::Message => "message",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Payload of an `error` notification.
#[derive(Debug, Clone)]
pub enum ErrorPayload {
    /// The transport failed; the session is over.
    Transport(Arc<Error>),
    /// The server sent `<prefix>_error` with this payload.
    Remote(Value),
}

impl ErrorPayload {
    /// Returns `true` for transport failures.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A notification delivered to subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Handshake completed.
    Open,
    /// Peer joined.
    Join,
    /// Application or transport error.
    Error(ErrorPayload),
    /// Signalling message payload.
    Message(Value),
    /// Session closed, with the transport close code when one was reported.
    Close(Option<u16>),
}

impl Notification {
    /// Returns the subscription key of this notification.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Join => EventKind::Join,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
            Self::Close(_) => EventKind::Close,
        }
    }
}

// ============================================================================
// Subscribers
// ============================================================================

/// Ordered handler lists keyed by notification kind.
#[derive(Default)]
pub struct Subscribers {
    handlers: Mutex<FxHashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
}

impl Subscribers {
    /// Creates empty subscription lists.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `kind`.
    pub fn on(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId::generate();
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, handler));

        trace!(%kind, %id, "Handler registered");
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();

        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                trace!(%id, "Handler removed");
                return true;
            }
        }

        false
    }

    /// Calls every handler registered for the notification's kind.
    ///
    /// Handlers are snapshotted first, so they may subscribe or unsubscribe
    /// while running.
    pub fn emit(&self, notification: &Notification) {
        let snapshot: Vec<Handler> = self
            .handlers
            .lock()
            .get(&notification.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        trace!(kind = %notification.kind(), handlers = snapshot.len(), "Emitting");

        for handler in snapshot {
            handler(notification);
        }
    }

    /// Returns the number of handlers registered for `kind`.
    #[inline]
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind, &self.count(kind));
        }
        map.finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
