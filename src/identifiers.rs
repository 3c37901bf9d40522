//! Type-safe identifiers.
//!
//! Newtype wrappers keep the server-issued connection identifier and the
//! local subscription handles from being mixed with plain strings and ints.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionId
// ============================================================================

/// Connection identifier issued by the server in the handshake.
///
/// Empty until the handshake completes and again after close.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a connection identifier.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the empty identifier.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// Returns `true` if no identifier has been issued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ConnectionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ConnectionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned when registering a notification handler.
///
/// Pass it back to [`RelayClient::off`](crate::RelayClient::off) to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generates a new process-unique subscription handle.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_empty() {
        let id = ConnectionId::empty();
        assert!(id.is_empty());
        assert_eq!(id, ConnectionId::default());
    }

    #[test]
    fn test_connection_id_compare_str() {
        let id = ConnectionId::new("abc");
        assert!(!id.is_empty());
        assert_eq!(id, "abc");
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn test_connection_id_serde_transparent() {
        let id = ConnectionId::new("abc");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_subscription_ids_unique() {
        let a = SubscriptionId::generate();
        let b = SubscriptionId::generate();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(a.to_string().starts_with("sub-"));
    }
}
