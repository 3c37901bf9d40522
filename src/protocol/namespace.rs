//! Plugin-scoped action and event names.
//!
//! Every application action and event is prefixed with `custom_<plugin_id>`
//! so plugin traffic never collides with other traffic on the same socket.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Prefix the server puts in front of every plugin event.
const CUSTOM_PREFIX: &str = "custom_";

// ============================================================================
// AppEvent
// ============================================================================

/// Application events recognized after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppEvent {
    /// A peer joined.
    Join,
    /// The server reported an application error.
    Error,
    /// A signalling message.
    Signal,
}

impl AppEvent {
    /// All application events, in dispatch order.
    pub const ALL: [Self; 3] = [Self::Join, Self::Error, Self::Signal];

    /// Returns the event-name suffix.
    #[inline]
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Error => "error",
            Self::Signal => "signal",
        }
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// Name builder for one plugin installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Creates the namespace for a plugin id.
    #[inline]
    #[must_use]
    pub fn new(plugin_id: &str) -> Self {
        Self {
            prefix: format!("{CUSTOM_PREFIX}{plugin_id}"),
        }
    }

    /// Returns the `custom_<plugin_id>` prefix.
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the wire name of an outbound action.
    #[inline]
    #[must_use]
    pub fn action(&self, action: &str) -> String {
        format!("{}_{action}", self.prefix)
    }

    /// Returns the wire name of an application event.
    #[inline]
    #[must_use]
    pub fn event(&self, event: AppEvent) -> String {
        format!("{}_{}", self.prefix, event.suffix())
    }

    /// Returns every application event `name` stands for.
    ///
    /// Each event is checked on its own, so overlapping names would all
    /// match.
    #[must_use]
    pub fn classify(&self, name: &str) -> Vec<AppEvent> {
        if !name.starts_with(self.prefix.as_str()) {
            return Vec::new();
        }

        AppEvent::ALL
            .into_iter()
            .filter(|event| name == self.event(*event))
            .collect()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

// ============================================================================
// Tests
// ============================================================================
