//! Per-connection session state.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::ConnectionId;

// ============================================================================
// Session
// ============================================================================

/// Connection identifier and outbound sequence counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    connection_id: ConnectionId,
    sequence: u64,
}

impl Session {
    /// Creates a fresh session.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connection identifier (empty before the handshake).
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Returns the sequence number the next frame will carry.
    #[inline]
    #[must_use]
    pub const fn sequence_number(&self) -> u64 {
        self.sequence
    }

    /// Returns `true` once the handshake stored an identifier.
    #[inline]
    #[must_use]
    pub fn is_established(&self) -> bool {
        !self.connection_id.is_empty()
    }

    /// Stores the identifier from the handshake.
    #[inline]
    pub fn establish(&mut self, connection_id: ConnectionId) {
        self.connection_id = connection_id;
    }

    /// Returns the current sequence number and advances it.
    #[inline]
    pub fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    /// Returns `true` if a frame tagged `conn_id` belongs to this session.
    #[inline]
    #[must_use]
    pub fn accepts(&self, conn_id: Option<&str>) -> bool {
        conn_id.is_some_and(|id| self.connection_id == id)
    }

    /// Clears the identifier and rewinds the sequence to 0.
    #[inline]
    pub fn reset(&mut self) {
        self.connection_id = ConnectionId::empty();
        self.sequence = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
