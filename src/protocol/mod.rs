//! WebSocket protocol message types.
//!
//! This module defines the frames exchanged with the server.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `InboundFrame` | Server → Client | Handshake and application events |
//! | `OutboundFrame` | Client → Server | Sequenced application actions |
//!
//! # Naming
//!
//! Application names follow `custom_<plugin_id>_<name>`:
//!
//! - `custom_com.example.calls_join`
//! - `custom_com.example.calls_signal`
//! - `custom_com.example.calls_ping`
//!
//! The handshake event (`hello` by default) is not namespaced.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Inbound/outbound frames and encodings |
//! | `namespace` | Plugin-scoped name builder |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound and outbound frames.
pub mod frame;

/// Plugin-scoped names.
pub mod namespace;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Encoding, InboundFrame, OutboundFrame, Payload};
pub use namespace::{AppEvent, Namespace};
