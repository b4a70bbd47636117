//! Protocol message types.
//!
//! This module defines the wire framing and the message format exchanged
//! with the backend task service.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Packet` | Both | Text frame of the streaming transport |
//! | `InboundMessage` | Backend → Client | Chunk, result, status, pong, lifecycle |
//! | `OutboundMessage` | Client → Backend | `{type, ...fields}` on the `message` event |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `packet` | Engine.IO / Socket.IO text framing |
//! | `inbound` | Inbound message decoding and envelope handling |
//! | `outbound` | Outbound message and task request types |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound message types.
pub mod inbound;

/// Outbound message types.
pub mod outbound;

/// Text frame codec.
pub mod packet;

// ============================================================================
// Re-exports
// ============================================================================

pub use inbound::{InboundMessage, StatusUpdate, TaskFrame, TaskStatus, unwrap_envelope};
pub use outbound::{CancelTask, CreateTask, OutboundMessage};
pub use packet::{Handshake, Packet};
