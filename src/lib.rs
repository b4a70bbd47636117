//! Task Channel - Self-healing real-time channel to a task backend.
//!
//! This library keeps one persistent Socket.IO channel open to a backend
//! that runs long tasks and streams their output back as chunks.
//!
//! # Architecture
//!
//! The channel is a client-side state machine over a pluggable transport:
//!
//! - **Transport**: WebSocket plus Engine.IO/Socket.IO framing, never retries
//! - **Channel**: Owns status, keepalive, reconnect timer and active task
//! - **Application**: Receives only messages for the task it is following
//!
//! Key design principles:
//!
//! - The channel is the single reconnection authority
//! - Every failure leads to exactly one scheduled reconnect, forever
//! - Chunks and results for any task but the active one are dropped
//! - Sends while disconnected are dropped, never queued
//!
//! # Quick Start
//!
//! ```no_run
//! use task_channel::{InboundMessage, Result, TaskChannel, UserInfo};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let channel = TaskChannel::builder()
//!         .origin("http://localhost:8000")
//!         .user_info(UserInfo::new("u1"))
//!         .on_message(|message| match message {
//!             InboundMessage::Chunk(chunk) => print!("{}", chunk.content().unwrap_or_default()),
//!             InboundMessage::Result(_) => println!(),
//!             _ => {}
//!         })
//!         .build()?;
//!
//!     channel.connect();
//!
//!     let mut status = channel.subscribe_status();
//!     while !status.borrow_and_update().is_connected() {
//!         if status.changed().await.is_err() {
//!             return Ok(());
//!         }
//!     }
//!
//!     channel.create_task("Explain ownership", 1, true)?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | Channel manager: [`TaskChannel`], [`ChannelBuilder`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire framing and message types |
//! | [`transport`] | Transport contract and WebSocket implementation |

// ============================================================================
// Modules
// ============================================================================

/// Channel manager and configuration.
///
/// Use [`TaskChannel::builder()`] to create a configured channel.
pub mod channel;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Protocol message types.
///
/// Text framing, inbound decoding and outbound requests.
pub mod protocol;

/// Transport layer.
///
/// The [`transport::Connector`] seam plus the Socket.IO WebSocket client.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::{
    ChannelBuilder, ChannelOptions, ConnectionState, ReconnectPolicy, TaskChannel, UserInfo,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::TaskId;

// Protocol types
pub use protocol::{
    CancelTask, CreateTask, InboundMessage, OutboundMessage, StatusUpdate, TaskFrame, TaskStatus,
};
