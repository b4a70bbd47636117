//! Channel manager and its building blocks.
//!
//! [`TaskChannel`] keeps one self-healing channel to the task backend. It
//! owns the connection state machine, the keepalive timer, the reconnect
//! timer and the active task; everything else is delegated.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent configuration and validation |
//! | `core` | State machine, lifecycle and outbound send |
//! | `correlator` | Active task tracking |
//! | `heartbeat` | Keepalive timer |
//! | `options` | Defaults, reconnect policy, user identity |
//! | `router` | Inbound routing decisions |

// ============================================================================
// Submodules
// ============================================================================

/// Channel builder.
pub mod builder;

/// Channel manager.
pub mod core;

/// Active task tracking.
pub mod correlator;

mod heartbeat;

/// Channel configuration.
pub mod options;

/// Inbound routing.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ChannelBuilder;
pub use self::core::{ConnectionState, MessageHandler, TaskChannel};
pub use correlator::TaskCorrelator;
pub use options::{ChannelOptions, ReconnectPolicy, UserInfo};
pub use router::{Dispatch, route, route_payload};
