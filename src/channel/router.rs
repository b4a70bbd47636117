//! Inbound message routing.
//!
//! Routing is a pure decision over the decoded message and the correlator;
//! the manager carries out the returned [`Dispatch`].
//!
//! | Message | Dispatch |
//! |---------|----------|
//! | `chunk` / `result` for the active task | [`Dispatch::Deliver`] |
//! | `chunk` / `result` for any other task | [`Dispatch::Drop`] |
//! | `status` = `pending` with a `task_id` | [`Dispatch::Correlated`] |
//! | other `status`, `pong` | [`Dispatch::Drop`] |
//! | `connect_error` / `disconnect` | [`Dispatch::Reconnect`] |
//! | not an object, unknown type, failed envelope | [`Dispatch::Drop`] |

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::identifiers::TaskId;
use crate::protocol::{InboundMessage, unwrap_envelope};

use super::correlator::TaskCorrelator;

// ============================================================================
// Dispatch
// ============================================================================

/// What to do with one inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Hand the message to the application callback.
    Deliver(InboundMessage),
    /// The active task changed to this ID.
    Correlated(TaskId),
    /// Tear the connection down and retry.
    Reconnect(&'static str),
    /// Discard, with a reason for the trace log.
    Drop(String),
}

// ============================================================================
// Routing
// ============================================================================

/// Unwraps, decodes and routes a raw `message` payload.
pub fn route_payload(payload: &Value, correlator: &mut TaskCorrelator) -> Dispatch {
    let message = match unwrap_envelope(payload).and_then(InboundMessage::decode) {
        Ok(message) => message,
        Err(e) => return Dispatch::Drop(e.to_string()),
    };
    route(message, correlator)
}

/// Routes a decoded message.
pub fn route(message: InboundMessage, correlator: &mut TaskCorrelator) -> Dispatch {
    match message {
        InboundMessage::Chunk(ref frame) | InboundMessage::Result(ref frame) => {
            if correlator.is_active(frame.task_id()) {
                Dispatch::Deliver(message)
            } else {
                Dispatch::Drop(format!(
                    "{} for inactive task {:?}",
                    message.kind(),
                    frame.task_id().map(TaskId::as_str)
                ))
            }
        }

        InboundMessage::Status(update) => match update.pending_task() {
            Some(id) => {
                correlator.set_active_task(id.clone());
                Dispatch::Correlated(id.clone())
            }
            None => Dispatch::Drop(format!("status {:?} not tracked", update.status())),
        },

        InboundMessage::Pong => Dispatch::Drop("pong".to_owned()),

        InboundMessage::ConnectError(_) => Dispatch::Reconnect("connect_error message"),

        InboundMessage::Disconnect(_) => Dispatch::Reconnect("disconnect message"),
    }
}

// ============================================================================
// Tests
// ============================================================================
