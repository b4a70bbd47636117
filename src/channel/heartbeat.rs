//! Keepalive scheduling.
//!
//! The scheduler owns nothing but its timer task. What a beat does is up to
//! the closure it is armed with; returning `false` from the closure stops
//! the timer.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

// ============================================================================
// Heartbeat
// ============================================================================

/// Periodic keepalive timer.
#[derive(Debug, Default)]
pub(crate) struct Heartbeat {
    /// Armed timer, if any.
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Arms the timer, cancelling any previous one first.
    ///
    /// The first beat happens one full `period` after arming.
    pub(crate) fn start<F>(&mut self, period: Duration, mut beat: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.cleanup();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                trace!("Heartbeat tick");
                if !beat() {
                    break;
                }
            }
        }));
    }

    /// Cancels the timer. Safe to call when nothing is armed.
    pub(crate) fn cleanup(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Returns `true` while a timer is armed.
    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ============================================================================
// Tests
// ============================================================================
