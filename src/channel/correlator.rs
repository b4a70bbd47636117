//! Active task tracking.
//!
//! The channel follows one task stream at a time. A newer pending task
//! replaces the old one outright; there is no history.

use crate::identifiers::TaskId;

/// Holds the single in-flight task ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCorrelator {
    active: Option<TaskId>,
}

impl TaskCorrelator {
    /// Creates a correlator with no active task.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { active: None }
    }

    /// Makes `id` the active task, unconditionally.
    #[inline]
    pub fn set_active_task(&mut self, id: TaskId) {
        self.active = Some(id);
    }

    /// Returns the active task.
    #[inline]
    #[must_use]
    pub fn active_task(&self) -> Option<&TaskId> {
        self.active.as_ref()
    }

    /// Returns `true` if `id` is present and equals the active task.
    #[inline]
    #[must_use]
    pub fn is_active(&self, id: Option<&TaskId>) -> bool {
        matches!((id, &self.active), (Some(id), Some(active)) if id == active)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_starts_empty() {
        let correlator = TaskCorrelator::new();
        assert!(correlator.active_task().is_none());
        assert!(!correlator.is_active(None));
        assert!(!correlator.is_active(Some(&TaskId::from("A1"))));
    }

    #[test]
    fn test_overwrites_unconditionally() {
        let mut correlator = TaskCorrelator::default();
        correlator.set_active_task(TaskId::from("A1"));
        correlator.set_active_task(TaskId::from("B9"));

        assert_eq!(correlator.active_task(), Some(&TaskId::from("B9")));
        assert!(correlator.is_active(Some(&TaskId::from("B9"))));
        assert!(!correlator.is_active(Some(&TaskId::from("A1"))));
        assert!(!correlator.is_active(None));
    }

    proptest! {
        #[test]
        fn prop_last_id_wins(ids in prop::collection::vec("[A-Z][0-9]{1,2}", 1..20)) {
            let mut correlator = TaskCorrelator::new();
            for id in &ids {
                correlator.set_active_task(TaskId::new(id.clone()));
            }
            prop_assert_eq!(correlator.active_task().map(TaskId::as_str), ids.last().map(String::as_str));
        }
    }
}
