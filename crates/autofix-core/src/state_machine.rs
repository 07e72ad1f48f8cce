//! Task lifecycle
//!
//! `pending -> in_progress -> {completed | failed}`, and `pending -> cancelled`.
//! Terminal states have no successors.

use crate::error::RemediationError;
use crate::types::{TaskId, TaskStatus};

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: TaskStatus) -> Vec<TaskStatus> {
    use TaskStatus::*;
    match from {
        Pending => vec![InProgress, Cancelled],
        InProgress => vec![Completed, Failed],
        Completed | Failed | Cancelled => vec![],
    }
}

/// Check a status change for `task`
///
/// # Errors
/// Returns `RemediationError::IllegalTransition` when `to` is not reachable from `from`
pub fn validate_transition(
    task: TaskId,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<(), RemediationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(RemediationError::IllegalTransition { task, from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        for status in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(allowed_transitions(status).is_empty());
        }
    }

    #[test]
    fn running_task_cannot_be_cancelled() {
        let id = TaskId::new();
        let err = validate_transition(id, TaskStatus::InProgress, TaskStatus::Cancelled).unwrap_err();
        assert!(matches!(
            err,
            RemediationError::IllegalTransition {
                from: TaskStatus::InProgress,
                to: TaskStatus::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn happy_path_is_allowed() {
        let id = TaskId::new();
        validate_transition(id, TaskStatus::Pending, TaskStatus::InProgress).unwrap();
        validate_transition(id, TaskStatus::InProgress, TaskStatus::Completed).unwrap();
        assert!(validate_transition(id, TaskStatus::Pending, TaskStatus::Completed).is_err());
    }
}
