//! Scheduler bookkeeping
//!
//! [`SchedulerState`] owns the priority queue, the task map, the running set
//! and the shared counters. The orchestrator keeps exactly one instance behind
//! one mutex, so every read-modify-write happens in a single critical section.

use crate::error::RemediationError;
use crate::plan::StepResult;
use crate::state_machine::validate_transition;
use crate::types::{AppliedChange, Priority, RefactoringTask, TaskId, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Aggregate counters over every task seen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefactoringStats {
    /// Tasks submitted
    pub tasks_created: u64,
    /// Tasks finished `completed`
    pub tasks_completed: u64,
    /// Tasks finished `failed`
    pub tasks_failed: u64,
    /// Tasks cancelled while pending
    pub tasks_cancelled: u64,
    /// Plan steps whose fix passed its sandbox test
    pub steps_succeeded: u64,
    /// Plan steps that failed
    pub steps_failed: u64,
    /// Files written by passing steps
    pub files_changed: u64,
    /// Sum of completed task scores
    pub total_improvement: f64,
}

impl RefactoringStats {
    /// Mean score over completed tasks
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_improvement(&self) -> f64 {
        if self.tasks_completed == 0 {
            0.0
        } else {
            self.total_improvement / self.tasks_completed as f64
        }
    }

    /// Share of finished tasks that completed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / finished as f64
        }
    }
}

/// Result of running a task's plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Per-step results
    pub steps: Vec<StepResult>,
    /// Changes written
    pub applied_changes: Vec<AppliedChange>,
    /// Aggregated score
    pub improvement_score: f64,
    /// Task-level failure; `None` means completed
    pub error: Option<String>,
}

impl TaskOutcome {
    /// Outcome for a task that failed before or outside its plan
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: Priority,
    seq: u64,
    id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then lower sequence (FIFO)
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Queue, task map, running set and counters
#[derive(Debug, Default)]
pub struct SchedulerState {
    queue: BinaryHeap<QueueEntry>,
    tasks: HashMap<TaskId, RefactoringTask>,
    running: HashSet<TaskId>,
    stats: RefactoringStats,
    next_seq: u64,
}

impl SchedulerState {
    /// Create empty state
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and queue a pending task
    pub fn enqueue(&mut self, task: RefactoringTask) -> TaskId {
        let id = task.id;
        self.queue.push(QueueEntry {
            priority: task.priority,
            seq: self.next_seq,
            id,
        });
        self.next_seq += 1;
        self.tasks.insert(id, task);
        self.stats.tasks_created += 1;
        id
    }

    /// Pop the highest-priority pending task and mark it running
    ///
    /// Returns `None` when `cap` tasks already run or nothing is pending.
    /// Entries of tasks cancelled in the meantime are discarded.
    pub fn next_ready(&mut self, cap: usize) -> Option<RefactoringTask> {
        if self.running.len() >= cap {
            return None;
        }
        while let Some(entry) = self.queue.pop() {
            match self.tasks.get(&entry.id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    return self.claim(entry.id).ok();
                }
                _ => continue,
            }
        }
        None
    }

    /// Mark a specific pending task running, taking it out of dispatch order
    ///
    /// # Errors
    /// Returns error if the task is unknown or not pending
    pub fn claim(&mut self, id: TaskId) -> Result<RefactoringTask, RemediationError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RemediationError::TaskNotFound(id))?;
        validate_transition(id, task.status, TaskStatus::InProgress)?;
        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        self.running.insert(id);
        // its queue entry is skipped by `next_ready` from now on
        Ok(task.clone())
    }

    /// Cancel a pending task
    ///
    /// # Errors
    /// Returns `NotCancellable` once the task left the queue
    pub fn cancel(&mut self, id: TaskId) -> Result<(), RemediationError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RemediationError::TaskNotFound(id))?;
        if task.status != TaskStatus::Pending {
            return Err(RemediationError::NotCancellable {
                task: id,
                status: task.status,
            });
        }
        validate_transition(id, task.status, TaskStatus::Cancelled)?;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.stats.tasks_cancelled += 1;
        Ok(())
    }

    /// Record the outcome of a running task
    ///
    /// The task always leaves the running set, even when the transition is
    /// rejected.
    ///
    /// # Errors
    /// Returns error if the task is unknown or not running
    pub fn finish(&mut self, id: TaskId, outcome: TaskOutcome) -> Result<TaskStatus, RemediationError> {
        self.running.remove(&id);
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(RemediationError::TaskNotFound(id))?;
        let to = if outcome.error.is_none() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        validate_transition(id, task.status, to)?;

        for step in &outcome.steps {
            if step.success {
                self.stats.steps_succeeded += 1;
            } else {
                self.stats.steps_failed += 1;
            }
        }
        self.stats.files_changed += outcome.applied_changes.iter().filter(|c| c.written).count() as u64;
        match to {
            TaskStatus::Completed => {
                self.stats.tasks_completed += 1;
                self.stats.total_improvement += outcome.improvement_score;
                task.improvement_score = Some(outcome.improvement_score);
            }
            _ => self.stats.tasks_failed += 1,
        }

        task.status = to;
        task.completed_at = Some(Utc::now());
        task.steps = outcome.steps;
        task.applied_changes = outcome.applied_changes;
        task.error = outcome.error;
        Ok(to)
    }

    /// Task by id
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&RefactoringTask> {
        self.tasks.get(&id)
    }

    /// Every task, oldest first
    #[must_use]
    pub fn tasks(&self) -> Vec<RefactoringTask> {
        let mut all: Vec<_> = self.tasks.values().cloned().collect();
        all.sort_by_key(|t| (t.created_at, t.id));
        all
    }

    /// Tasks waiting for dispatch
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    /// Tasks owned by a worker
    #[inline]
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Nothing pending and nothing running
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.running.is_empty() && self.pending_count() == 0
    }

    /// Snapshot of the counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> RefactoringStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use pretty_assertions::assert_eq;

    fn task(priority: Priority) -> RefactoringTask {
        RefactoringTask::new(Category::Quality, priority, "t", vec![])
    }

    #[test]
    fn priority_then_fifo() {
        let mut state = SchedulerState::new();
        let low = state.enqueue(task(Priority::Low));
        let high_a = state.enqueue(task(Priority::High));
        let critical = state.enqueue(task(Priority::Critical));
        let high_b = state.enqueue(task(Priority::High));

        let order: Vec<_> = std::iter::from_fn(|| state.next_ready(10).map(|t| t.id)).collect();
        assert_eq!(order, vec![critical, high_a, high_b, low]);
    }

    #[test]
    fn cap_limits_running_set() {
        let mut state = SchedulerState::new();
        state.enqueue(task(Priority::Medium));
        state.enqueue(task(Priority::Medium));
        assert!(state.next_ready(1).is_some());
        assert!(state.next_ready(1).is_none());
        assert_eq!(state.running_count(), 1);
    }

    #[test]
    fn cancelled_entries_are_skipped() {
        let mut state = SchedulerState::new();
        let a = state.enqueue(task(Priority::High));
        let b = state.enqueue(task(Priority::Low));
        state.cancel(a).unwrap();
        assert_eq!(state.next_ready(4).map(|t| t.id), Some(b));
        assert_eq!(state.stats().tasks_cancelled, 1);
    }

    #[test]
    fn running_task_is_not_cancellable() {
        let mut state = SchedulerState::new();
        let id = state.enqueue(task(Priority::High));
        state.next_ready(1).unwrap();
        let err = state.cancel(id).unwrap_err();
        assert!(matches!(err, RemediationError::NotCancellable { status: TaskStatus::InProgress, .. }));
    }

    #[test]
    fn finish_updates_counters_and_running_set() {
        let mut state = SchedulerState::new();
        let ok = state.enqueue(task(Priority::High));
        let bad = state.enqueue(task(Priority::High));
        state.next_ready(4).unwrap();
        state.next_ready(4).unwrap();

        let done = TaskOutcome {
            improvement_score: 0.9,
            ..TaskOutcome::default()
        };
        assert_eq!(state.finish(ok, done).unwrap(), TaskStatus::Completed);
        assert_eq!(state.finish(bad, TaskOutcome::failed("boom")).unwrap(), TaskStatus::Failed);

        assert!(state.is_idle());
        let stats = state.stats();
        assert_eq!((stats.tasks_completed, stats.tasks_failed), (1, 1));
        assert!((stats.average_improvement() - 0.9).abs() < 1e-9);
        assert_eq!(state.task(bad).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn finishing_twice_is_illegal() {
        let mut state = SchedulerState::new();
        let id = state.enqueue(task(Priority::High));
        state.next_ready(1).unwrap();
        state.finish(id, TaskOutcome::default()).unwrap();
        let err = state.finish(id, TaskOutcome::default()).unwrap_err();
        assert!(matches!(err, RemediationError::IllegalTransition { from: TaskStatus::Completed, .. }));
        assert_eq!(state.stats().tasks_completed, 1);
    }
}
