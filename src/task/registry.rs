//! Task registry: the live table of every task in one dispatcher run
//!
//! The registry is written by the dispatcher's execution path and read by the
//! reporter. All mutations take a short `parking_lot` lock and never block on
//! I/O; snapshots are cloned out so rendering never holds the lock.

use crate::task::{DispatchResult, FailureKind, TaskDescriptor, TaskId, TaskStatus};
use crate::DispatchError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Mutable record of one task, owned by the registry
#[derive(Debug, Clone)]
pub struct TaskState {
    pub descriptor: TaskDescriptor,
    pub status: TaskStatus,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub admitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Set while the task sleeps between rate-limited attempts
    pub backoff_until: Option<DateTime<Utc>>,

    /// Set while the task has handed its slot back and waits for critical memory to pass
    pub requeued: bool,
    pub requeues: u32,

    pub last_error: Option<String>,
    pub failure: Option<FailureKind>,
    pub memory_usage_mb: f64,
    pub peak_memory_mb: f64,
}

impl TaskState {
    fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            descriptor,
            status: TaskStatus::Queued,
            attempts: 0,
            enqueued_at: Utc::now(),
            admitted_at: None,
            started_at: None,
            ended_at: None,
            backoff_until: None,
            requeued: false,
            requeues: 0,
            last_error: None,
            failure: None,
            memory_usage_mb: 0.0,
            peak_memory_mb: 0.0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.descriptor.id()
    }

    /// Time spent executing, up to `now` while still running
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        match self.started_at {
            Some(start) => self.ended_at.unwrap_or(now) - start,
            None => chrono::Duration::zero(),
        }
    }

    /// Time spent waiting for admission, up to `now` while still queued
    pub fn wait_time(&self, now: DateTime<Utc>) -> chrono::Duration {
        let admitted = self.admitted_at.or(self.ended_at).unwrap_or(now);
        admitted - self.enqueued_at
    }

    pub fn in_backoff(&self) -> bool {
        self.backoff_until.is_some()
    }
}

/// Number of tasks in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub admitted: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Queued => self.queued,
            TaskStatus::Admitted => self.admitted,
            TaskStatus::Running => self.running,
            TaskStatus::Succeeded => self.succeeded,
            TaskStatus::Failed => self.failed,
        }
    }

    pub(crate) fn bump(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Queued => self.queued += 1,
            TaskStatus::Admitted => self.admitted += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.admitted + self.running + self.succeeded + self.failed
    }

    pub fn retired(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Wait statistics for tasks that have not been admitted yet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueStats {
    pub queued: usize,
    pub longest_wait: chrono::Duration,
    pub average_wait: chrono::Duration,
}

impl Default for QueueStats {
    fn default() -> Self {
        Self {
            queued: 0,
            longest_wait: chrono::Duration::zero(),
            average_wait: chrono::Duration::zero(),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, TaskState>,
}

/// Thread-safe mapping from task identifier to task state
#[derive(Debug, Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor in the `Queued` status
    ///
    /// Returns false, leaving the existing entry untouched, if the identifier
    /// is already registered.
    pub fn register(&self, descriptor: &TaskDescriptor) -> bool {
        let mut inner = self.inner.lock();
        let id = descriptor.id();
        if inner.tasks.contains_key(&id) {
            return false;
        }
        inner.order.push(id);
        inner.tasks.insert(id, TaskState::new(descriptor.clone()));
        true
    }

    /// Moves a task forward to a non-terminal status
    ///
    /// Terminal statuses are reached only through [`record_result`](Self::record_result).
    pub fn transition(&self, id: TaskId, to: TaskStatus) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        let state = inner
            .tasks
            .get_mut(&id)
            .ok_or(DispatchError::UnknownTask(id))?;

        if to.is_terminal() || !state.status.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition {
                id,
                from: state.status,
                to,
            });
        }

        let now = Utc::now();
        match to {
            TaskStatus::Admitted => state.admitted_at = Some(now),
            TaskStatus::Running => state.started_at = Some(now),
            _ => {}
        }
        state.status = to;
        Ok(())
    }

    /// Counts one more fetch attempt and clears any backoff marker
    pub fn record_attempt(&self, id: TaskId) {
        if let Some(state) = self.inner.lock().tasks.get_mut(&id) {
            state.attempts += 1;
            state.backoff_until = None;
        }
    }

    /// Marks a running task as waiting outside its slot, or clears the mark
    pub fn set_requeued(&self, id: TaskId, requeued: bool) {
        if let Some(state) = self.inner.lock().tasks.get_mut(&id) {
            if state.status != TaskStatus::Running || state.requeued == requeued {
                return;
            }
            state.requeued = requeued;
            if requeued {
                state.requeues += 1;
            }
        }
    }

    /// Marks a running task as sleeping in backoff until `until`
    pub fn set_backoff(&self, id: TaskId, until: DateTime<Utc>, reason: String) {
        if let Some(state) = self.inner.lock().tasks.get_mut(&id) {
            if state.status == TaskStatus::Running {
                state.backoff_until = Some(until);
                state.last_error = Some(reason);
            }
        }
    }

    /// Retires a task with its final result
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The task moved to `Succeeded` or `Failed`
    /// * `Err(DispatchError::AlreadyRetired)` - A result was already recorded
    /// * `Err(DispatchError::InvalidTransition)` - The status cannot retire that way
    pub fn record_result(&self, result: &DispatchResult) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        let id = result.task_id;
        let state = inner
            .tasks
            .get_mut(&id)
            .ok_or(DispatchError::UnknownTask(id))?;

        if state.status.is_terminal() {
            return Err(DispatchError::AlreadyRetired(id));
        }

        let to = if result.success {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };

        if !state.status.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition {
                id,
                from: state.status,
                to,
            });
        }

        state.status = to;
        state.attempts = state.attempts.max(result.attempts);
        state.ended_at = Some(result.end_time);
        state.backoff_until = None;
        state.failure = result.failure;
        state.last_error = if result.error_message.is_empty() {
            None
        } else {
            Some(result.error_message.clone())
        };
        state.memory_usage_mb = result.memory_usage_mb;
        state.peak_memory_mb = result.peak_memory_mb;
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<TaskState> {
        self.inner.lock().tasks.get(&id).cloned()
    }

    /// Returns every task state in registration order
    pub fn snapshot(&self) -> Vec<TaskState> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let inner = self.inner.lock();
        let mut counts = StatusCounts::default();
        for state in inner.tasks.values() {
            counts.bump(state.status);
        }
        counts
    }

    pub fn queue_stats(&self, now: DateTime<Utc>) -> QueueStats {
        let inner = self.inner.lock();
        let waits: Vec<chrono::Duration> = inner
            .tasks
            .values()
            .filter(|s| s.status == TaskStatus::Queued)
            .map(|s| s.wait_time(now))
            .collect();

        if waits.is_empty() {
            return QueueStats::default();
        }

        let total = waits
            .iter()
            .fold(chrono::Duration::zero(), |acc, w| acc + *w);
        QueueStats {
            queued: waits.len(),
            longest_wait: waits
                .iter()
                .copied()
                .max()
                .unwrap_or_else(chrono::Duration::zero),
            average_wait: total / waits.len() as i32,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
