//! Task lifecycle states
//!
//! Tasks move strictly forward: `Queued -> Admitted -> Running -> {Succeeded | Failed}`.
//! A queued or admitted task may also retire directly as `Failed` (policy
//! exclusion, cancellation). Backoff between rate-limited attempts is a
//! sub-state of `Running`, not a status of its own.
use std::fmt;

/// Represents the current state of a task in the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    // ===== Active States =====
    /// Submitted and waiting for admission
    Queued,

    /// Holds a concurrency slot but has not started executing
    Admitted,

    /// Executing (including courtesy and backoff waits)
    Running,

    // ===== Terminal States =====
    /// Retired with a successful fetch
    Succeeded,

    /// Retired with any kind of failure
    Failed,
}

impl TaskStatus {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the forward move `self -> next` is allowed
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Admitted)
                | (Queued, Failed)
                | (Admitted, Running)
                | (Admitted, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Admitted => "ADMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Returns all statuses in lifecycle order
    pub fn all() -> [Self; 5] {
        [
            Self::Queued,
            Self::Admitted,
            Self::Running,
            Self::Succeeded,
            Self::Failed,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
