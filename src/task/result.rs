use crate::task::{Payload, TaskDescriptor, TaskId};
use chrono::{DateTime, Utc};
use std::fmt;
use url::Url;

/// Why a task retired unsuccessfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    /// The fetch capability reported a failure
    Fetch,
    /// The domain's rate-limit retry budget is exhausted
    RateLimitExceeded,
    /// The robots policy checker disallowed the domain
    PolicyDisallowed,
    /// A fetch attempt exceeded the per-task timeout
    Timeout,
    /// The run was cancelled before the task could finish
    Cancelled,
    /// Another descriptor in the same run already used this task id
    DuplicateId,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::PolicyDisallowed => "policy_disallowed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::DuplicateId => "duplicate_id",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable record produced when a task retires
///
/// Exactly one is produced per submitted descriptor.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub task_id: TaskId,
    pub url: Url,
    pub domain: String,
    pub success: bool,

    /// Set on failure only
    pub failure: Option<FailureKind>,

    /// Status code of the last attempt, if the fetch produced one
    pub status_code: Option<u16>,

    /// Number of fetch attempts made (zero when retired before admission)
    pub attempts: u32,

    /// Process RSS change in MB between start and end of execution
    pub memory_usage_mb: f64,

    /// Largest process RSS change in MB observed during execution
    pub peak_memory_mb: f64,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Empty on success
    pub error_message: String,

    /// Opaque payload returned by the fetch capability
    pub payload: Option<Payload>,
}

impl DispatchResult {
    /// Builds the result for a task that retires without being executed
    pub fn not_executed(descriptor: &TaskDescriptor, kind: FailureKind, message: String) -> Self {
        let now = Utc::now();
        Self {
            task_id: descriptor.id(),
            url: descriptor.url().clone(),
            domain: descriptor.domain().to_string(),
            success: false,
            failure: Some(kind),
            status_code: None,
            attempts: 0,
            memory_usage_mb: 0.0,
            peak_memory_mb: 0.0,
            start_time: now,
            end_time: now,
            error_message: message,
            payload: None,
        }
    }

    /// Wall-clock time between start and retirement
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// Downcasts the payload to a concrete type
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }
}
