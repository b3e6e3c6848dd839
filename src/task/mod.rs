//! Task module: what the dispatcher schedules and what it hands back
//!
//! # Components
//!
//! - `TaskDescriptor`: immutable unit of work (id, URL, derived domain, payload)
//! - `TaskStatus`: the forward-only lifecycle of a task
//! - `TaskRegistry`: live table of task states, read by the reporter
//! - `DispatchResult`: the record produced exactly once when a task retires

mod descriptor;
mod registry;
mod result;
mod status;

// Re-export main types
pub use descriptor::{extract_domain, Payload, TaskDescriptor, TaskId};
pub use registry::{QueueStats, StatusCounts, TaskRegistry, TaskState};
pub use result::{DispatchResult, FailureKind};
pub use status::TaskStatus;
