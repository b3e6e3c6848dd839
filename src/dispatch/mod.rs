//! Dispatcher module: admission, execution and retirement of tasks
//!
//! # Components
//!
//! - `Fetcher`: the execution capability supplied by the caller
//! - `Dispatcher`: batch and streaming entry points shared by both strategies
//! - `SemaphoreDispatcher`: fixed concurrency ceiling
//! - `MemoryAdaptiveDispatcher`: concurrency ceiling gated by memory pressure
//! - `DispatchStream`: results of one run in completion order
//!
//! # Task lifecycle
//!
//! ```text
//! QUEUED -> ADMITTED -> RUNNING -> SUCCEEDED | FAILED
//!   |          |
//!   +----------+-------> FAILED (policy disallowed, cancelled)
//! ```
//!
//! While RUNNING a task may sleep in backoff between rate-limited attempts. It
//! keeps its concurrency slot while it sleeps.

mod adaptive;
mod engine;
mod gate;
mod semaphore;
mod stream;

pub use adaptive::MemoryAdaptiveDispatcher;
pub use semaphore::SemaphoreDispatcher;
pub use stream::DispatchStream;

pub use crate::task::Payload;

use crate::task::{DispatchResult, TaskDescriptor};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

/// What one fetch attempt produced
#[derive(Clone, Default)]
pub struct FetchOutcome {
    pub success: bool,

    /// Response status, if the attempt got that far
    pub status_code: Option<u16>,

    /// Empty on success
    pub error_message: String,

    /// Response headers with lowercase names, consulted for rate limit hints
    pub headers: HashMap<String, String>,

    /// Opaque data handed back to the caller in the result
    pub payload: Option<Payload>,
}

impl FetchOutcome {
    /// A successful attempt with the given status
    pub fn success(status_code: u16) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            ..Self::default()
        }
    }

    /// A failed attempt that produced a status
    pub fn status(status_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: Some(status_code),
            error_message: error_message.into(),
            ..Self::default()
        }
    }

    /// A failed attempt with no status at all, such as a connection error
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: error_message.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl std::fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOutcome")
            .field("success", &self.success)
            .field("status_code", &self.status_code)
            .field("error_message", &self.error_message)
            .field("headers", &self.headers)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

/// The "execute one task" capability
///
/// Failures are reported through the outcome, never as an error. A fetcher
/// that panics is treated as a failed fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, descriptor: &TaskDescriptor) -> FetchOutcome;
}

/// Entry points shared by every admission strategy
///
/// Each call is one independent run with its own registry and reporter. Every
/// descriptor yields exactly one result. A descriptor whose identifier was
/// already used earlier in the same call is never run and retires at once as
/// a `DuplicateId` failure.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Starts a run and returns its results as they retire
    ///
    /// Must be called from within a tokio runtime. Dropping the stream cancels
    /// the run.
    fn run_stream(&self, descriptors: Vec<TaskDescriptor>, fetcher: Arc<dyn Fetcher>)
        -> DispatchStream;

    /// Runs every descriptor to completion and returns the results
    ///
    /// Results are in completion order, not submission order.
    async fn run_batch(
        &self,
        descriptors: Vec<TaskDescriptor>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Vec<DispatchResult> {
        self.run_stream(descriptors, fetcher).collect().await
    }
}
