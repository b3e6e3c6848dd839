//! Ripple-Dispatch: a polite concurrency dispatcher for bulk fetch workloads
//!
//! This crate admits a large set of fetch targets into concurrent execution while
//! respecting a concurrency ceiling (fixed or memory-adaptive), per-domain courtesy
//! pacing with exponential backoff, an optional robots-style policy filter, and a
//! live view of every task for the operator.
//!
//! The crate does not know how a target is fetched. Callers hand it a [`Fetcher`]
//! and a list of [`TaskDescriptor`]s; every descriptor comes back as exactly one
//! [`DispatchResult`].

pub mod config;
pub mod dispatch;
pub mod http;
pub mod limiter;
pub mod monitor;
pub mod report;
pub mod robots;
pub mod task;

use thiserror::Error;

/// Main error type for Ripple-Dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid state transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: task::TaskId,
        from: task::TaskStatus,
        to: task::TaskStatus,
    },

    #[error("Unknown task: {0}")]
    UnknownTask(task::TaskId),

    #[error("Task {0} has already retired")]
    AlreadyRetired(task::TaskId),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Missing domain in URL: {0}")]
    MissingDomain(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Ripple-Dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, DisplayMode, Strategy};
pub use dispatch::{
    DispatchStream, Dispatcher, FetchOutcome, Fetcher, MemoryAdaptiveDispatcher, Payload,
    SemaphoreDispatcher,
};
pub use limiter::{RateLimitDecision, RateLimiter};
pub use monitor::{
    MemoryLevel, MemoryReading, MemorySampler, MemoryState, ProcMemorySampler, ResourceMonitor,
};
pub use report::{Reporter, ReporterHandle, RunStatistics};
pub use robots::{PolicyDecision, RobotsChecker};
pub use task::{DispatchResult, FailureKind, TaskDescriptor, TaskId, TaskRegistry, TaskStatus};
