use crate::config::Config;
use crate::dispatch::engine::Engine;
use crate::dispatch::{DispatchStream, Dispatcher, Fetcher};
use crate::limiter::RateLimiter;
use crate::monitor::MemorySampler;
use crate::robots::RobotsChecker;
use crate::task::TaskDescriptor;
use crate::ConfigError;
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Dispatcher with a fixed concurrency ceiling
///
/// At most `max-session-permit` tasks are admitted at once; a slot frees up
/// only when a task retires. Memory is never consulted for admission.
///
/// # Example
///
/// ```no_run
/// use ripple_dispatch::{Config, Dispatcher, SemaphoreDispatcher};
/// # use ripple_dispatch::{FetchOutcome, Fetcher, TaskDescriptor};
/// # use std::sync::Arc;
/// # struct Echo;
/// # #[async_trait::async_trait]
/// # impl Fetcher for Echo {
/// #     async fn fetch(&self, _: &TaskDescriptor) -> FetchOutcome { FetchOutcome::success(200) }
/// # }
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = SemaphoreDispatcher::new(&Config::default())?;
/// let tasks = vec![TaskDescriptor::parse("https://example.com/")?];
/// let results = dispatcher.run_batch(tasks, Arc::new(Echo)).await;
/// assert_eq!(results.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct SemaphoreDispatcher {
    engine: Engine,
}

impl SemaphoreDispatcher {
    /// Creates a dispatcher, rejecting an invalid configuration
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: Engine::new(config, "semaphore")?,
        })
    }

    /// Filters every domain through a robots policy checker before admission
    pub fn with_robots_checker(mut self, checker: Arc<dyn RobotsChecker>) -> Self {
        self.engine.robots = Some(checker);
        self
    }

    /// Replaces the source of per-task process memory figures
    pub fn with_memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.engine.sampler = sampler;
        self
    }

    /// Draws the live monitor into `progress` instead of a fresh stderr target
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.engine.progress = progress;
        self
    }

    /// Token that cancels every run of this dispatcher, current and future
    pub fn cancellation_token(&self) -> CancellationToken {
        self.engine.cancel.clone()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.engine.limiter
    }
}

#[async_trait]
impl Dispatcher for SemaphoreDispatcher {
    fn run_stream(
        &self,
        descriptors: Vec<TaskDescriptor>,
        fetcher: Arc<dyn Fetcher>,
    ) -> DispatchStream {
        self.engine.start(descriptors, fetcher, None)
    }
}
