use crate::config::{Config, DispatcherConfig};
use crate::dispatch::engine::Engine;
use crate::dispatch::{DispatchStream, Dispatcher, Fetcher};
use crate::limiter::RateLimiter;
use crate::monitor::{MemoryReading, MemorySampler, ResourceMonitor};
use crate::robots::RobotsChecker;
use crate::task::TaskDescriptor;
use crate::ConfigError;
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Dispatcher whose admissions pause while system memory is under pressure
///
/// Up to `max-session-permit` tasks run at once, as with the semaphore
/// strategy. In addition, memory is sampled every `check-interval`; once a
/// sample is above `memory-threshold-percent`, no new task is admitted until a
/// later sample is at or below the recovery threshold. Tasks already running
/// are never interrupted.
pub struct MemoryAdaptiveDispatcher {
    engine: Engine,
    config: DispatcherConfig,
    monitor: Arc<ResourceMonitor>,
}

impl MemoryAdaptiveDispatcher {
    /// Creates a dispatcher, rejecting an invalid configuration
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let engine = Engine::new(config, "memory-adaptive")?;
        let monitor = ResourceMonitor::new(Arc::clone(&engine.sampler), &config.dispatcher)?;

        Ok(Self {
            engine,
            config: config.dispatcher.clone(),
            monitor: Arc::new(monitor),
        })
    }

    pub fn with_robots_checker(mut self, checker: Arc<dyn RobotsChecker>) -> Self {
        self.engine.robots = Some(checker);
        self
    }

    /// Replaces the memory source used for both admission and per-task figures
    pub fn with_memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.monitor = Arc::new(ResourceMonitor::from_validated(
            Arc::clone(&sampler),
            &self.config,
        ));
        self.engine.sampler = sampler;
        self
    }

    /// Draws the live monitor into `progress` instead of a fresh stderr target
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.engine.progress = progress;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.engine.cancel.clone()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.engine.limiter
    }

    /// Takes a memory reading outside of any run
    pub fn sample_memory(&self) -> MemoryReading {
        self.monitor.sample()
    }
}

#[async_trait]
impl Dispatcher for MemoryAdaptiveDispatcher {
    fn run_stream(
        &self,
        descriptors: Vec<TaskDescriptor>,
        fetcher: Arc<dyn Fetcher>,
    ) -> DispatchStream {
        self.engine
            .start(descriptors, fetcher, Some(Arc::clone(&self.monitor)))
    }
}
