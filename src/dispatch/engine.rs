//! Execution path shared by both admission strategies
//!
//! A run is one `drive` task that admits descriptors in FIFO order through the
//! strategy's gate, plus one worker task per admitted descriptor. Workers pace
//! themselves through the rate limiter, call the fetcher, and retire the task
//! with exactly one result. While memory is critical a worker parks before its
//! next fetch, keeping its slot, until the level passes. The result channel closes when the drive task
//! returns, which happens only after every worker, the reporter and the memory
//! sampler have stopped.

use crate::config::{validate_dispatcher_config, validate_monitor_config, Config, MonitorConfig};
use crate::dispatch::gate::Gate;
use crate::dispatch::stream::DispatchStream;
use crate::dispatch::{FetchOutcome, Fetcher};
use crate::limiter::{RateLimitDecision, RateLimiter};
use crate::monitor::{MemorySampler, ProcMemorySampler, ResourceMonitor};
use crate::report::Reporter;
use crate::robots::{PolicyCache, PolicyDecision, RobotsChecker};
use crate::task::{DispatchResult, FailureKind, TaskDescriptor, TaskId, TaskRegistry, TaskStatus};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use indicatif::MultiProgress;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Everything a dispatcher shares between its runs
#[derive(Clone)]
pub(crate) struct Engine {
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) sampler: Arc<dyn MemorySampler>,
    pub(crate) robots: Option<Arc<dyn RobotsChecker>>,
    pub(crate) monitor_config: MonitorConfig,
    pub(crate) progress: MultiProgress,
    pub(crate) max_permits: usize,
    pub(crate) per_task_timeout: Option<Duration>,
    pub(crate) timeout_status: Option<u16>,
    pub(crate) cancel: CancellationToken,
    pub(crate) strategy: &'static str,
}

impl Engine {
    pub(crate) fn new(config: &Config, strategy: &'static str) -> Result<Self, ConfigError> {
        validate_dispatcher_config(&config.dispatcher)?;
        validate_monitor_config(&config.monitor)?;
        let limiter = RateLimiter::new(config.rate_limit.clone())?;

        Ok(Self {
            limiter: Arc::new(limiter),
            sampler: Arc::new(ProcMemorySampler::new()),
            robots: None,
            monitor_config: config.monitor.clone(),
            progress: MultiProgress::new(),
            max_permits: config.dispatcher.max_session_permit as usize,
            per_task_timeout: config.dispatcher.per_task_timeout(),
            timeout_status: config.dispatcher.timeout_status,
            cancel: CancellationToken::new(),
            strategy,
        })
    }

    /// Registers the descriptors and starts a run in the background
    pub(crate) fn start(
        &self,
        descriptors: Vec<TaskDescriptor>,
        fetcher: Arc<dyn Fetcher>,
        monitor: Option<Arc<ResourceMonitor>>,
    ) -> DispatchStream {
        let registry = Arc::new(TaskRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let expected = descriptors.len();

        let mut queue = VecDeque::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if registry.register(&descriptor) {
                queue.push_back(descriptor);
                continue;
            }
            // The registry keeps the first holder of the id; this one fails on its own
            tracing::warn!(
                "Task id {} submitted twice, rejecting {}",
                descriptor.id(),
                descriptor.url()
            );
            let message = format!(
                "Duplicate id: task {} was already submitted in this run",
                descriptor.id()
            );
            let _ = tx.send(DispatchResult::not_executed(
                &descriptor,
                FailureKind::DuplicateId,
                message,
            ));
        }

        let cancel = self.cancel.child_token();
        let stream = DispatchStream::new(rx, Arc::clone(&registry), cancel.clone(), expected);

        let run = Run {
            engine: self.clone(),
            registry,
            fetcher,
            cancel,
            results: tx,
        };
        tokio::spawn(run.drive(queue, monitor));
        stream
    }
}

/// State of one run, cloned into every worker
#[derive(Clone)]
struct Run {
    engine: Engine,
    registry: Arc<TaskRegistry>,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    results: mpsc::UnboundedSender<DispatchResult>,
}

impl Run {
    async fn drive(
        self,
        mut queue: VecDeque<TaskDescriptor>,
        monitor: Option<Arc<ResourceMonitor>>,
    ) {
        tracing::info!(
            "Dispatch run started: {} tasks, {} strategy, {} permits",
            queue.len(),
            self.engine.strategy,
            self.engine.max_permits
        );

        if let Some(monitor) = &monitor {
            tracing::info!(
                "Memory gate: pause above {:.1}%, resume at {:.1}%, requeue at {:.1}%, sampled every {:?}",
                monitor.threshold(),
                monitor.recovery_threshold(),
                monitor.critical_threshold(),
                monitor.check_interval()
            );
        }
        let memory = monitor.map(|monitor| monitor.spawn());
        let mut gate = match &memory {
            Some(handle) => Gate::adaptive(self.engine.max_permits, handle.subscribe()),
            None => Gate::fixed(self.engine.max_permits),
        };

        let reporter = if self.engine.monitor_config.enabled {
            let reporter = Reporter::new(
                Arc::clone(&self.registry),
                self.engine.monitor_config.clone(),
                self.engine.progress.clone(),
            );
            let reporter = match &memory {
                Some(handle) => reporter.with_memory(handle.subscribe()),
                None => reporter,
            };
            Some(reporter.start())
        } else {
            None
        };

        let policy = self.engine.robots.clone().map(PolicyCache::new);
        let mut workers = JoinSet::new();

        while let Some(descriptor) = queue.pop_front() {
            if self.cancel.is_cancelled() {
                queue.push_front(descriptor);
                break;
            }

            if let Some(policy) = &policy {
                let decision = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    decision = policy.check(descriptor.domain()) => Some(decision),
                };
                match decision {
                    None => {
                        queue.push_front(descriptor);
                        break;
                    }
                    Some(PolicyDecision::Disallowed) => {
                        let message = format!(
                            "Policy disallowed: robots policy excludes {}",
                            descriptor.domain()
                        );
                        self.retire(DispatchResult::not_executed(
                            &descriptor,
                            FailureKind::PolicyDisallowed,
                            message,
                        ));
                        continue;
                    }
                    Some(PolicyDecision::Allowed) => {}
                }
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = gate.acquire() => permit,
            };
            let Some(permit) = permit else {
                queue.push_front(descriptor);
                break;
            };

            if let Err(e) = self.registry.transition(descriptor.id(), TaskStatus::Admitted) {
                tracing::error!("Could not admit task {}: {}", descriptor.id(), e);
            }
            tracing::debug!(
                "Admitted task {} ({}), {} slots left",
                descriptor.id().short(),
                descriptor.url(),
                gate.available()
            );

            let run = self.clone();
            let mut memory = gate.clone();
            workers.spawn(async move {
                run.execute_guarded(descriptor, &mut memory).await;
                drop(permit);
            });

            while let Some(joined) = workers.try_join_next() {
                log_worker(joined);
            }
        }

        if !queue.is_empty() {
            tracing::info!("Run cancelled, retiring {} queued tasks", queue.len());
        }
        for descriptor in queue.drain(..) {
            self.retire(DispatchResult::not_executed(
                &descriptor,
                FailureKind::Cancelled,
                "Cancelled: run stopped before the task was admitted".to_string(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            log_worker(joined);
        }

        if let Some(reporter) = reporter {
            reporter.stop().await;
        }
        if let Some(memory) = memory {
            memory.stop().await;
        }

        let counts = self.registry.counts();
        tracing::info!(
            "Dispatch run finished: {} succeeded, {} failed",
            counts.succeeded,
            counts.failed
        );
    }

    /// Runs one task and retires it, turning a fetcher panic into a failure
    async fn execute_guarded(&self, descriptor: TaskDescriptor, gate: &mut Gate) {
        let started = Utc::now();
        let result = match AssertUnwindSafe(self.execute(&descriptor, gate))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Fetcher panicked on {}: {}", descriptor.url(), message);

                let mut result = DispatchResult::not_executed(
                    &descriptor,
                    FailureKind::Fetch,
                    format!("Fetch error: fetcher panicked: {}", message),
                );
                result.start_time = started;
                result.attempts = self
                    .registry
                    .get(descriptor.id())
                    .map(|state| state.attempts)
                    .unwrap_or(0);
                result
            }
        };
        self.retire(result);
    }

    async fn execute(&self, descriptor: &TaskDescriptor, gate: &mut Gate) -> DispatchResult {
        let id = descriptor.id();
        let domain = descriptor.domain();
        let limiter = &self.engine.limiter;
        let mut trace = ExecutionTrace::new(descriptor, self.rss_mb());

        if let Err(e) = self.registry.transition(id, TaskStatus::Running) {
            tracing::error!("Could not start task {}: {}", id, e);
        }

        loop {
            if gate.is_critical() && !self.wait_out_critical(id, gate).await {
                return trace.fail(
                    FailureKind::Cancelled,
                    format!(
                        "Cancelled: run stopped while {} waited out critical memory",
                        domain
                    ),
                );
            }

            let wait = limiter.admit(domain);
            if !self.sleep_unless_cancelled(wait).await {
                return trace.fail(
                    FailureKind::Cancelled,
                    format!("Cancelled: run stopped while waiting for {}", domain),
                );
            }

            trace.attempts += 1;
            self.registry.record_attempt(id);
            let outcome = self.fetch_once(descriptor).await;
            trace.observe(self.rss_mb());

            let status = match &outcome {
                Some(outcome) => outcome.status_code,
                None => self
                    .engine
                    .timeout_status
                    .filter(|code| limiter.config().is_rate_limit_code(*code)),
            };
            let decision = match (status, &outcome) {
                (Some(code), Some(outcome)) => limiter.on_response(domain, code, &outcome.headers),
                (Some(code), None) => limiter.on_response(domain, code, &HashMap::new()),
                (None, _) => RateLimitDecision::Ok,
            };
            trace.status_code = status;

            match decision {
                RateLimitDecision::RetryAfter(delay) => {
                    let reason = match &outcome {
                        Some(_) => format!("rate limited (status {})", status.unwrap_or_default()),
                        None => "timed out, counted as rate limited".to_string(),
                    };
                    tracing::debug!("Task {} {}, retrying in {:?}", id.short(), reason, delay);
                    let until = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    self.registry.set_backoff(id, until, reason);

                    if !self.sleep_unless_cancelled(delay).await {
                        return trace.fail(
                            FailureKind::Cancelled,
                            format!("Cancelled: run stopped during backoff for {}", domain),
                        );
                    }
                }
                RateLimitDecision::GiveUp => {
                    return trace.fail(
                        FailureKind::RateLimitExceeded,
                        format!(
                            "Rate limit exceeded: {} answered {} more than {} times in a row",
                            domain,
                            status.unwrap_or_default(),
                            limiter.config().max_retries
                        ),
                    );
                }
                RateLimitDecision::Ok => {
                    return match outcome {
                        Some(outcome) => trace.complete(outcome),
                        None => {
                            let message = format!(
                                "Timeout: attempt {} exceeded {:?}",
                                trace.attempts,
                                self.engine.per_task_timeout.unwrap_or_default()
                            );
                            trace.fail(FailureKind::Timeout, message)
                        }
                    };
                }
            }
        }
    }

    /// Parks an admitted task before its next fetch until memory leaves the critical level
    ///
    /// The task keeps its slot, so it resumes ahead of every task still queued.
    /// Returns false if the run was cancelled while waiting.
    async fn wait_out_critical(&self, id: TaskId, gate: &mut Gate) -> bool {
        self.registry.set_requeued(id, true);
        tracing::info!("Task {} requeued: memory is critical", id.short());

        let resumed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = gate.critical_cleared() => true,
        };
        self.registry.set_requeued(id, false);
        if resumed {
            tracing::debug!("Task {} resumed", id.short());
        }
        resumed
    }

    /// One fetch attempt; `None` means it hit the per-task timeout
    async fn fetch_once(&self, descriptor: &TaskDescriptor) -> Option<FetchOutcome> {
        match self.engine.per_task_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch(descriptor))
                .await
                .ok(),
            None => Some(self.fetcher.fetch(descriptor).await),
        }
    }

    /// Returns false if the run was cancelled first
    async fn sleep_unless_cancelled(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    fn retire(&self, result: DispatchResult) {
        match self.registry.record_result(&result) {
            Ok(()) => {
                if result.success {
                    tracing::debug!(
                        "Task {} succeeded after {} attempts",
                        result.task_id.short(),
                        result.attempts
                    );
                } else {
                    tracing::debug!(
                        "Task {} failed: {}",
                        result.task_id.short(),
                        result.error_message
                    );
                }
                // The caller may have stopped listening
                let _ = self.results.send(result);
            }
            Err(e) => tracing::error!("Dropping result for task {}: {}", result.task_id, e),
        }
    }

    fn rss_mb(&self) -> Option<f64> {
        match self.engine.sampler.process_rss_mb() {
            Ok(mb) => Some(mb),
            Err(e) => {
                tracing::trace!("Process memory unavailable: {}", e);
                None
            }
        }
    }
}

/// Bookkeeping for one task's execution
struct ExecutionTrace<'a> {
    descriptor: &'a TaskDescriptor,
    start_time: DateTime<Utc>,
    baseline_mb: Option<f64>,
    memory_mb: f64,
    peak_mb: f64,
    attempts: u32,
    status_code: Option<u16>,
}

impl<'a> ExecutionTrace<'a> {
    fn new(descriptor: &'a TaskDescriptor, baseline_mb: Option<f64>) -> Self {
        Self {
            descriptor,
            start_time: Utc::now(),
            baseline_mb,
            memory_mb: 0.0,
            peak_mb: 0.0,
            attempts: 0,
            status_code: None,
        }
    }

    fn observe(&mut self, rss_mb: Option<f64>) {
        if let (Some(baseline), Some(rss)) = (self.baseline_mb, rss_mb) {
            self.memory_mb = rss - baseline;
            self.peak_mb = self.peak_mb.max(self.memory_mb);
        }
    }

    fn result(self, success: bool) -> DispatchResult {
        DispatchResult {
            task_id: self.descriptor.id(),
            url: self.descriptor.url().clone(),
            domain: self.descriptor.domain().to_string(),
            success,
            failure: None,
            status_code: self.status_code,
            attempts: self.attempts,
            memory_usage_mb: self.memory_mb,
            peak_memory_mb: self.peak_mb,
            start_time: self.start_time,
            end_time: Utc::now(),
            error_message: String::new(),
            payload: None,
        }
    }

    /// Retires with the final fetch outcome
    fn complete(self, outcome: FetchOutcome) -> DispatchResult {
        let mut result = if outcome.success {
            self.result(true)
        } else {
            let detail = if !outcome.error_message.is_empty() {
                outcome.error_message.clone()
            } else if let Some(code) = outcome.status_code {
                format!("status {}", code)
            } else {
                "unknown error".to_string()
            };
            let mut result = self.result(false);
            result.failure = Some(FailureKind::Fetch);
            result.error_message = format!("Fetch error: {}", detail);
            result
        };
        result.status_code = outcome.status_code;
        result.payload = outcome.payload;
        result
    }

    fn fail(self, kind: FailureKind, message: String) -> DispatchResult {
        let mut result = self.result(false);
        result.failure = Some(kind);
        result.error_message = message;
        result
    }
}

fn log_worker(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Task worker ended abnormally: {}", e);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
