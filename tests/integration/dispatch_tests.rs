//! Integration tests for the dispatchers
//!
//! These tests drive full runs against scripted fetchers, memory samplers and
//! policy checkers. Tokio time is paused, so backoff and pacing delays elapse
//! instantly.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use indicatif::{InMemoryTerm, MultiProgress, ProgressDrawTarget};
use parking_lot::Mutex;
use ripple_dispatch::{
    Config, DispatchResult, Dispatcher, FailureKind, FetchOutcome, Fetcher, MemoryAdaptiveDispatcher,
    MemorySampler, PolicyDecision, RateLimiter, RobotsChecker, SemaphoreDispatcher, Strategy,
    TaskDescriptor, TaskStatus,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Creates a configuration with short delays suitable for tests
fn create_test_config(permits: u32) -> Config {
    let mut config = Config::default();
    config.dispatcher.max_session_permit = permits;
    config.rate_limit.base_delay = (0.001, 0.005);
    config.rate_limit.max_delay = 0.05;
    config.rate_limit.max_retries = 3;
    config
}

fn descriptors(urls: &[&str]) -> Vec<TaskDescriptor> {
    urls.iter()
        .map(|url| TaskDescriptor::parse(url).expect("valid test URL"))
        .collect()
}

/// One URL per distinct domain
fn spread(count: usize) -> Vec<TaskDescriptor> {
    (0..count)
        .map(|i| TaskDescriptor::parse(&format!("https://site{}.test/page", i)).unwrap())
        .collect()
}

fn by_url(results: &[DispatchResult]) -> HashMap<String, &DispatchResult> {
    results.iter().map(|r| (r.url.to_string(), r)).collect()
}

/// Succeeds after a fixed delay and tracks how many fetches overlap
#[derive(Default)]
struct CountingFetcher {
    delay: Duration,
    current: AtomicUsize,
    max_seen: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, _descriptor: &TaskDescriptor) -> FetchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        FetchOutcome::success(200)
    }
}

/// Answers each domain from a scripted list of status codes, then 200 forever
#[derive(Default)]
struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<u16>>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn with_script(self, domain: &str, codes: &[u16]) -> Self {
        self.scripts
            .lock()
            .insert(domain.to_string(), codes.iter().copied().collect());
        self
    }

    fn fetches_for(&self, domain: &str) -> usize {
        self.fetched.lock().iter().filter(|d| *d == domain).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, descriptor: &TaskDescriptor) -> FetchOutcome {
        let domain = descriptor.domain().to_string();
        self.fetched.lock().push(domain.clone());

        let code = self
            .scripts
            .lock()
            .get_mut(&domain)
            .and_then(|codes| codes.pop_front())
            .unwrap_or(200);

        if (200..300).contains(&code) {
            FetchOutcome::success(code)
        } else {
            FetchOutcome::status(code, format!("HTTP {}", code))
        }
    }
}

/// Never answers within any reasonable timeout
struct SlowFetcher;

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, _descriptor: &TaskDescriptor) -> FetchOutcome {
        tokio::time::sleep(Duration::from_secs(60)).await;
        FetchOutcome::success(200)
    }
}

/// System memory level shared with the test body
struct SharedSampler {
    percent_bits: AtomicU64,
}

impl SharedSampler {
    fn new(percent: f64) -> Self {
        Self {
            percent_bits: AtomicU64::new(percent.to_bits()),
        }
    }

    fn set(&self, percent: f64) {
        self.percent_bits.store(percent.to_bits(), Ordering::SeqCst);
    }
}

impl MemorySampler for SharedSampler {
    fn system_memory_percent(&self) -> io::Result<f64> {
        Ok(f64::from_bits(self.percent_bits.load(Ordering::SeqCst)))
    }

    fn process_rss_mb(&self) -> io::Result<f64> {
        Ok(100.0)
    }
}

/// Disallows a fixed set of domains
struct BlockList(HashSet<String>);

#[async_trait]
impl RobotsChecker for BlockList {
    async fn check(&self, domain: &str) -> PolicyDecision {
        if self.0.contains(domain) {
            PolicyDecision::Disallowed
        } else {
            PolicyDecision::Allowed
        }
    }
}

/// Notes the domain's backoff delay as each fetch starts, then answers from a script
struct DelayRecorder {
    inner: ScriptedFetcher,
    limiter: Arc<RateLimiter>,
    delays: Mutex<Vec<(String, Duration)>>,
}

impl DelayRecorder {
    fn delays_for(&self, domain: &str) -> Vec<Duration> {
        self.delays
            .lock()
            .iter()
            .filter(|(d, _)| d == domain)
            .map(|(_, delay)| *delay)
            .collect()
    }
}

#[async_trait]
impl Fetcher for DelayRecorder {
    async fn fetch(&self, descriptor: &TaskDescriptor) -> FetchOutcome {
        let domain = descriptor.domain();
        if let Some(snapshot) = self.limiter.domain_snapshot(domain) {
            self.delays
                .lock()
                .push((domain.to_string(), snapshot.current_delay));
        }
        self.inner.fetch(descriptor).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_task_retires_exactly_once() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(5)).unwrap();
    let tasks: Vec<TaskDescriptor> = (0..30)
        .map(|i| {
            TaskDescriptor::parse(&format!("https://site{}.test/page/{}", i % 4, i)).unwrap()
        })
        .collect();
    let submitted: HashSet<_> = tasks.iter().map(|t| t.id()).collect();

    let counter = Arc::new(CountingFetcher::new(Duration::from_millis(10)));
    let results = dispatcher.run_batch(tasks, counter.clone()).await;

    assert_eq!(results.len(), 30);
    let returned: HashSet<_> = results.iter().map(|r| r.task_id).collect();
    assert_eq!(returned, submitted);
    assert!(results.iter().all(|r| r.success && r.attempts == 1));
    assert_eq!(counter.calls.load(Ordering::SeqCst), 30);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling_never_exceeded() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(4)).unwrap();
    let counter = Arc::new(CountingFetcher::new(Duration::from_millis(50)));

    let results = dispatcher.run_batch(spread(20), counter.clone()).await;

    assert_eq!(results.len(), 20);
    let max_seen = counter.max_seen.load(Ordering::SeqCst);
    assert!(max_seen <= 4, "saw {} concurrent fetches", max_seen);
    assert!(max_seen > 1, "tasks never overlapped");
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_returns_immediately() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(2)).unwrap();
    let results = dispatcher
        .run_batch(Vec::new(), Arc::new(ScriptedFetcher::default()))
        .await;
    assert!(results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reused_id_retires_as_duplicate() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(2)).unwrap();
    let first = TaskDescriptor::parse("https://a.test/x").unwrap();
    let other = TaskDescriptor::parse("https://b.test/y")
        .unwrap()
        .with_id(first.id());
    let fetcher = Arc::new(ScriptedFetcher::default());

    let results = dispatcher
        .run_batch(vec![first.clone(), first.clone(), other], fetcher.clone())
        .await;

    // Every submitted descriptor gets a result back
    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.success).count(), 1);

    let duplicates: Vec<&DispatchResult> = results
        .iter()
        .filter(|r| r.failure == Some(FailureKind::DuplicateId))
        .collect();
    assert_eq!(duplicates.len(), 2);
    assert!(duplicates.iter().any(|r| r.domain == "b.test"));
    assert!(duplicates
        .iter()
        .all(|r| r.attempts == 0 && r.task_id == first.id()));
    assert!(duplicates[0].error_message.starts_with("Duplicate id"));

    assert_eq!(fetcher.fetches_for("a.test"), 1);
    assert_eq!(fetcher.fetches_for("b.test"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_domain_recovers() {
    // Two tasks on a.test share its backoff; b.test waits for a free slot
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(2)).unwrap();
    let fetcher = Arc::new(DelayRecorder {
        inner: ScriptedFetcher::default().with_script("a.test", &[429, 429, 200]),
        limiter: Arc::clone(dispatcher.rate_limiter()),
        delays: Mutex::new(Vec::new()),
    });
    let tasks = descriptors(&["https://a.test/1", "https://a.test/2", "https://b.test/1"]);

    let results = dispatcher.run_batch(tasks, fetcher.clone()).await;

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success), "{:?}", results);
    let a_attempts: u32 = results
        .iter()
        .filter(|r| r.domain == "a.test")
        .map(|r| r.attempts)
        .sum();
    assert_eq!(a_attempts, 4);
    assert_eq!(fetcher.inner.fetches_for("b.test"), 1);

    // Each 429 grows the shared delay; the success that follows resets it
    let delays = fetcher.delays_for("a.test");
    assert_eq!(delays.len(), 4, "{:?}", delays);
    assert!(delays[0] < delays[1], "{:?}", delays);
    assert!(delays[1] < delays[2], "{:?}", delays);
    assert!(delays[2] <= Duration::from_millis(50));
    assert!(delays[3] < delays[2], "{:?}", delays);

    let snapshot = dispatcher.rate_limiter().domain_snapshot("a.test").unwrap();
    assert_eq!(snapshot.fail_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_retries() {
    let mut config = create_test_config(1);
    config.rate_limit.max_retries = 2;
    let dispatcher = SemaphoreDispatcher::new(&config).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default().with_script("a.test", &[503; 10]));

    let results = dispatcher
        .run_batch(descriptors(&["https://a.test/"]), fetcher.clone())
        .await;

    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::RateLimitExceeded));
    assert_eq!(result.attempts, 3);
    assert_eq!(result.status_code, Some(503));
    assert!(result.error_message.starts_with("Rate limit exceeded"));
    assert_eq!(fetcher.fetches_for("a.test"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_rate_limit_error_is_fetch_failure() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(1)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default().with_script("a.test", &[404]));

    let results = dispatcher
        .run_batch(descriptors(&["https://a.test/missing"]), fetcher)
        .await;

    let result = &results[0];
    assert_eq!(result.failure, Some(FailureKind::Fetch));
    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error_message, "Fetch error: HTTP 404");
}

#[tokio::test(start_paused = true)]
async fn test_disallowed_domain_is_never_fetched() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(3))
        .unwrap()
        .with_robots_checker(Arc::new(BlockList(
            ["blocked.test".to_string()].into_iter().collect(),
        )));
    let fetcher = Arc::new(ScriptedFetcher::default());
    let tasks = descriptors(&[
        "https://blocked.test/1",
        "https://open.test/1",
        "https://blocked.test/2",
    ]);

    let results = dispatcher.run_batch(tasks, fetcher.clone()).await;
    let results = by_url(&results);

    assert_eq!(results.len(), 3);
    assert_eq!(fetcher.fetches_for("blocked.test"), 0);
    for url in ["https://blocked.test/1", "https://blocked.test/2"] {
        let result = results[url];
        assert_eq!(result.failure, Some(FailureKind::PolicyDisallowed));
        assert_eq!(result.attempts, 0);
    }
    assert!(results["https://open.test/1"].success);
}

#[tokio::test(start_paused = true)]
async fn test_stream_and_batch_agree() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(3)).unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let urls = [
        "https://a.test/1",
        "https://a.test/2",
        "https://b.test/1",
        "https://c.test/1",
    ];

    let mut stream = dispatcher.run_stream(descriptors(&urls), fetcher.clone());
    assert_eq!(stream.size_hint(), (4, Some(4)));
    let mut streamed = HashSet::new();
    while let Some(result) = stream.next().await {
        assert!(result.success);
        streamed.insert(result.url.to_string());
    }

    let batched: HashSet<String> = dispatcher
        .run_batch(descriptors(&urls), fetcher)
        .await
        .into_iter()
        .map(|r| r.url.to_string())
        .collect();

    assert_eq!(streamed, batched);
    assert_eq!(streamed.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stream_registry_tracks_run() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(2)).unwrap();
    let mut stream = dispatcher.run_stream(spread(3), Arc::new(ScriptedFetcher::default()));

    assert_eq!(stream.registry().len(), 3);
    while stream.next().await.is_some() {}

    let counts = stream.registry().counts();
    assert_eq!(counts.succeeded, 3);
    assert_eq!(counts.retired(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_terminal() {
    let mut config = create_test_config(1);
    config.dispatcher.per_task_timeout = Some(0.5);
    let dispatcher = SemaphoreDispatcher::new(&config).unwrap();

    let results = dispatcher
        .run_batch(descriptors(&["https://slow.test/"]), Arc::new(SlowFetcher))
        .await;

    let result = &results[0];
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert_eq!(result.attempts, 1);
    assert!(result.error_message.starts_with("Timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counted_as_rate_limit() {
    let mut config = create_test_config(1);
    config.dispatcher.per_task_timeout = Some(0.5);
    config.dispatcher.timeout_status = Some(429);
    config.rate_limit.max_retries = 1;
    let dispatcher = SemaphoreDispatcher::new(&config).unwrap();

    let results = dispatcher
        .run_batch(descriptors(&["https://slow.test/"]), Arc::new(SlowFetcher))
        .await;

    let result = &results[0];
    assert_eq!(result.failure, Some(FailureKind::RateLimitExceeded));
    assert_eq!(result.attempts, 2);
    assert_eq!(result.status_code, Some(429));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_retires_queued_tasks() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(1)).unwrap();
    let counter = Arc::new(CountingFetcher::new(Duration::from_secs(1)));
    let mut stream = dispatcher.run_stream(spread(5), counter.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    stream.cancel();

    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        results.push(result);
    }

    assert_eq!(results.len(), 5);
    let cancelled = results
        .iter()
        .filter(|r| r.failure == Some(FailureKind::Cancelled))
        .count();
    assert_eq!(cancelled, 4);
    assert_eq!(results.iter().filter(|r| r.success).count(), 1);
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_dispatcher_runs_nothing() {
    let dispatcher = SemaphoreDispatcher::new(&create_test_config(2)).unwrap();
    dispatcher.cancellation_token().cancel();
    let fetcher = Arc::new(ScriptedFetcher::default());

    let results = dispatcher.run_batch(spread(3), fetcher.clone()).await;

    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| r.failure == Some(FailureKind::Cancelled) && r.attempts == 0));
    assert!(fetcher.fetched.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetcher_panic_becomes_failure() {
    struct Exploding;

    #[async_trait]
    impl Fetcher for Exploding {
        async fn fetch(&self, descriptor: &TaskDescriptor) -> FetchOutcome {
            if descriptor.url().path() == "/boom" {
                panic!("kaboom");
            }
            FetchOutcome::success(200)
        }
    }

    let dispatcher = SemaphoreDispatcher::new(&create_test_config(2)).unwrap();
    let results = dispatcher
        .run_batch(
            descriptors(&["https://a.test/boom", "https://b.test/fine"]),
            Arc::new(Exploding),
        )
        .await;
    let results = by_url(&results);

    let failed = results["https://a.test/boom"];
    assert_eq!(failed.failure, Some(FailureKind::Fetch));
    assert!(failed.error_message.contains("kaboom"));
    assert_eq!(failed.attempts, 1);
    assert!(results["https://b.test/fine"].success);
}

#[tokio::test(start_paused = true)]
async fn test_payload_passthrough() {
    struct Echo;

    #[async_trait]
    impl Fetcher for Echo {
        async fn fetch(&self, descriptor: &TaskDescriptor) -> FetchOutcome {
            let n = descriptor
                .payload()
                .and_then(|p| p.downcast_ref::<u32>())
                .copied()
                .unwrap_or_default();
            FetchOutcome::success(200).with_payload(Arc::new(format!("got {}", n)))
        }
    }

    let dispatcher = SemaphoreDispatcher::new(&create_test_config(1)).unwrap();
    let task = TaskDescriptor::parse("https://a.test/")
        .unwrap()
        .with_payload(Arc::new(7u32));

    let results = dispatcher.run_batch(vec![task], Arc::new(Echo)).await;

    assert_eq!(
        results[0].payload_as::<String>().map(String::as_str),
        Some("got 7")
    );
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_holds_admission_under_pressure() {
    let mut config = create_test_config(4);
    config.dispatcher.strategy = Strategy::MemoryAdaptive;
    config.dispatcher.memory_threshold_percent = 90.0;
    config.dispatcher.recovery_threshold_percent = Some(80.0);
    config.dispatcher.check_interval = 0.1;

    let sampler = Arc::new(SharedSampler::new(95.0));
    let dispatcher = MemoryAdaptiveDispatcher::new(&config)
        .unwrap()
        .with_memory_sampler(sampler.clone());
    let counter = Arc::new(CountingFetcher::new(Duration::from_millis(10)));

    let mut stream = dispatcher.run_stream(spread(5), counter.clone());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 0);

    // Between the thresholds: still paused
    sampler.set(85.0);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 0);

    sampler.set(50.0);
    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        results.push(result);
    }

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(counter.calls.load(Ordering::SeqCst), 5);
    assert_eq!(dispatcher.sample_memory().peak_percent, 95.0);
}

#[tokio::test(start_paused = true)]
async fn test_pressure_mid_run_spares_running_tasks() {
    let mut config = create_test_config(2);
    config.dispatcher.strategy = Strategy::MemoryAdaptive;
    config.dispatcher.memory_threshold_percent = 90.0;
    config.dispatcher.check_interval = 0.1;

    let sampler = Arc::new(SharedSampler::new(50.0));
    let dispatcher = MemoryAdaptiveDispatcher::new(&config)
        .unwrap()
        .with_memory_sampler(sampler.clone());
    let counter = Arc::new(CountingFetcher::new(Duration::from_secs(1)));

    let mut stream = dispatcher.run_stream(spread(4), counter.clone());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);

    // Above the threshold but below the critical level
    sampler.set(92.0);

    // Fetches already in flight finish normally
    for _ in 0..2 {
        let result = stream.next().await.expect("in-flight task result");
        assert!(result.success);
        assert_eq!(result.attempts, 1);
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(stream.registry().counts().queued, 2);

    sampler.set(50.0);
    let mut rest = Vec::new();
    while let Some(result) = stream.next().await {
        rest.push(result);
    }

    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|r| r.success));
    assert_eq!(counter.calls.load(Ordering::SeqCst), 4);
    assert!(counter.max_seen.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_critical_memory_parks_admitted_task() {
    let mut config = create_test_config(1);
    config.dispatcher.strategy = Strategy::MemoryAdaptive;
    config.dispatcher.memory_threshold_percent = 80.0;
    config.dispatcher.critical_threshold_percent = Some(90.0);
    config.dispatcher.check_interval = 0.1;
    config.rate_limit.base_delay = (0.5, 0.5);
    config.rate_limit.max_delay = 10.0;

    let sampler = Arc::new(SharedSampler::new(50.0));
    let dispatcher = MemoryAdaptiveDispatcher::new(&config)
        .unwrap()
        .with_memory_sampler(sampler.clone());
    let fetcher = Arc::new(ScriptedFetcher::default().with_script("a.test", &[429]));
    let tasks = descriptors(&["https://a.test/1", "https://b.test/1"]);
    let parked = tasks[0].id();

    let mut stream = dispatcher.run_stream(tasks, fetcher.clone());

    // a.test is rate limited at 0.5s and backs off until 2.0s
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(fetcher.fetches_for("a.test"), 1);
    sampler.set(93.0);

    tokio::time::sleep(Duration::from_millis(1800)).await;
    let state = stream.registry().get(parked).unwrap();
    assert!(state.requeued);
    assert_eq!(state.requeues, 1);
    assert_eq!(state.status, TaskStatus::Running);
    assert_eq!(fetcher.fetches_for("a.test"), 1);
    assert_eq!(fetcher.fetches_for("b.test"), 0);

    sampler.set(50.0);
    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        results.push(result);
    }

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    assert!(!stream.registry().get(parked).unwrap().requeued);
    // The parked task kept its slot and finished before b.test was admitted
    assert_eq!(
        *fetcher.fetched.lock(),
        vec!["a.test".to_string(), "a.test".to_string(), "b.test".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_adaptive_respects_ceiling_without_pressure() {
    let mut config = create_test_config(3);
    config.dispatcher.strategy = Strategy::MemoryAdaptive;
    config.dispatcher.check_interval = 0.1;

    let dispatcher = MemoryAdaptiveDispatcher::new(&config)
        .unwrap()
        .with_memory_sampler(Arc::new(SharedSampler::new(40.0)));
    let counter = Arc::new(CountingFetcher::new(Duration::from_millis(50)));

    let results = dispatcher.run_batch(spread(12), counter.clone()).await;

    assert_eq!(results.len(), 12);
    assert!(counter.max_seen.load(Ordering::SeqCst) <= 3);
    // RSS never moves in this sampler
    assert!(results.iter().all(|r| r.memory_usage_mb == 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_live_monitor_redraws_in_place() {
    let mut config = create_test_config(1);
    config.monitor.enabled = true;
    config.monitor.refresh_interval = 0.5;
    config.monitor.color = false;

    let term = InMemoryTerm::new(40, 160);
    let progress =
        MultiProgress::with_draw_target(ProgressDrawTarget::term_like(Box::new(term.clone())));
    let dispatcher = SemaphoreDispatcher::new(&config)
        .unwrap()
        .with_progress(progress);
    let counter = Arc::new(CountingFetcher::new(Duration::from_secs(1)));

    let results = dispatcher.run_batch(spread(2), counter).await;
    assert_eq!(results.len(), 2);

    let screen = term.contents();
    assert_eq!(screen.matches("=== Ripple-Dispatch").count(), 1);
    assert!(screen.contains("2/2 done"));
}
