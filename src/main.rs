//! Ripple-Dispatch main entry point
//!
//! Fetches a list of URLs politely: bounded concurrency, per-domain pacing and
//! backoff, optional robots.txt filtering, and an optional live monitor.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use ripple_dispatch::config::{load_config_with_hash, Config, Strategy};
use ripple_dispatch::http::{build_http_client, HttpFetcher};
use ripple_dispatch::report::{print_statistics, RunStatistics};
use ripple_dispatch::robots::HttpRobotsChecker;
use ripple_dispatch::{
    Dispatcher, Fetcher, MemoryAdaptiveDispatcher, RobotsChecker, SemaphoreDispatcher,
    TaskDescriptor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Ripple-Dispatch: a polite concurrency dispatcher for bulk fetches
///
/// Reads one URL per line and fetches them all, respecting a concurrency
/// ceiling, memory pressure, per-domain rate limits and robots.txt.
#[derive(Parser, Debug)]
#[command(name = "ripple-dispatch")]
#[command(version)]
#[command(about = "A polite concurrency dispatcher for bulk fetches", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// File with one URL per line ('#' starts a comment)
    #[arg(value_name = "URLS")]
    urls: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and URLs and show what would be fetched
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    let descriptors = read_targets(&cli.urls)?;

    if cli.dry_run {
        handle_dry_run(&config, &descriptors);
        return Ok(());
    }

    handle_dispatch(config, descriptors).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_dispatch=info,warn"),
            1 => EnvFilter::new("ripple_dispatch=debug,info"),
            2 => EnvFilter::new("ripple_dispatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads the URL list, skipping blank lines, comments and invalid URLs
fn read_targets(path: &Path) -> Result<Vec<TaskDescriptor>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;

    let mut descriptors = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match TaskDescriptor::parse(line) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => tracing::warn!("Skipping line {}: {} ({})", number + 1, line, e),
        }
    }

    tracing::info!("Loaded {} targets from {}", descriptors.len(), path.display());
    Ok(descriptors)
}

/// Handles the --dry-run mode: shows the plan without fetching anything
fn handle_dry_run(config: &Config, descriptors: &[TaskDescriptor]) {
    println!("=== Ripple-Dispatch Dry Run ===\n");

    println!("Dispatcher:");
    println!("  Strategy: {:?}", config.dispatcher.strategy);
    println!("  Max session permit: {}", config.dispatcher.max_session_permit);
    if config.dispatcher.strategy == Strategy::MemoryAdaptive {
        println!(
            "  Memory threshold: {:.1}% (resume at {:.1}%)",
            config.dispatcher.memory_threshold_percent,
            config.dispatcher.recovery_threshold()
        );
        println!(
            "  Critical threshold: {:.1}% (admitted tasks requeue)",
            config.dispatcher.critical_threshold()
        );
        println!("  Check interval: {}s", config.dispatcher.check_interval);
    }
    match config.dispatcher.per_task_timeout {
        Some(timeout) => println!("  Per-task timeout: {}s", timeout),
        None => println!("  Per-task timeout: none"),
    }

    println!("\nRate Limit:");
    println!(
        "  Base delay: {}s - {}s",
        config.rate_limit.base_delay.0, config.rate_limit.base_delay.1
    );
    println!("  Max delay: {}s", config.rate_limit.max_delay);
    println!("  Max retries: {}", config.rate_limit.max_retries);
    println!("  Rate limit codes: {:?}", config.rate_limit.rate_limit_codes);

    println!("\nUser Agent: {}", config.user_agent.header_value());
    println!("Respect robots.txt: {}", config.robots.respect);
    println!(
        "Live monitor: {} ({:?})",
        config.monitor.enabled, config.monitor.display_mode
    );

    let mut domains: Vec<&str> = descriptors.iter().map(|d| d.domain()).collect();
    domains.sort_unstable();
    domains.dedup();
    println!("\nTargets: {} URLs across {} domains", descriptors.len(), domains.len());
    for domain in domains {
        let count = descriptors.iter().filter(|d| d.domain() == domain).count();
        println!("  - {} ({} URLs)", domain, count);
    }

    println!("\n✓ Configuration is valid");
}

/// Runs the configured dispatcher over every target
async fn handle_dispatch(config: Config, descriptors: Vec<TaskDescriptor>) -> Result<()> {
    // One connection pool serves both page and robots.txt requests
    let client = build_http_client(&config.user_agent).context("Failed to build HTTP client")?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::with_client(client.clone()));

    let robots: Option<Arc<dyn RobotsChecker>> = if config.robots.respect {
        Some(Arc::new(HttpRobotsChecker::with_client(
            client,
            &config.user_agent,
        )))
    } else {
        None
    };

    let (dispatcher, cancel): (Box<dyn Dispatcher>, CancellationToken) =
        match config.dispatcher.strategy {
            Strategy::Semaphore => {
                let mut dispatcher = SemaphoreDispatcher::new(&config)?;
                if let Some(checker) = robots {
                    dispatcher = dispatcher.with_robots_checker(checker);
                }
                let cancel = dispatcher.cancellation_token();
                (Box::new(dispatcher), cancel)
            }
            Strategy::MemoryAdaptive => {
                let mut dispatcher = MemoryAdaptiveDispatcher::new(&config)?;
                if let Some(checker) = robots {
                    dispatcher = dispatcher.with_robots_checker(checker);
                }
                let cancel = dispatcher.cancellation_token();
                (Box::new(dispatcher), cancel)
            }
        };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight requests");
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let mut stream = dispatcher.run_stream(descriptors, fetcher);
    let mut results = Vec::new();

    while let Some(result) = stream.next().await {
        if result.success {
            tracing::info!(
                "OK   {} ({}, {} attempts)",
                result.url,
                result.status_code.unwrap_or_default(),
                result.attempts
            );
        } else {
            tracing::warn!("FAIL {}: {}", result.url, result.error_message);
        }
        results.push(result);
    }

    let stats = RunStatistics::from_results(&results);
    println!();
    print_statistics(&stats);
    println!("Wall time: {:.1}s", started.elapsed().as_secs_f64());

    Ok(())
}
