//! Statistics for a finished run
//!
//! Built from the results a run handed back, so they match what the caller
//! received rather than the live registry.

use crate::task::{DispatchResult, FailureKind};
use std::collections::{BTreeMap, HashSet};

/// Run statistics summary
#[derive(Debug, Clone)]
pub struct RunStatistics {
    /// Number of results
    pub total: usize,

    pub succeeded: usize,
    pub failed: usize,

    /// Failed results by failure kind
    pub failures_by_kind: BTreeMap<FailureKind, usize>,

    /// Failed results by domain
    pub failures_by_domain: BTreeMap<String, usize>,

    /// Domains that exhausted their rate limit budget
    pub rate_limited_domains: Vec<String>,

    /// Number of distinct domains
    pub unique_domains: usize,

    /// Fetch attempts across all tasks
    pub total_attempts: u64,

    /// Mean time from start to retirement over executed tasks
    pub average_duration: chrono::Duration,

    /// Largest per-task memory peak in MB
    pub peak_memory_mb: f64,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            failures_by_kind: BTreeMap::new(),
            failures_by_domain: BTreeMap::new(),
            rate_limited_domains: Vec::new(),
            unique_domains: 0,
            total_attempts: 0,
            average_duration: chrono::Duration::zero(),
            peak_memory_mb: 0.0,
        }
    }
}

impl RunStatistics {
    pub fn from_results(results: &[DispatchResult]) -> Self {
        let mut stats = Self {
            total: results.len(),
            ..Self::default()
        };

        let mut domains = HashSet::new();
        let mut executed: i32 = 0;
        let mut total_duration = chrono::Duration::zero();

        for result in results {
            domains.insert(result.domain.as_str());
            stats.total_attempts += u64::from(result.attempts);
            stats.peak_memory_mb = stats.peak_memory_mb.max(result.peak_memory_mb);

            if result.attempts > 0 {
                executed += 1;
                total_duration = total_duration + result.duration();
            }

            if result.success {
                stats.succeeded += 1;
                continue;
            }

            stats.failed += 1;
            let kind = result.failure.unwrap_or(FailureKind::Fetch);
            *stats.failures_by_kind.entry(kind).or_insert(0) += 1;
            *stats
                .failures_by_domain
                .entry(result.domain.clone())
                .or_insert(0) += 1;

            if kind == FailureKind::RateLimitExceeded
                && !stats.rate_limited_domains.contains(&result.domain)
            {
                stats.rate_limited_domains.push(result.domain.clone());
            }
        }

        stats.unique_domains = domains.len();
        if executed > 0 {
            stats.average_duration = total_duration / executed;
        }
        stats.rate_limited_domains.sort();
        stats
    }

    /// Percentage of results that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Dispatch Statistics ===\n");

    println!("Overview:");
    println!("  Tasks: {}", stats.total);
    println!("  Unique domains: {}", stats.unique_domains);
    println!("  Fetch attempts: {}", stats.total_attempts);
    println!(
        "  Average task time: {:.2}s",
        stats.average_duration.num_milliseconds() as f64 / 1000.0
    );
    println!("  Peak task memory: {:.1} MB", stats.peak_memory_mb);
    println!();

    if !stats.failures_by_kind.is_empty() {
        println!("Failures by Kind:");
        let mut kinds: Vec<_> = stats.failures_by_kind.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1));
        for (kind, count) in kinds {
            println!("  {}: {}", kind, count);
        }
        println!();
    }

    if !stats.failures_by_domain.is_empty() {
        println!("Failures by Domain:");
        let mut domains: Vec<_> = stats.failures_by_domain.iter().collect();
        domains.sort_by(|a, b| b.1.cmp(a.1));
        for (domain, count) in domains {
            println!("  {}: {}", domain, count);
        }
        println!();
    }

    if !stats.rate_limited_domains.is_empty() {
        println!(
            "Rate Limited Domains ({}):",
            stats.rate_limited_domains.len()
        );
        for domain in &stats.rate_limited_domains {
            println!("  - {}", domain);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} tasks succeeded)",
        stats.success_rate(),
        stats.succeeded,
        stats.total
    );
}
