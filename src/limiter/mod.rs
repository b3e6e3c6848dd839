//! Per-domain courtesy pacing and exponential backoff
//!
//! Every request to a domain waits a random courtesy delay drawn from the base
//! range, including the first one. Responses whose status is in the configured
//! rate-limit set double the domain's delay (plus fresh jitter, capped at
//! `max_delay`) until the domain has failed more than `max_retries` times in a
//! row, at which point the limiter gives up. Any other response resets the
//! domain to the base range.
//!
//! Domain states live in a sharded `DashMap`: a shard lock is held only while a
//! state is updated, never across the wait itself.

mod domain_state;
mod headers;

pub use domain_state::DomainState;
pub use headers::retry_hint;

use crate::config::{validate_rate_limit_config, RateLimitConfig};
use crate::ConfigError;
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Outcome of feeding a response to the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Normal response, proceed with the result
    Ok,
    /// Rate limited, try again after at least this delay
    RetryAfter(Duration),
    /// Rate limited too many times in a row, retire the task
    GiveUp,
}

/// Read-only view of one domain's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSnapshot {
    pub current_delay: Duration,
    pub fail_count: u32,
}

/// Rate limiter shared by all tasks of one dispatcher
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    domains: DashMap<String, DomainState>,
}

impl RateLimiter {
    /// Creates a rate limiter after validating its configuration
    pub fn new(config: RateLimitConfig) -> Result<Self, ConfigError> {
        validate_rate_limit_config(&config)?;
        Ok(Self {
            config,
            domains: DashMap::new(),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns how long to wait before the next request to `domain`
    ///
    /// Each call reserves a request slot, so callers must sleep for the returned
    /// duration before issuing their request.
    pub fn admit(&self, domain: &str) -> Duration {
        self.admit_at(domain, Instant::now())
    }

    fn admit_at(&self, domain: &str, now: Instant) -> Duration {
        let mut state = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(self.draw_base_delay()));

        let wait = state.reserve_slot(now);
        tracing::trace!(
            "Domain {} admitted after {:?} (current delay {:?})",
            domain,
            wait,
            state.current_delay
        );
        wait
    }

    /// Updates the domain's state from a response status and decides what to do next
    ///
    /// # Arguments
    ///
    /// * `domain` - The domain that answered
    /// * `status` - The response status code
    /// * `headers` - Response headers, consulted for server-provided retry hints
    pub fn on_response(
        &self,
        domain: &str,
        status: u16,
        headers: &HashMap<String, String>,
    ) -> RateLimitDecision {
        let mut state = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(self.draw_base_delay()));

        if !self.config.is_rate_limit_code(status) {
            state.record_success(self.draw_base_delay());
            return RateLimitDecision::Ok;
        }

        let failures = state.record_failure();
        if failures > self.config.max_retries {
            tracing::debug!(
                "Domain {} exceeded {} retries (status {})",
                domain,
                self.config.max_retries,
                status
            );
            return RateLimitDecision::GiveUp;
        }

        let backoff = state
            .current_delay
            .saturating_mul(2)
            .saturating_add(self.draw_base_delay());
        let hinted = retry_hint(headers, unix_now()).unwrap_or(Duration::ZERO);
        let next = backoff.max(hinted).min(self.config.max_delay());

        // Never shrink during a run of failures
        state.current_delay = next.max(state.current_delay);

        tracing::debug!(
            "Domain {} rate limited (status {}, failure {}), backing off to {:?}",
            domain,
            status,
            failures,
            state.current_delay
        );
        RateLimitDecision::RetryAfter(state.current_delay)
    }

    pub fn domain_snapshot(&self, domain: &str) -> Option<DomainSnapshot> {
        self.domains.get(domain).map(|state| DomainSnapshot {
            current_delay: state.current_delay,
            fail_count: state.fail_count,
        })
    }

    /// Draws a courtesy delay uniformly from the base range
    fn draw_base_delay(&self) -> Duration {
        let (min, max) = self.config.base_delay_range();
        if min >= max {
            return min;
        }
        let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::try_from_secs_f64(secs).unwrap_or(min)
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
