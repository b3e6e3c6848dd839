use std::time::Duration;
use tokio::time::Instant;

/// Tracks the pacing and backoff state of one domain
///
/// Created lazily the first time a domain is admitted and kept for the
/// lifetime of the rate limiter.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Delay enforced between consecutive requests to this domain
    pub current_delay: Duration,

    /// Consecutive rate-limited responses since the last normal response
    pub fail_count: u32,

    /// When the most recently reserved request is allowed to start
    pub last_slot: Option<Instant>,
}

impl DomainState {
    /// Creates a state whose first request waits `initial_delay`
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            current_delay: initial_delay,
            fail_count: 0,
            last_slot: None,
        }
    }

    /// Reserves the next request slot and returns how long to wait for it
    ///
    /// Slots are spaced `current_delay` apart, and the very first request waits
    /// the full delay as well. Concurrent callers each get their own slot.
    pub fn reserve_slot(&mut self, now: Instant) -> Duration {
        let earliest = match self.last_slot {
            Some(last) => last + self.current_delay,
            None => now + self.current_delay,
        };
        let slot = earliest.max(now);
        self.last_slot = Some(slot);
        slot - now
    }

    /// Records a rate-limited response, returning the new failure count
    pub fn record_failure(&mut self) -> u32 {
        self.fail_count += 1;
        self.fail_count
    }

    /// Records a normal response: failures reset and pacing returns to `base_delay`
    pub fn record_success(&mut self, base_delay: Duration) {
        self.fail_count = 0;
        self.current_delay = base_delay;
    }
}
