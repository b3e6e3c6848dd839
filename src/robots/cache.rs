//! Per-run cache of robots policy decisions

use crate::robots::{PolicyDecision, RobotsChecker};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// A decision together with the time it was made
#[derive(Debug, Clone, Copy)]
pub struct CachedDecision {
    pub decision: PolicyDecision,
    pub checked_at: DateTime<Utc>,
}

/// Asks the checker at most once per domain
///
/// A cache lives exactly as long as one dispatcher run, so a changed
/// robots.txt is picked up by the next run.
pub struct PolicyCache {
    checker: Arc<dyn RobotsChecker>,
    decisions: DashMap<String, CachedDecision>,
}

impl PolicyCache {
    pub fn new(checker: Arc<dyn RobotsChecker>) -> Self {
        Self {
            checker,
            decisions: DashMap::new(),
        }
    }

    /// Returns the decision for `domain`, consulting the checker on a miss
    pub async fn check(&self, domain: &str) -> PolicyDecision {
        if let Some(cached) = self.cached(domain) {
            return cached;
        }

        let decision = self.checker.check(domain).await;
        if decision == PolicyDecision::Disallowed {
            tracing::warn!("Robots policy disallows {}", domain);
        } else {
            tracing::debug!("Robots policy allows {}", domain);
        }

        self.decisions.insert(
            domain.to_string(),
            CachedDecision {
                decision,
                checked_at: Utc::now(),
            },
        );
        decision
    }

    pub fn cached(&self, domain: &str) -> Option<PolicyDecision> {
        self.decisions.get(domain).map(|entry| entry.decision)
    }

    pub fn get(&self, domain: &str) -> Option<CachedDecision> {
        self.decisions.get(domain).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}
