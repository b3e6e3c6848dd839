//! Robots policy pre-filter
//!
//! Before a task is admitted, its domain may be checked against an external
//! policy. A disallowed domain's tasks retire immediately and are never
//! fetched. Decisions are cached per domain for one dispatcher run.

mod cache;
mod http;
mod rules;

pub use cache::{CachedDecision, PolicyCache};
pub use http::HttpRobotsChecker;
pub use rules::RobotsRules;

use async_trait::async_trait;
use std::fmt;

/// Whether a domain may be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed,
    Disallowed,
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "ALLOWED"),
            Self::Disallowed => write!(f, "DISALLOWED"),
        }
    }
}

/// External policy component consulted once per domain
///
/// Checkers cannot fail: an implementation that cannot reach its policy
/// source decides for itself which answer to give.
#[async_trait]
pub trait RobotsChecker: Send + Sync {
    async fn check(&self, domain: &str) -> PolicyDecision;
}
