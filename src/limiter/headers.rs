//! Server-provided rate limit hints
//!
//! Understands `Retry-After` (RFC 7231), the IETF `RateLimit-*` draft headers,
//! and the common vendor variants (`X-RateLimit-*`, `X-Rate-Limit-*`,
//! `X-RateLimit-User*`, `X-RateLimit-UserPath*`). Reset values may be a delay in
//! seconds, a unix timestamp in seconds or milliseconds, or an HTTP-date.

use chrono::DateTime;
use std::collections::HashMap;
use std::time::Duration;

/// Vendor header pairs checked after the standard ones, in priority order
const REMAINING_RESET_PAIRS: [(&str, &str); 4] = [
    ("x-ratelimit-remaining", "x-ratelimit-reset"),
    ("x-rate-limit-remaining", "x-rate-limit-reset"),
    ("x-ratelimit-userremaining", "x-ratelimit-userreset"),
    ("x-ratelimit-userpathremaining", "x-ratelimit-userpathreset"),
];

/// Returns the delay a server asked for, if any
///
/// # Arguments
///
/// * `headers` - Response headers (names are matched case-insensitively)
/// * `now` - Current unix time in seconds
pub fn retry_hint(headers: &HashMap<String, String>, now: f64) -> Option<Duration> {
    if let Some(delay) = limit_delay(headers, "retry-after", now) {
        return Some(delay);
    }

    // A quota that is not used up means the reset is not a wait instruction
    match limit_value(headers, "ratelimit-remaining") {
        Some(remaining) if remaining > 0.0 => {}
        _ => {
            if let Some(delay) = limit_delay(headers, "ratelimit-reset", now) {
                return Some(delay);
            }
        }
    }

    REMAINING_RESET_PAIRS
        .iter()
        .find_map(|(remaining, reset)| remaining_reset(headers, now, remaining, reset))
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .or_else(|| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .map(|v| v.trim())
}

fn limit_value(headers: &HashMap<String, String>, name: &str) -> Option<f64> {
    header(headers, name)?.parse::<f64>().ok()
}

/// Converts a header into a positive delay relative to `now`
fn limit_delay(headers: &HashMap<String, String>, name: &str, now: f64) -> Option<Duration> {
    let value = header(headers, name)?;

    let seconds = match value.parse::<f64>() {
        Ok(mut delay) => {
            if delay > now {
                // Timestamp, possibly in milliseconds
                if delay / 1000.0 > now {
                    delay /= 1000.0;
                }
                delay - now
            } else {
                delay
            }
        }
        Err(_) => {
            let date = DateTime::parse_from_rfc2822(value).ok()?;
            date.timestamp() as f64 + f64::from(date.timestamp_subsec_millis()) / 1000.0 - now
        }
    };

    if seconds.is_finite() && seconds > 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}

fn remaining_reset(
    headers: &HashMap<String, String>,
    now: f64,
    remaining: &str,
    reset: &str,
) -> Option<Duration> {
    // A missing remaining header counts as quota left
    if limit_value(headers, remaining).unwrap_or(1.0) <= 0.0 {
        limit_delay(headers, reset, now)
    } else {
        None
    }
}
