use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Main configuration structure for Ripple-Dispatch
///
/// Every section is optional; missing sections and keys take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
}

/// Admission strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Strategy {
    /// Fixed concurrency ceiling
    #[serde(rename = "semaphore")]
    Semaphore,
    /// Concurrency ceiling gated by system memory pressure
    #[serde(rename = "memory-adaptive")]
    #[default]
    MemoryAdaptive,
}

/// Admission control configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Which admission strategy the binary builds
    #[serde(default)]
    pub strategy: Strategy,

    /// Maximum number of tasks executing at once
    #[serde(rename = "max-session-permit", default = "default_max_session_permit")]
    pub max_session_permit: u32,

    /// System memory percentage above which new admissions pause
    #[serde(
        rename = "memory-threshold-percent",
        default = "default_memory_threshold"
    )]
    pub memory_threshold_percent: f64,

    /// Percentage at or below which paused admissions resume (defaults to the threshold)
    #[serde(rename = "recovery-threshold-percent", default)]
    pub recovery_threshold_percent: Option<f64>,

    /// Percentage at or above which admitted tasks give their slot back before fetching
    /// (defaults to 95, or the memory threshold if that is higher)
    #[serde(rename = "critical-threshold-percent", default)]
    pub critical_threshold_percent: Option<f64>,

    /// Memory sampling interval in seconds
    #[serde(rename = "check-interval", default = "default_check_interval")]
    pub check_interval: f64,

    /// Timeout applied to each fetch attempt, in seconds
    #[serde(rename = "per-task-timeout", default)]
    pub per_task_timeout: Option<f64>,

    /// Status code a timed out attempt is accounted as by the rate limiter
    #[serde(rename = "timeout-status", default)]
    pub timeout_status: Option<u16>,
}

/// Per-domain pacing and backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Courtesy delay range `[min, max]` in seconds
    #[serde(rename = "base-delay", default = "default_base_delay")]
    pub base_delay: (f64, f64),

    /// Upper bound for the backoff delay in seconds
    #[serde(rename = "max-delay", default = "default_max_delay")]
    pub max_delay: f64,

    /// Consecutive rate-limited responses tolerated per domain
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Status codes that trigger backoff
    #[serde(rename = "rate-limit-codes", default = "default_rate_limit_codes")]
    pub rate_limit_codes: BTreeSet<u16>,
}

/// Live monitor display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DisplayMode {
    /// One row per task
    #[serde(rename = "detailed")]
    #[default]
    Detailed,
    /// Counts per status and run-wide statistics
    #[serde(rename = "aggregated")]
    Aggregated,
}

/// Live monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Whether the render loop runs at all
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "display-mode", default)]
    pub display_mode: DisplayMode,

    /// Maximum task rows in detailed mode
    #[serde(rename = "max-visible-rows", default = "default_max_visible_rows")]
    pub max_visible_rows: usize,

    /// Seconds between frames
    #[serde(rename = "refresh-interval", default = "default_refresh_interval")]
    pub refresh_interval: f64,

    /// Colour status labels; ignored when stderr is not a terminal
    #[serde(default = "default_color")]
    pub color: bool,
}

/// User agent identification for the HTTP adapters
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name", default = "default_crawler_name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version", default = "default_crawler_version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url", default)]
    pub contact_url: Option<String>,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email", default)]
    pub contact_email: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: f64,
}

/// Robots policy configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RobotsConfig {
    /// Consult robots.txt before admitting a domain's tasks
    #[serde(default)]
    pub respect: bool,
}

fn default_max_session_permit() -> u32 {
    20
}

fn default_memory_threshold() -> f64 {
    90.0
}

const DEFAULT_CRITICAL_THRESHOLD: f64 = 95.0;

fn default_check_interval() -> f64 {
    1.0
}

fn default_base_delay() -> (f64, f64) {
    (1.0, 3.0)
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_rate_limit_codes() -> BTreeSet<u16> {
    [429, 503].into_iter().collect()
}

fn default_max_visible_rows() -> usize {
    15
}

fn default_refresh_interval() -> f64 {
    1.0
}

fn default_color() -> bool {
    true
}

fn default_crawler_name() -> String {
    "RippleDispatch".to_string()
}

fn default_crawler_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_request_timeout() -> f64 {
    30.0
}

/// Largest accepted duration setting, in seconds (one week)
pub(crate) const MAX_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

/// Converts validated seconds into a Duration
///
/// Out-of-range input is clamped into `0..=MAX_SECONDS`; NaN becomes zero.
pub(crate) fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SECONDS)).unwrap_or(Duration::ZERO)
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_session_permit: default_max_session_permit(),
            memory_threshold_percent: default_memory_threshold(),
            recovery_threshold_percent: None,
            critical_threshold_percent: None,
            check_interval: default_check_interval(),
            per_task_timeout: None,
            timeout_status: None,
        }
    }
}

impl DispatcherConfig {
    pub fn check_interval(&self) -> Duration {
        seconds(self.check_interval)
    }

    pub fn per_task_timeout(&self) -> Option<Duration> {
        self.per_task_timeout.map(seconds)
    }

    /// The level at or below which a paused admission loop resumes
    pub fn recovery_threshold(&self) -> f64 {
        self.recovery_threshold_percent
            .unwrap_or(self.memory_threshold_percent)
    }

    pub fn critical_threshold(&self) -> f64 {
        self.critical_threshold_percent
            .unwrap_or_else(|| DEFAULT_CRITICAL_THRESHOLD.max(self.memory_threshold_percent))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_retries: default_max_retries(),
            rate_limit_codes: default_rate_limit_codes(),
        }
    }
}

impl RateLimitConfig {
    pub fn base_delay_range(&self) -> (Duration, Duration) {
        (seconds(self.base_delay.0), seconds(self.base_delay.1))
    }

    pub fn max_delay(&self) -> Duration {
        seconds(self.max_delay)
    }

    pub fn is_rate_limit_code(&self, status: u16) -> bool {
        self.rate_limit_codes.contains(&status)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            display_mode: DisplayMode::default(),
            max_visible_rows: default_max_visible_rows(),
            refresh_interval: default_refresh_interval(),
            color: default_color(),
        }
    }
}

impl MonitorConfig {
    pub fn refresh_interval(&self) -> Duration {
        seconds(self.refresh_interval)
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: default_crawler_name(),
            crawler_version: default_crawler_version(),
            contact_url: None,
            contact_email: None,
            request_timeout: default_request_timeout(),
        }
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        let contacts: Vec<String> = [
            self.contact_url.as_ref().map(|u| format!("+{}", u)),
            self.contact_email.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if contacts.is_empty() {
            format!("{}/{}", self.crawler_name, self.crawler_version)
        } else {
            format!(
                "{}/{} ({})",
                self.crawler_name,
                self.crawler_version,
                contacts.join("; ")
            )
        }
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout)
    }
}
