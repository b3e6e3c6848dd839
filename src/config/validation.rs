use crate::config::types::{
    Config, DispatcherConfig, MonitorConfig, RateLimitConfig, UserAgentConfig, MAX_SECONDS,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_dispatcher_config(&config.dispatcher)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_monitor_config(&config.monitor)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

/// Validates admission control configuration
pub(crate) fn validate_dispatcher_config(config: &DispatcherConfig) -> Result<(), ConfigError> {
    if config.max_session_permit < 1 {
        return Err(ConfigError::Validation(format!(
            "max_session_permit must be >= 1, got {}",
            config.max_session_permit
        )));
    }

    let threshold = config.memory_threshold_percent;
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 100.0 {
        return Err(ConfigError::Validation(format!(
            "memory_threshold_percent must be in (0, 100], got {}",
            threshold
        )));
    }

    if let Some(recovery) = config.recovery_threshold_percent {
        if !recovery.is_finite() || recovery < 0.0 || recovery > threshold {
            return Err(ConfigError::Validation(format!(
                "recovery_threshold_percent must be between 0 and memory_threshold_percent ({}), got {}",
                threshold, recovery
            )));
        }
    }

    if let Some(critical) = config.critical_threshold_percent {
        if !critical.is_finite() || critical < threshold || critical > 100.0 {
            return Err(ConfigError::Validation(format!(
                "critical_threshold_percent must be between memory_threshold_percent ({}) and 100, got {}",
                threshold, critical
            )));
        }
    }

    validate_positive_seconds("check_interval", config.check_interval)?;

    if let Some(timeout) = config.per_task_timeout {
        validate_positive_seconds("per_task_timeout", timeout)?;
    }

    if let Some(status) = config.timeout_status {
        validate_status_code(status)?;
    }

    Ok(())
}

/// Validates rate limiter configuration
pub(crate) fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    let (min, max) = config.base_delay;

    validate_non_negative_seconds("base_delay.min", min)?;
    validate_non_negative_seconds("base_delay.max", max)?;

    if min > max {
        return Err(ConfigError::Validation(format!(
            "base_delay min ({}s) must not exceed max ({}s)",
            min, max
        )));
    }

    validate_non_negative_seconds("max_delay", config.max_delay)?;

    if config.max_delay < max {
        return Err(ConfigError::Validation(format!(
            "max_delay ({}s) must be >= base_delay max ({}s)",
            config.max_delay, max
        )));
    }

    if config.rate_limit_codes.is_empty() {
        return Err(ConfigError::Validation(
            "rate_limit_codes cannot be empty".to_string(),
        ));
    }

    for &code in &config.rate_limit_codes {
        validate_status_code(code)?;
    }

    Ok(())
}

/// Validates live monitor configuration
pub(crate) fn validate_monitor_config(config: &MonitorConfig) -> Result<(), ConfigError> {
    if config.max_visible_rows < 1 {
        return Err(ConfigError::Validation(
            "max_visible_rows must be >= 1".to_string(),
        ));
    }

    validate_positive_seconds("refresh_interval", config.refresh_interval)
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    validate_positive_seconds("request_timeout", config.request_timeout)
}

fn validate_non_negative_seconds(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        )));
    }
    validate_seconds_ceiling(name, value)
}

fn validate_positive_seconds(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} must be a positive number of seconds, got {}",
            name, value
        )));
    }
    validate_seconds_ceiling(name, value)
}

fn validate_seconds_ceiling(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > MAX_SECONDS {
        return Err(ConfigError::Validation(format!(
            "{} must be at most {} seconds, got {}",
            name, MAX_SECONDS, value
        )));
    }
    Ok(())
}

fn validate_status_code(code: u16) -> Result<(), ConfigError> {
    if !(100..=599).contains(&code) {
        return Err(ConfigError::Validation(format!(
            "Status code {} is outside the HTTP range 100-599",
            code
        )));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    // Basic email format check: must contain @ and have text on both sides
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
