//! Configuration module for Ripple-Dispatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Dispatcher constructors validate the sections they use again, so a config built
//! in code is held to the same rules as one read from disk.
//!
//! # Example
//!
//! ```no_run
//! use ripple_dispatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("dispatch.toml")).unwrap();
//! println!("Max retries per domain: {}", config.rate_limit.max_retries);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DispatcherConfig, DisplayMode, MonitorConfig, RateLimitConfig, RobotsConfig,
    Strategy, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

pub(crate) use types::seconds;
pub(crate) use validation::{
    validate_dispatcher_config, validate_monitor_config, validate_rate_limit_config,
};
