use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates a TOML configuration file
///
/// Every section and key is optional; see [`Config`] for the defaults.
///
/// ```no_run
/// use ripple_dispatch::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("dispatch.toml")).unwrap();
/// assert!(config.dispatcher.max_session_permit > 0);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_hash(path).map(|(config, _)| config)
}

/// SHA-256 fingerprint of a configuration file, hex encoded
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    Ok(fingerprint(&std::fs::read_to_string(path)?))
}

/// Loads a configuration together with the fingerprint of the text it came from
///
/// The file is read once, so the hash always matches the parsed settings.
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = Config::from_toml_str(&content)?;
    Ok((config, fingerprint(&content)))
}

fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

impl Config {
    /// Parses and validates configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        validate(&config)?;
        Ok(config)
    }
}
