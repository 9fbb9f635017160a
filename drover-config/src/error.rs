//! Configuration error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading a configuration file
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Environment variable override with an unusable value
    #[error("Environment override {variable} is invalid: {message}")]
    EnvOverride { variable: String, message: String },

    /// Domain-specific validation error
    #[error("Invalid configuration in {domain}: {message}")]
    Domain { domain: String, message: String },
}

impl ConfigError {
    pub fn domain(domain: &str, message: impl Into<String>) -> Self {
        ConfigError::Domain {
            domain: domain.to_string(),
            message: message.into(),
        }
    }
}
