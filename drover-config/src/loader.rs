//! Configuration loading: YAML file, then environment overrides, then
//! eager validation.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::domains::communication::CommunicationMethod;
use crate::domains::DroverConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::validation::Validatable;

const ENV_COMMUNICATION_METHOD: &str = "DROVER_COMMUNICATION_METHOD";
const ENV_COMMUNICATION_ADDRESS: &str = "DROVER_COMMUNICATION_ADDRESS";
const ENV_WORKERS_NUMBER: &str = "DROVER_WORKERS_NUMBER";
const ENV_WORKERS_POLL_INTERVAL_MS: &str = "DROVER_WORKERS_POLL_INTERVAL_MS";
const ENV_OBSERVER_UPDATE_INTERVAL_MS: &str = "DROVER_OBSERVER_UPDATE_INTERVAL_MS";

/// Load and validate configuration from a YAML file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<DroverConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    debug!(path = %path.as_ref().display(), "loading configuration");
    load_config_str(&raw)
}

/// Parse and validate configuration from a YAML string.
pub fn load_config_str(raw: &str) -> ConfigResult<DroverConfig> {
    let mut config: DroverConfig = serde_yaml::from_str(raw)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn env_override(variable: &'static str) -> Option<String> {
    std::env::var(variable).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(variable: &'static str, value: &str) -> ConfigResult<T> {
    value.parse::<T>().map_err(|_| ConfigError::EnvOverride {
        variable: variable.to_string(),
        message: format!("cannot parse \"{value}\""),
    })
}

fn apply_env_overrides(config: &mut DroverConfig) -> ConfigResult<()> {
    if let Some(method) = env_override(ENV_COMMUNICATION_METHOD) {
        config.communication.method = match method.to_lowercase().as_str() {
            "process" => CommunicationMethod::Process,
            "mqtt" => CommunicationMethod::Mqtt,
            other => {
                return Err(ConfigError::EnvOverride {
                    variable: ENV_COMMUNICATION_METHOD.to_string(),
                    message: format!("unknown method \"{other}\""),
                })
            }
        };
    }
    if let Some(address) = env_override(ENV_COMMUNICATION_ADDRESS) {
        config.communication.address = address;
    }
    if let Some(number) = env_override(ENV_WORKERS_NUMBER) {
        config.workers.number = parse_env(ENV_WORKERS_NUMBER, &number)?;
    }
    if let Some(interval) = env_override(ENV_WORKERS_POLL_INTERVAL_MS) {
        config.workers.poll_interval =
            Duration::from_millis(parse_env(ENV_WORKERS_POLL_INTERVAL_MS, &interval)?);
    }
    if let Some(interval) = env_override(ENV_OBSERVER_UPDATE_INTERVAL_MS) {
        config.observer.update_interval =
            Duration::from_millis(parse_env(ENV_OBSERVER_UPDATE_INTERVAL_MS, &interval)?);
    }
    Ok(())
}
