//! Manager/worker communication configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

/// Which messenger binding the run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationMethod {
    /// Stdio pipes between the manager and its spawned workers.
    #[default]
    Process,
    /// An MQTT broker shared by all participants.
    Mqtt,
}

/// Communication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    /// Transport binding to use.
    pub method: CommunicationMethod,
    /// Broker address; only meaningful for the MQTT binding.
    pub address: String,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            method: CommunicationMethod::Process,
            address: default_broker_address(),
        }
    }
}

impl Validatable for CommunicationConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.method == CommunicationMethod::Mqtt {
            validate_required_string(&self.address, "address", self.domain_name())?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "communication"
    }
}

fn default_broker_address() -> String {
    "mqtt://localhost:1883".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommunicationConfig::default();
        assert_eq!(config.method, CommunicationMethod::Process);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mqtt_requires_address() {
        let config = CommunicationConfig {
            method: CommunicationMethod::Mqtt,
            address: " ".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_method_parses_lowercase() {
        let config: CommunicationConfig =
            serde_yaml::from_str("method: mqtt\naddress: mqtt://broker:1883\n").unwrap();
        assert_eq!(config.method, CommunicationMethod::Mqtt);
    }
}
