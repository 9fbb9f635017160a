//! TX observer configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domains::utils::serde_millis;
use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Configuration of the worker-side statistics observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Interval between `txUpdate` reports to the manager.
    #[serde(with = "serde_millis")]
    pub update_interval: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
        }
    }
}

impl Validatable for ObserverConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.update_interval.as_millis() as u64,
            "update_interval",
            self.domain_name(),
        )
    }

    fn domain_name(&self) -> &'static str {
        "observer"
    }
}

fn default_update_interval() -> Duration {
    Duration::from_millis(1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ObserverConfig::default();
        assert_eq!(config.update_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ObserverConfig {
            update_interval: Duration::ZERO,
        };
        assert!(config.validate().is_err());
    }
}
