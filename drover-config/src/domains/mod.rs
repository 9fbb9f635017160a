//! Configuration domains

pub mod communication;
pub mod observer;
pub mod utils;
pub mod workers;

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// The full harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub communication: communication::CommunicationConfig,
    pub workers: workers::WorkersConfig,
    pub observer: observer::ObserverConfig,
}

impl Validatable for DroverConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.communication.validate()?;
        self.workers.validate()?;
        self.observer.validate()?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "drover"
    }
}
