//! Worker pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domains::utils::serde_millis;
use crate::error::{ConfigError, ConfigResult};
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// How the manager launches local worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerLaunchConfig {
    /// Program to execute for each worker.
    pub program: String,
    /// Arguments passed to every worker process.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of workers expected to participate.
    pub number: u64,
    /// Workers already run elsewhere (e.g. containers); do not spawn any.
    pub remote: bool,
    /// Interval between `register` broadcasts while waiting for workers.
    #[serde(with = "serde_millis")]
    pub poll_interval: Duration,
    /// Launch settings; required unless `remote` is set.
    pub launch: Option<WorkerLaunchConfig>,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            number: 1,
            remote: false,
            poll_interval: default_poll_interval(),
            launch: None,
        }
    }
}

impl Validatable for WorkersConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.number, "number", self.domain_name())?;
        validate_positive(
            self.poll_interval.as_millis() as u64,
            "poll_interval",
            self.domain_name(),
        )?;

        match (&self.launch, self.remote) {
            (Some(launch), _) => {
                validate_required_string(&launch.program, "launch.program", self.domain_name())
            }
            (None, true) => Ok(()),
            (None, false) => Err(ConfigError::domain(
                self.domain_name(),
                "launch settings are required unless workers are remote",
            )),
        }
    }

    fn domain_name(&self) -> &'static str {
        "workers"
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(5_000)
}
