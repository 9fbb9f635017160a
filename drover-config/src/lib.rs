//! Configuration layer for drover
//!
//! Typed configuration domains with serde-yaml loading, environment-variable
//! overrides and eager validation. Components receive their domain structs by
//! value; nothing reads global state after startup.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use domains::communication::{CommunicationConfig, CommunicationMethod};
pub use domains::observer::ObserverConfig;
pub use domains::workers::{WorkerLaunchConfig, WorkersConfig};
pub use domains::DroverConfig;
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str};
pub use validation::Validatable;
