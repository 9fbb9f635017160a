//! Rate controllers for drover workers
//!
//! A rate controller decides, transaction by transaction, how long the
//! worker waits before the next submission. Controllers are selected per
//! round through the [`RateControllerRegistry`] by the name carried in the
//! round specification and read the live statistics collector rather than
//! being pushed updates.
//!
//! Built-in controllers: `fixed-rate`, `fixed-load`, `fixed-backlog`,
//! `fixed-feedback-rate`, `linear-rate`, `maximum-rate`, `zero-rate`,
//! `composite-rate`, `record-rate`, `replay-rate`.

pub mod composite;
pub mod controller;
pub mod error;
pub mod fixed_backlog;
pub mod fixed_feedback;
pub mod fixed_load;
pub mod fixed_rate;
pub mod linear_rate;
pub mod max_rate;
pub mod record;
pub mod registry;
pub mod replay;
pub mod trace;
pub mod zero_rate;

pub use controller::{FactoryArgs, RateController};
pub use error::RateControlError;
pub use registry::RateControllerRegistry;
pub use trace::TraceFormat;
