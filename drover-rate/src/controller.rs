//! The rate controller contract and construction context

use std::time::Duration;

use async_trait::async_trait;

use drover_messaging::TestSpec;
use drover_stats::SharedCollector;

use crate::error::RateControlError;
use crate::registry::RateControllerRegistry;

/// Sleeps shorter than this are noise and are skipped.
pub(crate) const MIN_SLEEP_MS: f64 = 5.0;

/// Paces transaction submission for one worker in one round.
///
/// `apply_rate_control` is called once before every submission and may
/// suspend the caller; `end` is called exactly once when the round finishes
/// and flushes any controller-held state.
#[async_trait]
pub trait RateController: Send {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError>;

    async fn end(&mut self) -> Result<(), RateControlError>;
}

/// Everything a controller factory needs: the per-worker round spec, the
/// live statistics collector, the worker's index, and the registry itself
/// (for controllers that wrap other controllers).
pub struct FactoryArgs<'a> {
    pub spec: &'a TestSpec,
    pub stats: SharedCollector,
    pub worker_index: u64,
    pub registry: &'a RateControllerRegistry,
}

/// Non-blocking timed sleep used by every controller. Fractional
/// milliseconds below the floor are skipped.
pub(crate) async fn sleep_millis(ms: f64) {
    if ms < MIN_SLEEP_MS {
        return;
    }
    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
}

/// Parse a controller's option object, mapping malformed input to an
/// eager construction error. An absent `opts` counts as an empty object so
/// fully-defaulted controllers need no configuration.
pub(crate) fn parse_options<T: serde::de::DeserializeOwned>(
    controller: &str,
    opts: &serde_json::Value,
) -> Result<T, RateControlError> {
    let opts = if opts.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        opts.clone()
    };
    serde_json::from_value(opts)
        .map_err(|e| RateControlError::invalid_options(controller, e.to_string()))
}
