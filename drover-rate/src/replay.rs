//! Replay-rate controller
//!
//! Replays a previously recorded submission trace deterministically: before
//! each transaction it sleeps until the recorded offset for the current TX
//! index is reached. Past the end of the trace it falls back to a fixed
//! default sleep, logging the fallback once.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use drover_stats::{locked, now_millis, SharedCollector};

use crate::controller::{parse_options, sleep_millis, FactoryArgs, RateController};
use crate::error::RateControlError;
use crate::trace::{read_trace, resolve_path_template, TraceFormat};

const NAME: &str = "replay-rate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayOptions {
    path_template: String,
    #[serde(default)]
    input_format: Option<String>,
    #[serde(default = "default_sleep_time")]
    default_sleep_time: f64,
}

fn default_sleep_time() -> f64 {
    100.0
}

/// One pacing decision of the replay controller.
#[derive(Debug, PartialEq)]
enum ReplayStep {
    /// Sleep until the recorded offset (milliseconds remaining).
    Recorded(f64),
    /// The trace is exhausted; use the default sleep.
    Fallback,
}

/// Replays a recorded transaction schedule.
pub struct ReplayRate {
    stats: SharedCollector,
    records: Vec<u32>,
    default_sleep_ms: f64,
    exhausted_logged: bool,
    path: PathBuf,
    worker_index: u64,
}

impl ReplayRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: ReplayOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        let format = TraceFormat::resolve(options.input_format.as_deref());
        let path = PathBuf::from(resolve_path_template(
            &options.path_template,
            args.spec.round_index,
            args.worker_index,
        ));

        // A missing trace is a construction-time resource error.
        let records = read_trace(&path, format)?;

        Ok(Self {
            stats: args.stats,
            records,
            default_sleep_ms: options.default_sleep_time,
            exhausted_logged: false,
            path,
            worker_index: args.worker_index,
        })
    }

    fn plan(&self, current_index: u64, elapsed_ms: u64) -> ReplayStep {
        match self.records.get(current_index as usize) {
            Some(offset) => ReplayStep::Recorded(*offset as f64 - elapsed_ms as f64),
            None => ReplayStep::Fallback,
        }
    }
}

#[async_trait]
impl RateController for ReplayRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        let (index, round_start) = {
            let stats = locked(&self.stats);
            (stats.total_submitted(), stats.round_start_time())
        };
        let elapsed = now_millis().saturating_sub(round_start);

        match self.plan(index, elapsed) {
            ReplayStep::Recorded(sleep) => sleep_millis(sleep).await,
            ReplayStep::Fallback => {
                if !self.exhausted_logged {
                    warn!(
                        worker = self.worker_index,
                        path = %self.path.display(),
                        default_sleep_ms = self.default_sleep_ms,
                        "trace exhausted, using default sleep from now on"
                    );
                    self.exhausted_logged = true;
                }
                sleep_millis(self.default_sleep_ms).await;
            }
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(ReplayRate::new(args)?))
}
