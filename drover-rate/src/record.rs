//! Record-rate controller
//!
//! Decorates another controller and records the wall-clock offset (relative
//! to the round start) at which every transaction was allowed to proceed.
//! The trace is flushed to disk when the round ends and can be fed back
//! through the replay controller.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use drover_messaging::{RateControlSpec, RoundTarget, TestSpec};
use drover_stats::{locked, now_millis, SharedCollector};

use crate::controller::{parse_options, FactoryArgs, RateController};
use crate::error::RateControlError;
use crate::trace::{resolve_path_template, write_trace, TraceFormat};

const NAME: &str = "record-rate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordOptions {
    path_template: String,
    rate_controller: RateControlSpec,
    #[serde(default)]
    output_format: Option<String>,
}

/// Records the submission schedule produced by a delegate controller.
pub struct RecordRate {
    stats: SharedCollector,
    delegate: Box<dyn RateController>,
    records: Vec<u32>,
    path: PathBuf,
    format: TraceFormat,
    worker_index: u64,
    round_index: u64,
}

impl RecordRate {
    pub fn new(args: FactoryArgs<'_>) -> Result<Self, RateControlError> {
        let options: RecordOptions = parse_options(NAME, &args.spec.rate_control.opts)?;
        let format = TraceFormat::resolve(options.output_format.as_deref());
        let path = PathBuf::from(resolve_path_template(
            &options.path_template,
            args.spec.round_index,
            args.worker_index,
        ));

        // Known count targets let the record array be sized up front.
        let records = match args.spec.target()? {
            RoundTarget::TxCount(count) => vec![0u32; count as usize],
            RoundTarget::Duration(_) => Vec::new(),
        };

        let mut delegate_spec: TestSpec = args.spec.clone();
        delegate_spec.rate_control = options.rate_controller;
        let delegate =
            args.registry
                .create(&delegate_spec, args.stats.clone(), args.worker_index)?;

        Ok(Self {
            stats: args.stats,
            delegate,
            records,
            path,
            format,
            worker_index: args.worker_index,
            round_index: args.spec.round_index,
        })
    }
}

#[async_trait]
impl RateController for RecordRate {
    async fn apply_rate_control(&mut self) -> Result<(), RateControlError> {
        self.delegate.apply_rate_control().await?;

        let (index, round_start) = {
            let stats = locked(&self.stats);
            (stats.total_submitted() as usize, stats.round_start_time())
        };
        let offset = now_millis().saturating_sub(round_start).min(u32::MAX as u64) as u32;
        if index < self.records.len() {
            self.records[index] = offset;
        } else {
            self.records.push(offset);
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RateControlError> {
        self.delegate.end().await?;
        write_trace(&self.path, self.format, &self.records)?;
        debug!(
            worker = self.worker_index,
            round = self.round_index,
            path = %self.path.display(),
            entries = self.records.len(),
            "recorded TX submission times"
        );
        Ok(())
    }
}

pub(crate) fn create(args: FactoryArgs<'_>) -> Result<Box<dyn RateController>, RateControlError> {
    Ok(Box::new(RecordRate::new(args)?))
}
