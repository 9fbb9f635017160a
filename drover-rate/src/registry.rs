//! Eagerly validating rate controller registry
//!
//! The built-in set is closed and explicit; out-of-tree controllers can be
//! registered before the registry is shared for a run. Construction failures
//! (unknown name, malformed options) surface here, before the round starts.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use drover_messaging::TestSpec;
use drover_stats::SharedCollector;

use crate::controller::{FactoryArgs, RateController};
use crate::error::RateControlError;

type Factory =
    Arc<dyn for<'a> Fn(FactoryArgs<'a>) -> Result<Box<dyn RateController>, RateControlError> + Send + Sync>;

/// Maps controller names to their factories.
pub struct RateControllerRegistry {
    factories: HashMap<String, Factory>,
}

impl RateControllerRegistry {
    /// A registry holding exactly the built-in controllers.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        let builtins: [(&str, Factory); 10] = [
            ("fixed-rate", Arc::new(crate::fixed_rate::create)),
            ("fixed-load", Arc::new(crate::fixed_load::create)),
            ("fixed-backlog", Arc::new(crate::fixed_backlog::create)),
            ("fixed-feedback-rate", Arc::new(crate::fixed_feedback::create)),
            ("linear-rate", Arc::new(crate::linear_rate::create)),
            ("maximum-rate", Arc::new(crate::max_rate::create)),
            ("zero-rate", Arc::new(crate::zero_rate::create)),
            ("composite-rate", Arc::new(crate::composite::create)),
            ("record-rate", Arc::new(crate::record::create)),
            ("replay-rate", Arc::new(crate::replay::create)),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Register an out-of-tree controller. Must happen before the registry
    /// is shared for a run; duplicate names are rejected.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl for<'a> Fn(FactoryArgs<'a>) -> Result<Box<dyn RateController>, RateControlError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), RateControlError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RateControlError::DuplicateController(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// The registered controller names, for diagnostics.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the controller named by the round specification, bound to
    /// the given statistics collector.
    pub fn create(
        &self,
        spec: &TestSpec,
        stats: SharedCollector,
        worker_index: u64,
    ) -> Result<Box<dyn RateController>, RateControlError> {
        spec.validate()?;

        let name = spec.rate_control.controller_type.as_str();
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RateControlError::UnknownController(name.to_string()))?;

        debug!(
            controller = name,
            worker = worker_index,
            round = spec.round_index,
            "creating rate controller"
        );
        factory(FactoryArgs {
            spec,
            stats,
            worker_index,
            registry: self,
        })
    }
}

impl Default for RateControllerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
