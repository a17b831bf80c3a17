//! Deserializable handler settings
//!
//! Mirrors the knobs of [`HandlerBuilder`] in a plain data shape that can be
//! read from any serde format. Durations are given in seconds.
//!
//! ```rust
//! use circuit_guard::HandlerSettings;
//!
//! let settings: HandlerSettings = serde_json::from_str(r#"{
//!     "failure_timeout_secs": 10,
//!     "invocation_timeout_secs": 2.5,
//!     "excluded_failure_classes": ["not_found"],
//!     "strategy": { "kind": "percentage", "threshold": 0.5 }
//! }"#).unwrap();
//!
//! let handler = settings.into_builder("inventory").unwrap().build().unwrap();
//! assert_eq!(handler.config().invocation_timeout.as_millis(), 2500);
//! ```

use crate::builder::HandlerBuilder;
use crate::errors::ConfigError;
use crate::handler::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_FAILURE_TIMEOUT, DEFAULT_INVOCATION_TIMEOUT};
use crate::strategy::{CountStrategy, DEFAULT_MINIMUM_SAMPLES};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Trip strategy selection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySettings {
    Count {
        threshold: u64,
    },
    Percentage {
        threshold: f64,
        #[serde(default = "default_minimum_samples")]
        minimum_samples: u64,
    },
}

/// Handler configuration as read from a settings source
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandlerSettings {
    pub failure_threshold: u64,
    pub failure_timeout_secs: f64,
    pub invocation_timeout_secs: f64,
    pub jitter_factor: f64,
    pub excluded_failure_classes: Vec<String>,
    /// Defaults to a count strategy over `failure_threshold`
    pub strategy: Option<StrategySettings>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_timeout_secs: DEFAULT_FAILURE_TIMEOUT.as_secs_f64(),
            invocation_timeout_secs: DEFAULT_INVOCATION_TIMEOUT.as_secs_f64(),
            jitter_factor: 0.0,
            excluded_failure_classes: Vec::new(),
            strategy: None,
        }
    }
}

fn default_minimum_samples() -> u64 {
    DEFAULT_MINIMUM_SAMPLES
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

impl HandlerSettings {
    /// Convert into a builder; the builder still validates on `build()`
    pub fn into_builder(self, name: impl Into<String>) -> Result<HandlerBuilder, ConfigError> {
        let mut builder = HandlerBuilder::new(name)
            .failure_threshold(self.failure_threshold)
            .failure_timeout(seconds("failure_timeout_secs", self.failure_timeout_secs)?)
            .invocation_timeout(seconds(
                "invocation_timeout_secs",
                self.invocation_timeout_secs,
            )?)
            .jitter_factor(self.jitter_factor);

        for class in self.excluded_failure_classes {
            builder = builder.exclude(class);
        }

        builder = match self.strategy {
            None => builder,
            Some(StrategySettings::Count { threshold }) => {
                builder.strategy(Arc::new(CountStrategy::new(threshold)))
            }
            Some(StrategySettings::Percentage {
                threshold,
                minimum_samples,
            }) => builder.failure_rate(threshold, minimum_samples),
        };

        Ok(builder)
    }
}
