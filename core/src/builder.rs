//! Builder API for ergonomic handler configuration

use crate::{
    callbacks::{Callbacks, EventSink, NullSink},
    classifier::{FailureClass, FailureClassifier, TypeMatcher, TypeNameClassifier},
    errors::ConfigError,
    handler::{CircuitHandler, Config},
    strategy::{CountStrategy, PercentageStrategy, TripStrategy},
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit handlers with fluent API
#[derive(Debug)]
pub struct HandlerBuilder {
    name: String,
    config: Config,
    strategy: Option<Arc<dyn TripStrategy>>,
    /// Ratio given to `failure_rate`, checked on build
    failure_rate: Option<f64>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    type_matchers: Vec<TypeMatcher>,
    excluded: HashSet<FailureClass>,
    sink: Option<Arc<dyn EventSink>>,
    callbacks: Callbacks,
}

impl HandlerBuilder {
    /// Create a new builder for a handler with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            strategy: None,
            failure_rate: None,
            classifier: None,
            type_matchers: Vec::new(),
            excluded: HashSet::new(),
            sink: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Set the failure threshold used by the default count strategy
    ///
    /// The circuit trips once the failure count exceeds this value, so 0
    /// trips on the first failure. Ignored when a strategy is set explicitly.
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the cooldown before an open circuit admits a probe
    pub fn failure_timeout(mut self, timeout: Duration) -> Self {
        self.config.failure_timeout = timeout;
        self
    }

    /// Set the maximum duration of a single call
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.config.invocation_timeout = timeout;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use a custom trip strategy
    pub fn strategy(mut self, strategy: Arc<dyn TripStrategy>) -> Self {
        self.strategy = Some(strategy);
        self.failure_rate = None;
        self
    }

    /// Trip on failure ratio (within (0, 1]) instead of an absolute count
    pub fn failure_rate(mut self, threshold: f64, minimum_samples: u64) -> Self {
        self.strategy = Some(Arc::new(PercentageStrategy::with_minimum_samples(
            threshold,
            minimum_samples,
        )));
        self.failure_rate = Some(threshold);
        self
    }

    /// Set a failure classifier that maps errors to [`FailureClass`]es
    ///
    /// # Examples
    ///
    /// ```rust
    /// use circuit_guard::{CircuitHandler, FailureClass, FailureContext, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// #[derive(Debug)]
    /// enum ApiError {
    ///     NotFound,
    ///     Unavailable,
    /// }
    ///
    /// let handler = CircuitHandler::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx: &FailureContext<'_>| {
    ///         match ctx.error.downcast_ref::<ApiError>() {
    ///             Some(ApiError::NotFound) => Some(FailureClass::from_static("not_found")),
    ///             _ => None,
    ///         }
    ///     })))
    ///     .exclude("not_found")
    ///     .build()
    ///     .unwrap();
    /// # let _ = ApiError::Unavailable;
    ///
    /// assert!(handler.is_excluded(&FailureClass::from_static("not_found")));
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Exclude a failure class from counting against the circuit
    pub fn exclude(mut self, class: impl Into<FailureClass>) -> Self {
        self.excluded.insert(class.into());
        self
    }

    /// Exclude every failure whose error is of type `T`
    ///
    /// Matches `T` returned directly and `T` inside a `Box<dyn Error>`,
    /// ahead of the configured classifier.
    pub fn exclude_type<T: std::error::Error + 'static>(mut self) -> Self {
        let matcher = TypeMatcher::of::<T>();
        self.excluded.insert(matcher.class().clone());
        self.type_matchers.push(matcher);
        self
    }

    /// Set the sink receiving handler events
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the handler
    pub fn build(self) -> Result<CircuitHandler, ConfigError> {
        self.config.validate()?;
        if let Some(rate) = self.failure_rate
            && !(rate > 0.0 && rate <= 1.0)
        {
            return Err(ConfigError::InvalidPercentage(rate));
        }

        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(CountStrategy::new(self.config.failure_threshold)));

        Ok(CircuitHandler {
            name: self.name,
            config: self.config,
            strategy,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(TypeNameClassifier)),
            type_matchers: self.type_matchers,
            excluded: self.excluded,
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            callbacks: self.callbacks,
        })
    }
}
