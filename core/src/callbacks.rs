//! Event sinks and transition callbacks
//!
//! The handler reports what it does through an [`EventSink`]. The default
//! [`NullSink`] discards everything; [`TracingSink`] forwards events to
//! `tracing`. Phase changes additionally fire the [`Callbacks`] hooks.

use crate::classifier::FailureClass;
use crate::state::{Phase, StateSnapshot};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Named events emitted by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A call was refused because the circuit is tripped
    HandleRefused,
    /// The trip status was evaluated at the start of a call
    TripCheck,
    OnSuccess,
    OnFailure,
    /// The refusal error is being returned to the caller
    OnCircuitOpen,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::HandleRefused => "handle_refused",
            EventKind::TripCheck => "trip_check",
            EventKind::OnSuccess => "on_success",
            EventKind::OnFailure => "on_failure",
            EventKind::OnCircuitOpen => "on_circuit_open",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits the handler evaluates a circuit against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Threshold of the configured trip strategy
    pub failure_threshold: f64,
    /// Configured cooldown before a probe, before jitter
    pub failure_timeout: Duration,
    /// Set for strategies with a sample floor
    pub minimum_samples: Option<u64>,
}

/// Payload of an emitted event
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerEvent<'a> {
    pub kind: EventKind,
    pub circuit: &'a str,
    pub phase: Phase,
    pub failure_count: u64,
    pub call_count: u64,
    pub thresholds: Thresholds,
    /// Set on `on_failure`
    pub failure_class: Option<&'a FailureClass>,
    /// Set on `on_failure`: whether the class is excluded from counting
    pub excluded: bool,
}

impl<'a> HandlerEvent<'a> {
    pub(crate) fn new(
        kind: EventKind,
        circuit: &'a str,
        snapshot: &StateSnapshot,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            kind,
            circuit,
            phase: snapshot.phase,
            failure_count: snapshot.failure_count,
            call_count: snapshot.call_count,
            thresholds,
            failure_class: None,
            excluded: false,
        }
    }

    pub(crate) fn with_failure(mut self, class: &'a FailureClass, excluded: bool) -> Self {
        self.failure_class = Some(class);
        self.excluded = excluded;
        self
    }
}

/// Receives handler events; formatting and routing are up to the implementor
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: &HandlerEvent<'_>);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &HandlerEvent<'_>) {}
}

/// Forwards events to `tracing` as structured fields
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &HandlerEvent<'_>) {
        let class = event.failure_class.map(FailureClass::as_str);
        match event.kind {
            EventKind::OnCircuitOpen => tracing::warn!(
                event = event.kind.as_str(),
                circuit = event.circuit,
                phase = event.phase.as_str(),
                failure_count = event.failure_count,
                call_count = event.call_count,
                threshold = event.thresholds.failure_threshold,
                failure_timeout = ?event.thresholds.failure_timeout,
                "circuit open, refusing call"
            ),
            _ => tracing::debug!(
                event = event.kind.as_str(),
                circuit = event.circuit,
                phase = event.phase.as_str(),
                failure_count = event.failure_count,
                call_count = event.call_count,
                threshold = event.thresholds.failure_threshold,
                failure_timeout = ?event.thresholds.failure_timeout,
                minimum_samples = event.thresholds.minimum_samples,
                failure_class = class,
                excluded = event.excluded,
                "circuit event"
            ),
        }
    }
}

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F)
where
    F: Fn(&HandlerEvent<'_>) + Send + Sync;

impl<F> EventSink for FnSink<F>
where
    F: Fn(&HandlerEvent<'_>) + Send + Sync,
{
    fn emit(&self, event: &HandlerEvent<'_>) {
        (self.0)(event)
    }
}

impl<F> fmt::Debug for FnSink<F>
where
    F: Fn(&HandlerEvent<'_>) + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnSink").field(&"<closure>").finish()
    }
}

/// Callbacks for circuit phase transitions
#[derive(Clone)]
pub struct Callbacks {
    pub on_open: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_close: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_half_open: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self {
            on_open: None,
            on_close: None,
            on_half_open: None,
        }
    }

    /// Fire the hook matching the phase a circuit just entered
    pub fn trigger(&self, entered: Phase, circuit: &str) {
        let callback = match entered {
            Phase::Open => &self.on_open,
            Phase::Closed => &self.on_close,
            Phase::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = callback {
            callback(circuit);
        }
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
