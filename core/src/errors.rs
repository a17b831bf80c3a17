//! Error types for circuit guard operations

use crate::state::{Phase, Transition};
use std::time::Duration;
use thiserror::Error;

/// Errors returned from a guarded call
#[derive(Debug, Error)]
pub enum CircuitError<E = Box<dyn std::error::Error + Send + Sync>> {
    /// Circuit refused the call without invoking the operation
    #[error("circuit '{circuit}' is {phase}, refusing call (failure count {failure_count})")]
    Open {
        circuit: String,
        phase: Phase,
        failure_count: u64,
    },
    /// The operation did not complete within the invocation timeout
    #[error("circuit '{circuit}' invocation timed out after {timeout:?}")]
    InvocationTimeout {
        circuit: String,
        timeout: Duration,
        #[source]
        source: tokio::time::error::Elapsed,
    },
    /// Outcome routing hit a transition the table does not allow
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CircuitError::InvocationTimeout { .. })
    }

    /// The operation's own error, if this is one
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// A transition was requested from a phase the table does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event '{event}' cannot transition from '{from}'")]
pub struct InvalidTransition {
    pub event: Transition,
    pub from: Phase,
}

/// Rejected handler configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invocation timeout must be greater than zero")]
    ZeroInvocationTimeout,
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("percentage threshold must be within (0, 1] (got {0})")]
    InvalidPercentage(f64),
    #[error("jitter factor must be within [0, 1] (got {0})")]
    InvalidJitter(f64),
    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),
}
