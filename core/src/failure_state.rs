//! Raw failure counters owned by a circuit

use tokio::time::Instant;

/// Counters tracked for one circuit.
///
/// Not synchronized on its own; it is only ever touched through the lock
/// held by the owning [`CircuitState`](crate::CircuitState).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureState {
    failure_count: u64,
    call_count: u64,
    last_failure_time: Option<Instant>,
}

impl FailureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures counted since the last reset
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Invocations admitted since the last full reset
    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    /// When the most recent counted failure happened
    pub fn last_failure_time(&self) -> Option<Instant> {
        self.last_failure_time
    }

    /// Count a failure and stamp it with the current time
    pub fn increment_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(Instant::now());
    }

    pub fn increment_call(&mut self) {
        self.call_count = self.call_count.saturating_add(1);
    }

    /// Zero the failure count, keeping the call count
    pub fn reset_failures(&mut self) {
        self.failure_count = 0;
    }

    /// Zero both counters
    pub fn reset_all(&mut self) {
        self.failure_count = 0;
        self.call_count = 0;
    }

    /// Ratio of failures to calls, `None` before any call was counted
    pub fn failure_ratio(&self) -> Option<f64> {
        if self.call_count == 0 {
            None
        } else {
            Some(self.failure_count as f64 / self.call_count as f64)
        }
    }

    #[cfg(test)]
    pub(crate) fn with_counts(failure_count: u64, call_count: u64) -> Self {
        Self {
            failure_count,
            call_count,
            last_failure_time: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_failure_time(&mut self, at: Option<Instant>) {
        self.last_failure_time = at;
    }

    #[cfg(test)]
    pub(crate) fn set_failure_count(&mut self, count: u64) {
        self.failure_count = count;
    }
}
