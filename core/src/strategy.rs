//! Trip strategies
//!
//! A strategy looks at the counters of a circuit and answers whether the
//! circuit should be considered tripped. Strategies never mutate state.

use crate::failure_state::FailureState;

/// Default minimum number of calls before the percentage strategy is evaluated
pub const DEFAULT_MINIMUM_SAMPLES: u64 = 3;

/// Decides whether a circuit should open given its counters
///
/// # Examples
///
/// ```rust
/// use circuit_guard::{FailureState, TripStrategy};
///
/// #[derive(Debug)]
/// struct NeverTrip;
///
/// impl TripStrategy for NeverTrip {
///     fn is_tripped(&self, _state: &FailureState) -> bool {
///         false
///     }
/// }
///
/// assert!(!NeverTrip.is_tripped(&FailureState::new()));
/// ```
pub trait TripStrategy: Send + Sync + std::fmt::Debug {
    fn is_tripped(&self, state: &FailureState) -> bool;

    /// Threshold reported alongside emitted events
    fn threshold(&self) -> f64 {
        0.0
    }

    /// Calls required before the strategy is evaluated, if it has such a floor
    fn minimum_samples(&self) -> Option<u64> {
        None
    }
}

/// Trips once the failure count exceeds `threshold`
///
/// A threshold of 0 trips on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountStrategy {
    pub threshold: u64,
}

impl CountStrategy {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl TripStrategy for CountStrategy {
    fn is_tripped(&self, state: &FailureState) -> bool {
        state.failure_count() > self.threshold
    }

    fn threshold(&self) -> f64 {
        self.threshold as f64
    }
}

/// Trips when the failure ratio exceeds `threshold`, once more than
/// `minimum_samples` calls have been counted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentageStrategy {
    /// Failure ratio in (0, 1]
    pub threshold: f64,
    pub minimum_samples: u64,
}

impl PercentageStrategy {
    pub fn new(threshold: f64) -> Self {
        Self::with_minimum_samples(threshold, DEFAULT_MINIMUM_SAMPLES)
    }

    pub fn with_minimum_samples(threshold: f64, minimum_samples: u64) -> Self {
        Self {
            threshold,
            minimum_samples,
        }
    }
}

impl TripStrategy for PercentageStrategy {
    fn is_tripped(&self, state: &FailureState) -> bool {
        if state.call_count() <= self.minimum_samples {
            return false;
        }

        state
            .failure_ratio()
            .is_some_and(|ratio| ratio > self.threshold)
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn minimum_samples(&self) -> Option<u64> {
        Some(self.minimum_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_strategy_strictly_greater() {
        let strategy = CountStrategy::new(5);

        assert!(!strategy.is_tripped(&FailureState::with_counts(5, 5)));
        assert!(strategy.is_tripped(&FailureState::with_counts(6, 6)));
    }

    #[test]
    fn test_count_strategy_zero_threshold_trips_on_first_failure() {
        let strategy = CountStrategy::new(0);

        assert!(!strategy.is_tripped(&FailureState::new()));
        assert!(strategy.is_tripped(&FailureState::with_counts(1, 1)));
    }

    #[test]
    fn test_percentage_strategy_below_minimum_never_trips() {
        let strategy = PercentageStrategy::with_minimum_samples(0.5, 3);

        assert!(!strategy.is_tripped(&FailureState::with_counts(2, 2)));
        // call_count must exceed the minimum, not just reach it
        assert!(!strategy.is_tripped(&FailureState::with_counts(3, 3)));
    }

    #[test]
    fn test_percentage_strategy_trips_above_ratio() {
        let strategy = PercentageStrategy::with_minimum_samples(0.5, 3);

        assert!(strategy.is_tripped(&FailureState::with_counts(6, 10)));
        assert!(!strategy.is_tripped(&FailureState::with_counts(5, 10)));
    }

    #[test]
    fn test_percentage_strategy_default_minimum() {
        let strategy = PercentageStrategy::new(0.25);

        assert_eq!(strategy.minimum_samples, DEFAULT_MINIMUM_SAMPLES);
        assert!(strategy.is_tripped(&FailureState::with_counts(2, 4)));
    }

    #[test]
    fn test_reported_minimum_samples() {
        let percentage: &dyn TripStrategy = &PercentageStrategy::with_minimum_samples(0.5, 8);
        let count: &dyn TripStrategy = &CountStrategy::new(5);

        assert_eq!(percentage.minimum_samples(), Some(8));
        assert_eq!(count.minimum_samples(), None);
    }

    #[test]
    fn test_percentage_strategy_no_calls() {
        let strategy = PercentageStrategy::with_minimum_samples(0.1, 0);
        assert!(!strategy.is_tripped(&FailureState::new()));
    }
}
