//! Circuit phase machine
//!
//! Three phases with a fixed transition table:
//!
//! | Event           | From                | To       |
//! |-----------------|---------------------|----------|
//! | `trip`          | `Closed`,`HalfOpen` | `Open`   |
//! | `attempt_reset` | `Open`              | `HalfOpen` |
//! | `reset`         | `Open`,`HalfOpen`   | `Closed` |
//!
//! Any other request fails with [`InvalidTransition`] and leaves the phase
//! untouched. `reset` zeroes the failure count as part of the same step.

use crate::errors::InvalidTransition;
use crate::failure_state::FailureState;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Phase of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Closed => "closed",
            Phase::Open => "open",
            Phase::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that move a circuit between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Trip,
    AttemptReset,
    Reset,
}

impl Transition {
    /// Phases this event may fire from
    pub fn allowed_from(self) -> &'static [Phase] {
        match self {
            Transition::Trip => &[Phase::Closed, Phase::HalfOpen],
            Transition::AttemptReset => &[Phase::Open],
            Transition::Reset => &[Phase::Open, Phase::HalfOpen],
        }
    }

    pub fn target(self) -> Phase {
        match self {
            Transition::Trip => Phase::Open,
            Transition::AttemptReset => Phase::HalfOpen,
            Transition::Reset => Phase::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Trip => "trip",
            Transition::AttemptReset => "attempt_reset",
            Transition::Reset => "reset",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a circuit, read under one lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub failure_count: u64,
    pub call_count: u64,
    pub last_failure_time: Option<Instant>,
}

/// Unsynchronized machine; always accessed through [`CircuitState`]'s lock
#[derive(Debug, Default)]
pub(crate) struct Machine {
    phase: Phase,
    pub(crate) failures: FailureState,
    opened_at: Option<Instant>,
    /// Cooldown drawn when the circuit last tripped
    cooldown: Option<Duration>,
    probe: Option<u64>,
    next_probe: u64,
}

impl Machine {
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply `event` if the table allows it from the current phase
    pub(crate) fn fire(&mut self, event: Transition) -> Result<(), InvalidTransition> {
        if !event.allowed_from().contains(&self.phase) {
            return Err(InvalidTransition {
                event,
                from: self.phase,
            });
        }

        self.phase = event.target();
        // Every transition closes the current probe window
        self.probe = None;

        match event {
            Transition::Trip => self.opened_at = Some(Instant::now()),
            Transition::AttemptReset => {}
            Transition::Reset => {
                self.failures.reset_failures();
                self.opened_at = None;
                self.cooldown = None;
            }
        }

        Ok(())
    }

    pub(crate) fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = Some(cooldown);
    }

    #[cfg(test)]
    pub(crate) fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    /// Whether an open circuit has waited long enough to admit a probe
    ///
    /// Measured from the last counted failure, or from the trip itself when
    /// the circuit was opened without one.
    pub(crate) fn cooldown_elapsed(&self, default_cooldown: Duration, now: Instant) -> bool {
        let cooldown = self.cooldown.unwrap_or(default_cooldown);
        match self.failures.last_failure_time().or(self.opened_at) {
            Some(since) => now.saturating_duration_since(since) >= cooldown,
            None => true,
        }
    }

    /// Take the half-open probe slot, if nobody holds it
    pub(crate) fn claim_probe(&mut self) -> Option<u64> {
        if self.phase != Phase::HalfOpen || self.probe.is_some() {
            return None;
        }

        self.next_probe = self.next_probe.wrapping_add(1);
        self.probe = Some(self.next_probe);
        self.probe
    }

    /// Whether `id` is the slot of the current half-open window
    pub(crate) fn holds_probe(&self, id: Option<u64>) -> bool {
        id.is_some() && self.probe == id
    }

    pub(crate) fn release_probe(&mut self, id: u64) {
        if self.probe == Some(id) {
            self.probe = None;
        }
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            phase: self.phase,
            failure_count: self.failures.failure_count(),
            call_count: self.failures.call_count(),
            last_failure_time: self.failures.last_failure_time(),
        }
    }

    fn clear(&mut self) {
        *self = Machine {
            next_probe: self.next_probe,
            ..Machine::default()
        };
    }
}

/// Phase and counters for one guarded subject
///
/// Each instance carries its own lock, so independent circuits never contend.
/// Create one per subject, usually through
/// [`CircuitHandler::new_circuit_state`](crate::CircuitHandler::new_circuit_state).
#[derive(Debug, Default)]
pub struct CircuitState {
    machine: Mutex<Machine>,
}

impl CircuitState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.phase() == Phase::HalfOpen
    }

    pub fn failure_count(&self) -> u64 {
        self.lock().failures.failure_count()
    }

    pub fn call_count(&self) -> u64 {
        self.lock().failures.call_count()
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.lock().failures.last_failure_time()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.lock().snapshot()
    }

    /// Open the circuit (from `Closed` or `HalfOpen`)
    pub fn trip(&self) -> Result<(), InvalidTransition> {
        self.lock().fire(Transition::Trip)
    }

    /// Move an open circuit to `HalfOpen`
    pub fn attempt_reset(&self) -> Result<(), InvalidTransition> {
        self.lock().fire(Transition::AttemptReset)
    }

    /// Close the circuit (from `Open` or `HalfOpen`) and zero the failure count
    pub fn reset(&self) -> Result<(), InvalidTransition> {
        self.lock().fire(Transition::Reset)
    }

    pub fn increment_failure(&self) {
        self.lock().failures.increment_failure();
    }

    pub fn increment_call(&self) {
        self.lock().failures.increment_call();
    }

    pub fn reset_failures(&self) {
        self.lock().failures.reset_failures();
    }

    pub fn reset_counts(&self) {
        self.lock().failures.reset_all();
    }

    /// Force the circuit back to a fresh `Closed` state with all counters zeroed
    ///
    /// Bypasses the transition table; meant for administrative resets.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Holds the half-open probe slot for the lifetime of one admitted call
///
/// Dropping it frees the slot, so a probe whose caller goes away does not
/// leave the circuit stuck refusing every call.
#[derive(Debug)]
pub(crate) struct ProbeSlot<'a> {
    state: &'a CircuitState,
    id: u64,
}

impl<'a> ProbeSlot<'a> {
    pub(crate) fn new(state: &'a CircuitState, id: u64) -> Self {
        Self { state, id }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.state.lock().release_probe(self.id);
    }
}
