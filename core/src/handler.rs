//! Invocation guard
//!
//! [`CircuitHandler`] is stateless policy plus configuration. It is applied to
//! one [`CircuitState`] per call: it decides whether the call may run, bounds
//! its duration, and routes the outcome back into the state.

use crate::{
    callbacks::{Callbacks, EventKind, EventSink, HandlerEvent, NullSink, Thresholds},
    classifier::{FailureClass, FailureClassifier, FailureContext, TypeMatcher, TypeNameClassifier},
    errors::{CircuitError, ConfigError, InvalidTransition},
    state::{CircuitState, Phase, ProbeSlot, StateSnapshot, Transition},
    strategy::{CountStrategy, TripStrategy},
};
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default number of failures tolerated before tripping
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;

/// Default cooldown before an open circuit admits a probe
pub const DEFAULT_FAILURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a single call may run
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Failures tolerated by the default count strategy (trips when exceeded)
    pub failure_threshold: u64,

    /// Cooldown after the last failure before a probe is admitted
    pub failure_timeout: Duration,

    /// Maximum wall-clock time granted to one call
    pub invocation_timeout: Duration,

    /// Jitter factor for failure_timeout (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_timeout: DEFAULT_FAILURE_TIMEOUT,
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invocation_timeout.is_zero() {
            return Err(ConfigError::ZeroInvocationTimeout);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }
        Ok(())
    }
}

/// Outcome of the admission step
enum Admission {
    Closed,
    Probe(u64),
    Refused,
}

/// Guards calls against one circuit state at a time
///
/// Usually shared (behind an `Arc`) by every subject of one kind, while each
/// subject owns its own [`CircuitState`].
#[derive(Debug)]
pub struct CircuitHandler {
    pub(crate) name: String,
    pub(crate) config: Config,
    pub(crate) strategy: Arc<dyn TripStrategy>,
    pub(crate) classifier: Arc<dyn FailureClassifier>,
    /// Checked before `classifier`
    pub(crate) type_matchers: Vec<TypeMatcher>,
    pub(crate) excluded: HashSet<FailureClass>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) callbacks: Callbacks,
}

impl CircuitHandler {
    /// Create a handler with default configuration (use builder() for more options)
    pub fn new(name: impl Into<String>) -> Self {
        let config = Config::default();
        Self {
            name: name.into(),
            strategy: Arc::new(CountStrategy::new(config.failure_threshold)),
            config,
            classifier: Arc::new(TypeNameClassifier),
            type_matchers: Vec::new(),
            excluded: HashSet::new(),
            sink: Arc::new(NullSink),
            callbacks: Callbacks::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> crate::builder::HandlerBuilder {
        crate::builder::HandlerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn strategy(&self) -> &dyn TripStrategy {
        self.strategy.as_ref()
    }

    pub fn is_excluded(&self, class: &FailureClass) -> bool {
        self.excluded.contains(class)
    }

    /// Limits reported with every emitted event
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            failure_threshold: self.strategy.threshold(),
            failure_timeout: self.config.failure_timeout,
            minimum_samples: self.strategy.minimum_samples(),
        }
    }

    /// Fresh state for a new subject guarded by this handler
    pub fn new_circuit_state(&self) -> CircuitState {
        CircuitState::new()
    }

    /// Whether the strategy considers `state` tripped right now
    pub fn is_failure_threshold_reached(&self, state: &CircuitState) -> bool {
        self.strategy.is_tripped(&state.lock().failures)
    }

    /// Whether the cooldown since the last failure has run out
    pub fn is_timeout_exceeded(&self, state: &CircuitState) -> bool {
        state
            .lock()
            .cooldown_elapsed(self.config.failure_timeout, Instant::now())
    }

    /// Run `operation` under circuit protection
    ///
    /// Returns the operation's own result or error, except when the circuit
    /// refuses the call ([`CircuitError::Open`]) or the call runs past the
    /// invocation timeout ([`CircuitError::InvocationTimeout`]). A timed-out
    /// operation is dropped at the deadline, so its late result is never seen.
    pub async fn handle<T, E, F, Fut>(
        &self,
        state: &CircuitState,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let probe = self.admit(state)?;
        let probe_id = probe.as_ref().map(ProbeSlot::id);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.config.invocation_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.on_success(state, probe_id)?;
                Ok(value)
            }
            Ok(Err(error)) => {
                let ctx = FailureContext {
                    circuit_name: &self.name,
                    error: &error as &dyn Any,
                    error_type: std::any::type_name::<E>(),
                    duration: started.elapsed(),
                };
                let class = self.classify(&ctx);
                self.on_failure(state, &class, probe_id)?;
                Err(CircuitError::Execution(error))
            }
            Err(elapsed) => {
                self.on_failure(state, &FailureClass::INVOCATION_TIMEOUT, probe_id)?;
                Err(CircuitError::InvocationTimeout {
                    circuit: self.name.clone(),
                    timeout: self.config.invocation_timeout,
                    source: elapsed,
                })
            }
        };

        drop(probe);
        result
    }

    /// Like [`handle`](Self::handle), passing `args` to the operation
    pub async fn handle_with<A, T, E, F, Fut>(
        &self,
        state: &CircuitState,
        operation: F,
        args: A,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        self.handle(state, move || operation(args)).await
    }

    /// Trip check: admit the call, move an expired open circuit to half-open,
    /// or refuse. Runs under the state lock so only one caller wins the probe.
    fn admit<'s, E>(
        &self,
        state: &'s CircuitState,
    ) -> Result<Option<ProbeSlot<'s>>, CircuitError<E>> {
        let mut machine = state.lock();

        let mut half_opened = false;
        if machine.phase() == Phase::Open
            && machine.cooldown_elapsed(self.config.failure_timeout, Instant::now())
        {
            machine.fire(Transition::AttemptReset)?;
            half_opened = true;
        }

        let admission = match machine.phase() {
            Phase::Closed => Admission::Closed,
            Phase::HalfOpen => machine
                .claim_probe()
                .map_or(Admission::Refused, Admission::Probe),
            Phase::Open => Admission::Refused,
        };
        if !matches!(admission, Admission::Refused) {
            machine.failures.increment_call();
        }

        let snapshot = machine.snapshot();
        drop(machine);

        if half_opened {
            tracing::debug!(circuit = %self.name, "circuit half-open, admitting probe");
            self.callbacks.trigger(Phase::HalfOpen, &self.name);
        }
        self.emit(EventKind::TripCheck, &snapshot);

        match admission {
            Admission::Closed => Ok(None),
            Admission::Probe(id) => Ok(Some(ProbeSlot::new(state, id))),
            Admission::Refused => {
                self.emit(EventKind::HandleRefused, &snapshot);
                self.emit(EventKind::OnCircuitOpen, &snapshot);
                Err(CircuitError::Open {
                    circuit: self.name.clone(),
                    phase: snapshot.phase,
                    failure_count: snapshot.failure_count,
                })
            }
        }
    }

    fn classify(&self, ctx: &FailureContext<'_>) -> FailureClass {
        self.type_matchers
            .iter()
            .find_map(|matcher| matcher.classify(ctx))
            .unwrap_or_else(|| self.classifier.classify(ctx))
    }

    /// Route a success. `probe` is the slot id held by this call, if any.
    fn on_success(&self, state: &CircuitState, probe: Option<u64>) -> Result<(), InvalidTransition> {
        let mut machine = state.lock();

        let closed = match machine.phase() {
            Phase::Closed => {
                machine.failures.reset_failures();
                false
            }
            Phase::HalfOpen if machine.holds_probe(probe) => {
                machine.fire(Transition::Reset)?;
                true
            }
            // Admitted before a concurrent trip; only the probe ends the window
            Phase::HalfOpen | Phase::Open => false,
        };

        let snapshot = machine.snapshot();
        drop(machine);

        self.emit(EventKind::OnSuccess, &snapshot);
        if closed {
            tracing::debug!(circuit = %self.name, "circuit closed after successful probe");
            self.callbacks.trigger(Phase::Closed, &self.name);
        }
        Ok(())
    }

    fn on_failure(
        &self,
        state: &CircuitState,
        class: &FailureClass,
        probe: Option<u64>,
    ) -> Result<(), InvalidTransition> {
        let excluded = self.is_excluded(class);
        let mut machine = state.lock();

        let mut opened = false;
        if !excluded {
            machine.failures.increment_failure();

            let tripped = match machine.phase() {
                Phase::Closed => self.strategy.is_tripped(&machine.failures),
                Phase::HalfOpen => machine.holds_probe(probe),
                // Already open: the failure extends the cooldown, nothing to trip
                Phase::Open => false,
            };
            if tripped {
                machine.fire(Transition::Trip)?;
                machine.set_cooldown(self.cooldown());
                opened = true;
            }
        }

        let snapshot = machine.snapshot();
        drop(machine);

        self.sink.emit(
            &HandlerEvent::new(EventKind::OnFailure, &self.name, &snapshot, self.thresholds())
                .with_failure(class, excluded),
        );
        if opened {
            tracing::debug!(
                circuit = %self.name,
                failure_count = snapshot.failure_count,
                "circuit tripped"
            );
            self.callbacks.trigger(Phase::Open, &self.name);
        }
        Ok(())
    }

    /// Cooldown for the trip happening now, jittered if configured
    fn cooldown(&self) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return self.config.failure_timeout;
        }

        let base_ms = u64::try_from(self.config.failure_timeout.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: base_ms,
            multiplier: 1.0,
            max_delay_ms: base_ms,
        };
        let timeout_ms = policy.calculate_delay(1, self.config.jitter_factor);
        Duration::from_secs_f64((timeout_ms as f64) / 1000.0)
    }

    fn emit(&self, kind: EventKind, snapshot: &StateSnapshot) {
        self.sink.emit(&HandlerEvent::new(
            kind,
            &self.name,
            snapshot,
            self.thresholds(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::FnSink;
    use crate::strategy::PercentageStrategy;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct NotFound;

    impl std::fmt::Display for NotFound {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("not found")
        }
    }

    impl std::error::Error for NotFound {}

    type BoxError = Box<dyn std::error::Error + Send + Sync>;

    fn handler(threshold: u64) -> CircuitHandler {
        CircuitHandler::builder("test")
            .failure_threshold(threshold)
            .failure_timeout(Duration::from_secs(5))
            .invocation_timeout(Duration::from_secs(1))
            .build()
            .expect("valid config")
    }

    async fn succeed(handler: &CircuitHandler, state: &CircuitState) -> Result<&'static str, CircuitError<&'static str>> {
        handler.handle(state, || async { Ok("hello world!") }).await
    }

    async fn fail(handler: &CircuitHandler, state: &CircuitState) -> CircuitError<&'static str> {
        handler
            .handle(state, || async { Err::<(), _>("FAIL") })
            .await
            .unwrap_err()
    }

    /// Trip the circuit and move it to half-open with `failures` counted
    fn half_open(state: &CircuitState, failures: u64) {
        state.trip().expect("closed -> open");
        state.attempt_reset().expect("open -> half_open");
        let mut machine = state.lock();
        machine.failures.set_failure_count(failures);
        machine.failures.set_last_failure_time(Some(Instant::now()));
    }

    #[tokio::test]
    async fn test_success_passes_result_through() {
        let handler = handler(5);
        let state = handler.new_circuit_state();

        assert_eq!(succeed(&handler, &state).await.unwrap(), "hello world!");
        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_counted_and_returned() {
        let handler = handler(5);
        let state = handler.new_circuit_state();

        let err = fail(&handler, &state).await;

        assert!(matches!(err, CircuitError::Execution("FAIL")));
        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_trips_after_threshold_exceeded() {
        let handler = handler(5);
        let state = handler.new_circuit_state();

        for _ in 0..5 {
            fail(&handler, &state).await;
        }
        assert!(state.is_closed());

        fail(&handler, &state).await;
        assert!(state.is_open());
        assert_eq!(state.failure_count(), 6);
    }

    #[tokio::test]
    async fn test_zero_threshold_trips_on_first_failure() {
        let handler = handler(0);
        let state = handler.new_circuit_state();

        fail(&handler, &state).await;

        assert!(state.is_open());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count_when_closed() {
        let handler = handler(5);
        let state = handler.new_circuit_state();

        fail(&handler, &state).await;
        fail(&handler, &state).await;
        succeed(&handler, &state).await.unwrap();

        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_refuses_without_invoking() {
        let handler = handler(5);
        let state = handler.new_circuit_state();
        for _ in 0..6 {
            fail(&handler, &state).await;
        }
        let calls_before = state.call_count();

        let invoked = AtomicBool::new(false);
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(1)).await;
            let result = handler
                .handle(&state, || async {
                    invoked.store(true, Ordering::SeqCst);
                    Ok::<_, &str>(())
                })
                .await;

            match result {
                Err(CircuitError::Open {
                    phase,
                    failure_count,
                    ..
                }) => {
                    assert_eq!(phase, Phase::Open);
                    assert_eq!(failure_count, 6);
                }
                other => panic!("expected Open error, got {other:?}"),
            }
        }

        assert!(!invoked.load(Ordering::SeqCst));
        assert!(state.is_open());
        assert_eq!(state.failure_count(), 6);
        assert_eq!(state.call_count(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes_circuit() {
        let handler = handler(5);
        let state = handler.new_circuit_state();
        for _ in 0..6 {
            fail(&handler, &state).await;
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(handler.is_timeout_exceeded(&state));

        assert_eq!(succeed(&handler, &state).await.unwrap(), "hello world!");
        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_regardless_of_threshold() {
        let handler = handler(100);
        let state = handler.new_circuit_state();
        half_open(&state, 5);

        let err = fail(&handler, &state).await;

        assert!(matches!(err, CircuitError::Execution("FAIL")));
        assert_eq!(state.failure_count(), 6);
        assert!(state.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expiry_then_probe_failure() {
        let handler = handler(0);
        let state = handler.new_circuit_state();
        fail(&handler, &state).await;
        assert!(state.is_open());

        tokio::time::advance(Duration::from_secs(5)).await;
        fail(&handler, &state).await;

        assert!(state.is_open());
        assert_eq!(state.failure_count(), 2);
        // A fresh cooldown starts from the probe failure
        assert!(succeed(&handler, &state).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_excluded_failures_are_not_counted() {
        let handler = CircuitHandler::builder("test")
            .failure_threshold(2)
            .exclude(FailureClass::of::<NotFound>())
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        for _ in 0..20 {
            let err = handler
                .handle(&state, || async { Err::<(), _>(NotFound) })
                .await
                .unwrap_err();
            assert!(matches!(err, CircuitError::Execution(NotFound)));
        }

        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 0);
        assert_eq!(state.call_count(), 20);
    }

    #[tokio::test]
    async fn test_excluded_probe_failure_keeps_half_open() {
        let handler = CircuitHandler::builder("test")
            .exclude(FailureClass::of::<NotFound>())
            .build()
            .unwrap();
        let state = handler.new_circuit_state();
        half_open(&state, 3);

        let _ = handler
            .handle(&state, || async { Err::<(), _>(NotFound) })
            .await;

        assert!(state.is_half_open());
        assert_eq!(state.failure_count(), 3);
        // The probe slot was freed, so the next call is admitted as a probe
        succeed(&handler, &state).await.unwrap();
        assert!(state.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure_and_drops_late_result() {
        let handler = handler(5);
        let state = handler.new_circuit_state();
        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = completed.clone();

        let result = handler
            .handle(&state, || async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                completed_clone.store(true, Ordering::SeqCst);
                Ok::<_, &str>("late")
            })
            .await;

        match result {
            Err(CircuitError::InvocationTimeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_secs(1));
            }
            other => panic!("expected InvocationTimeout, got {other:?}"),
        }
        assert_eq!(state.failure_count(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!completed.load(Ordering::SeqCst));
        assert_eq!(state.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_timeouts_are_not_counted() {
        let handler = CircuitHandler::builder("test")
            .invocation_timeout(Duration::from_millis(100))
            .exclude(FailureClass::INVOCATION_TIMEOUT)
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        let err = handler
            .handle(&state, || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(state.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let handler = handler(0);
        let a = handler.new_circuit_state();
        let b = handler.new_circuit_state();

        fail(&handler, &a).await;

        assert!(a.is_open());
        assert!(b.is_closed());
        assert_eq!(b.failure_count(), 0);
        assert_eq!(succeed(&handler, &b).await.unwrap(), "hello world!");
    }

    #[tokio::test]
    async fn test_percentage_strategy_with_minimum_samples() {
        let handler = CircuitHandler::builder("test")
            .strategy(Arc::new(PercentageStrategy::with_minimum_samples(0.5, 3)))
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        fail(&handler, &state).await;
        fail(&handler, &state).await;
        fail(&handler, &state).await;
        assert!(state.is_closed(), "three calls is not above the minimum");

        fail(&handler, &state).await;
        assert!(state.is_open());
        assert_eq!(state.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_admitted_concurrently() {
        let handler = Arc::new(handler(0));
        let state = Arc::new(handler.new_circuit_state());
        fail(&handler, &state).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let invocations = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let handler = handler.clone();
            let state = state.clone();
            let invocations = invocations.clone();
            tasks.push(tokio::spawn(async move {
                handler
                    .handle(&state, || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, &str>(())
                    })
                    .await
            }));
        }

        let mut refused = 0;
        for task in tasks {
            match task.await.expect("task panicked") {
                Ok(()) => {}
                Err(CircuitError::Open { phase, .. }) => {
                    assert_eq!(phase, Phase::HalfOpen);
                    refused += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(refused, 9);
        assert!(state.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_releases_slot() {
        let handler = handler(0);
        let state = handler.new_circuit_state();
        half_open(&state, 1);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            handler.handle(&state, || std::future::pending::<Result<(), &str>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(state.is_half_open());

        succeed(&handler, &state).await.unwrap();
        assert!(state.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let handler = Arc::new(handler(1_000));
        let state = Arc::new(handler.new_circuit_state());

        let mut tasks = Vec::new();
        for _ in 0..100 {
            let handler = handler.clone();
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                handler
                    .handle(&state, || async { Err::<(), _>("FAIL") })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_err());
        }

        assert_eq!(state.failure_count(), 100);
        assert_eq!(state.call_count(), 100);
        assert!(state.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_concurrent_trip_is_counted() {
        let handler = Arc::new(handler(0));
        let state = Arc::new(handler.new_circuit_state());

        let slow = {
            let handler = handler.clone();
            let state = state.clone();
            tokio::spawn(async move {
                handler
                    .handle(&state, || async {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        Err::<(), _>("SLOW FAIL")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        fail(&handler, &state).await;
        assert!(state.is_open());

        let err = slow.await.unwrap().unwrap_err();
        assert!(matches!(err, CircuitError::Execution("SLOW FAIL")));
        assert!(state.is_open());
        assert_eq!(state.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_handle_with_passes_args() {
        let handler = handler(5);
        let state = handler.new_circuit_state();

        let sum = handler
            .handle_with(&state, |(a, b): (u32, u32)| async move { Ok::<_, &str>(a + b) }, (2, 3))
            .await
            .unwrap();

        assert_eq!(sum, 5);
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler = CircuitHandler::builder("events")
            .failure_threshold(0)
            .sink(Arc::new(FnSink(move |event: &HandlerEvent<'_>| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push((event.kind, event.phase, event.failure_count));
            })))
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        succeed(&handler, &state).await.unwrap();
        fail(&handler, &state).await;
        succeed(&handler, &state).await.unwrap_err();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::TripCheck, Phase::Closed, 0),
                (EventKind::OnSuccess, Phase::Closed, 0),
                (EventKind::TripCheck, Phase::Closed, 0),
                (EventKind::OnFailure, Phase::Open, 1),
                (EventKind::TripCheck, Phase::Open, 1),
                (EventKind::HandleRefused, Phase::Open, 1),
                (EventKind::OnCircuitOpen, Phase::Open, 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_event_reports_exclusion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler = CircuitHandler::builder("events")
            .exclude(FailureClass::of::<NotFound>())
            .sink(Arc::new(FnSink(move |event: &HandlerEvent<'_>| {
                if event.kind == EventKind::OnFailure {
                    seen_clone.lock().unwrap().push((
                        event.failure_class.map(|c| c.to_string()),
                        event.excluded,
                    ));
                }
            })))
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        let _ = handler.handle(&state, || async { Err::<(), _>(NotFound) }).await;
        let _ = fail(&handler, &state).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Some(FailureClass::of::<NotFound>().to_string()), true),
                (Some(FailureClass::of::<&str>().to_string()), false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_callbacks_fire_through_cycle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (open_log, half_log, close_log) = (log.clone(), log.clone(), log.clone());
        let handler = CircuitHandler::builder("cycle")
            .failure_threshold(0)
            .failure_timeout(Duration::from_secs(1))
            .on_open(move |name| open_log.lock().unwrap().push(format!("open:{name}")))
            .on_half_open(move |name| half_log.lock().unwrap().push(format!("half_open:{name}")))
            .on_close(move |name| close_log.lock().unwrap().push(format!("close:{name}")))
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        fail(&handler, &state).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        succeed(&handler, &state).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["open:cycle", "half_open:cycle", "close:cycle"]
        );
    }

    #[tokio::test]
    async fn test_sink_may_inspect_state() {
        let state = Arc::new(CircuitState::new());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let (state_clone, observed_clone) = (state.clone(), observed.clone());
        let handler = CircuitHandler::builder("reentrant")
            .sink(Arc::new(FnSink(move |_event: &HandlerEvent<'_>| {
                observed_clone.lock().unwrap().push(state_clone.phase());
            })))
            .build()
            .unwrap();

        succeed(&handler, &state).await.unwrap();

        assert_eq!(observed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_jittered_cooldown_within_bounds() {
        let handler = CircuitHandler::builder("jitter")
            .failure_threshold(0)
            .failure_timeout(Duration::from_secs(10))
            .jitter_factor(0.5)
            .build()
            .unwrap();

        for _ in 0..20 {
            let state = handler.new_circuit_state();
            fail(&handler, &state).await;

            let cooldown = state.lock().cooldown().expect("cooldown drawn on trip");
            assert!(cooldown >= Duration::from_secs(5) - Duration::from_millis(10));
            assert!(cooldown <= Duration::from_secs(10) + Duration::from_millis(10));
        }
    }

    #[test]
    fn test_zero_jitter_uses_failure_timeout() {
        let handler = handler(5);
        assert_eq!(handler.cooldown(), Duration::from_secs(5));
    }

    #[test]
    fn test_threshold_query_is_read_only() {
        let handler = handler(1);
        let state = handler.new_circuit_state();
        state.increment_failure();
        assert!(!handler.is_failure_threshold_reached(&state));

        state.increment_failure();
        assert!(handler.is_failure_threshold_reached(&state));
        assert!(state.is_closed());
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let zero = Config {
            invocation_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroInvocationTimeout));

        let jitter = Config {
            jitter_factor: 1.5,
            ..Default::default()
        };
        assert_eq!(jitter.validate(), Err(ConfigError::InvalidJitter(1.5)));
    }

    /// Trip a threshold-0 circuit while `late` is in flight, then start a
    /// 10 s trial call once the 1 s cooldown has passed
    async fn with_trial_call_in_flight<T, Fut>(
        late: impl FnOnce() -> Fut + Send + 'static,
    ) -> (
        Arc<CircuitHandler>,
        Arc<CircuitState>,
        tokio::task::JoinHandle<Result<T, CircuitError<&'static str>>>,
        tokio::task::JoinHandle<Result<(), CircuitError<&'static str>>>,
    )
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, &'static str>> + Send + 'static,
    {
        let handler = Arc::new(
            CircuitHandler::builder("late")
                .failure_threshold(0)
                .failure_timeout(Duration::from_secs(1))
                .build()
                .unwrap(),
        );
        let state = Arc::new(handler.new_circuit_state());

        let late = {
            let (handler, state) = (handler.clone(), state.clone());
            tokio::spawn(async move { handler.handle(&state, late).await })
        };
        tokio::task::yield_now().await;

        fail(&handler, &state).await;
        assert!(state.is_open());
        tokio::time::advance(Duration::from_secs(1)).await;

        let trial = {
            let (handler, state) = (handler.clone(), state.clone());
            tokio::spawn(async move {
                handler
                    .handle(&state, || async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok::<_, &str>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(state.is_half_open());

        (handler, state, late, trial)
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_leaves_half_open_window() {
        let (handler, state, late, trial) = with_trial_call_in_flight(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok("late")
        })
        .await;

        assert_eq!(late.await.unwrap().unwrap(), "late");

        assert!(state.is_half_open());
        let refused = succeed(&handler, &state).await.unwrap_err();
        assert!(matches!(
            refused,
            CircuitError::Open {
                phase: Phase::HalfOpen,
                ..
            }
        ));

        trial.await.unwrap().unwrap();
        assert!(state.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_is_counted_without_reopening() {
        let (handler, state, late, trial) = with_trial_call_in_flight(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Err::<(), _>("LATE")
        })
        .await;

        assert!(matches!(
            late.await.unwrap(),
            Err(CircuitError::Execution("LATE"))
        ));

        assert!(state.is_half_open());
        assert_eq!(state.failure_count(), 2);
        assert!(succeed(&handler, &state).await.unwrap_err().is_open());

        trial.await.unwrap().unwrap();
        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_excluded_type_matches_boxed_errors() {
        let handler = CircuitHandler::builder("boxed")
            .failure_threshold(0)
            .exclude_type::<NotFound>()
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        for _ in 0..3 {
            let err = handler
                .handle(&state, || async { Err::<(), BoxError>(Box::new(NotFound)) })
                .await
                .unwrap_err();
            assert!(matches!(&err, CircuitError::Execution(e) if e.is::<NotFound>()));
        }
        assert!(state.is_closed());
        assert_eq!(state.failure_count(), 0);

        let _ = handler
            .handle(&state, || async { Err::<(), BoxError>("boom".into()) })
            .await;
        assert!(state.is_open());
    }

    #[tokio::test]
    async fn test_boxed_exclusion_reported_with_concrete_class() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler = CircuitHandler::builder("boxed")
            .exclude_type::<NotFound>()
            .sink(Arc::new(FnSink(move |event: &HandlerEvent<'_>| {
                if event.kind == EventKind::OnFailure {
                    seen_clone
                        .lock()
                        .unwrap()
                        .push((event.failure_class.cloned(), event.excluded));
                }
            })))
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        let _ = handler
            .handle(&state, || async { Err::<(), BoxError>(Box::new(NotFound)) })
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some(FailureClass::of::<NotFound>()), true)]
        );
    }

    #[tokio::test]
    async fn test_events_report_thresholds() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler = CircuitHandler::builder("limits")
            .failure_timeout(Duration::from_secs(7))
            .failure_rate(0.5, 4)
            .sink(Arc::new(FnSink(move |event: &HandlerEvent<'_>| {
                seen_clone.lock().unwrap().push(event.thresholds);
            })))
            .build()
            .unwrap();
        let state = handler.new_circuit_state();

        succeed(&handler, &state).await.unwrap();

        let expected = Thresholds {
            failure_threshold: 0.5,
            failure_timeout: Duration::from_secs(7),
            minimum_samples: Some(4),
        };
        assert_eq!(handler.thresholds(), expected);
        assert_eq!(*seen.lock().unwrap(), vec![expected; 2]);
        assert_eq!(CircuitHandler::new("count").thresholds().minimum_samples, None);
    }
}
