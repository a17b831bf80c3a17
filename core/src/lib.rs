//! circuit-guard - Circuit breaker guard for async operations
//!
//! This crate provides:
//! - A three-phase circuit (Closed → Open → HalfOpen) with a fixed transition table
//! - Pluggable trip strategies (absolute failure count, failure percentage)
//! - Per-call invocation timeouts that cancel the operation at the deadline
//! - Failure classification so expected errors do not count against the circuit
//! - Per-instance locking: one probe per cooldown, no contention between circuits
//!
//! # Example
//!
//! ```rust
//! use circuit_guard::CircuitHandler;
//! use std::time::Duration;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let handler = CircuitHandler::builder("my_service")
//!     .failure_threshold(5)
//!     .failure_timeout(Duration::from_secs(30))
//!     .invocation_timeout(Duration::from_secs(2))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .unwrap();
//!
//! // One state per guarded subject
//! let state = handler.new_circuit_state();
//!
//! // Execute with circuit protection
//! let result = handler
//!     .handle(&state, || async {
//!         // Your service call here
//!         Ok::<_, String>("success")
//!     })
//!     .await;
//! assert_eq!(result.unwrap(), "success");
//!
//! // Check circuit state
//! if state.is_open() {
//!     println!("Circuit is open, skipping call");
//! }
//! # });
//! ```

pub mod builder;
pub mod callbacks;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod failure_state;
pub mod guard;
pub mod handler;
pub mod registry;
pub mod state;
pub mod strategy;

pub use builder::HandlerBuilder;
pub use callbacks::{
    Callbacks, EventKind, EventSink, FnSink, HandlerEvent, NullSink, Thresholds, TracingSink,
};
pub use classifier::{
    FailureClass, FailureClassifier, FailureContext, PredicateClassifier, TypeNameClassifier,
};
pub use config::{HandlerSettings, StrategySettings};
pub use errors::{CircuitError, ConfigError, InvalidTransition};
pub use failure_state::FailureState;
pub use guard::{CircuitCell, CircuitSubject, Guarded};
pub use handler::{CircuitHandler, Config};
pub use registry::HandlerRegistry;
pub use state::{CircuitState, Phase, StateSnapshot, Transition};
pub use strategy::{CountStrategy, PercentageStrategy, TripStrategy};
