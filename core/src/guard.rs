//! Binding operations to a handler
//!
//! A [`Guarded`] pairs an operation with the handler that protects it, built
//! once per operation. Each subject the operation runs against owns a
//! [`CircuitCell`], so every subject trips independently while the handler
//! configuration is shared.

use crate::errors::CircuitError;
use crate::handler::CircuitHandler;
use crate::state::CircuitState;
use std::future::Future;
use std::sync::{Arc, OnceLock};

/// Circuit state created on first use
#[derive(Debug, Default)]
pub struct CircuitCell {
    state: OnceLock<CircuitState>,
}

impl CircuitCell {
    pub const fn new() -> Self {
        Self {
            state: OnceLock::new(),
        }
    }

    /// The state, creating it through `handler` on first access
    pub fn get_or_init(&self, handler: &CircuitHandler) -> &CircuitState {
        self.state.get_or_init(|| handler.new_circuit_state())
    }

    pub fn get(&self) -> Option<&CircuitState> {
        self.state.get()
    }
}

/// Anything that owns circuit state for guarded calls made on its behalf
pub trait CircuitSubject {
    fn circuit_cell(&self) -> &CircuitCell;
}

impl CircuitSubject for CircuitCell {
    fn circuit_cell(&self) -> &CircuitCell {
        self
    }
}

/// An operation bound to its handler
///
/// # Examples
///
/// ```rust
/// use circuit_guard::{CircuitCell, CircuitHandler, CircuitSubject, Guarded};
/// use std::sync::Arc;
///
/// struct Inventory {
///     circuit: CircuitCell,
/// }
///
/// impl CircuitSubject for Inventory {
///     fn circuit_cell(&self) -> &CircuitCell {
///         &self.circuit
///     }
/// }
///
/// impl Inventory {
///     async fn stock(&self, sku: &'static str) -> Result<u32, String> {
///         if sku.is_empty() { Err("empty sku".into()) } else { Ok(42) }
///     }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let stock = Guarded::new(Arc::new(CircuitHandler::new("inventory")), Inventory::stock);
/// let inventory = Inventory { circuit: CircuitCell::new() };
///
/// assert_eq!(stock.call(&inventory, "sku-1").await.unwrap(), 42);
/// assert!(stock.state_of(&inventory).is_closed());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Guarded<F> {
    handler: Arc<CircuitHandler>,
    operation: F,
}

impl<F> Guarded<F> {
    pub fn new(handler: Arc<CircuitHandler>, operation: F) -> Self {
        Self { handler, operation }
    }

    pub fn handler(&self) -> &CircuitHandler {
        &self.handler
    }

    /// The subject's circuit state, created if this is its first use
    pub fn state_of<'s, S: CircuitSubject>(&self, subject: &'s S) -> &'s CircuitState {
        subject.circuit_cell().get_or_init(&self.handler)
    }

    /// Invoke the operation for `subject` under its circuit
    pub async fn call<'s, S, A, T, E, Fut>(
        &self,
        subject: &'s S,
        args: A,
    ) -> Result<T, CircuitError<E>>
    where
        S: CircuitSubject,
        F: Fn(&'s S, A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: 'static,
    {
        let state = self.state_of(subject);
        self.handler
            .handle(state, || (self.operation)(subject, args))
            .await
    }
}
