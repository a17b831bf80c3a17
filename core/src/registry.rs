//! Registry of shared handlers
//!
//! Maps an operation identity to the one handler configured for it at setup
//! time. Lookups hand out `Arc`s, so the configuration is shared read-only by
//! every subject that runs the operation.

use crate::errors::ConfigError;
use crate::guard::Guarded;
use crate::handler::CircuitHandler;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<CircuitHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its name, replacing any previous entry
    pub fn register(&self, handler: CircuitHandler) -> Arc<CircuitHandler> {
        let handler = Arc::new(handler);
        let previous = self
            .handlers
            .write()
            .insert(handler.name().to_string(), handler.clone());
        if previous.is_some() {
            tracing::debug!(handler = handler.name(), "replaced registered circuit handler");
        }
        handler
    }

    /// Return the handler for `name`, building it with `build` on first use
    pub fn get_or_register<F>(&self, name: &str, build: F) -> Result<Arc<CircuitHandler>, ConfigError>
    where
        F: FnOnce() -> Result<CircuitHandler, ConfigError>,
    {
        if let Some(handler) = self.handlers.read().get(name) {
            return Ok(handler.clone());
        }

        let mut handlers = self.handlers.write();
        // Another caller may have registered it between the two locks
        if let Some(handler) = handlers.get(name) {
            return Ok(handler.clone());
        }
        let handler = Arc::new(build()?);
        handlers.insert(name.to_string(), handler.clone());
        Ok(handler)
    }

    pub fn get(&self, name: &str) -> Result<Arc<CircuitHandler>, ConfigError> {
        self.handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownHandler(name.to_string()))
    }

    /// Bind `operation` to the handler registered under `name`
    pub fn guard<F>(&self, name: &str, operation: F) -> Result<Guarded<F>, ConfigError> {
        Ok(Guarded::new(self.get(name)?, operation))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}
