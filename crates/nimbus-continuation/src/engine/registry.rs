//! Handler registry for capability-checked step dispatch
//!
//! The registry holds the open set of step handlers and resolves the one
//! owning a payload by a scan-and-match over `can_handle`, in registration
//! order. Ambiguity between handlers claiming the same payload is resolved
//! by first match.

use std::fmt;
use std::sync::Arc;

use crate::contract::{JobPayload, StepHandler};

/// Registry of step handlers
///
/// # Example
///
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register(ProvisionVmHandler::new(compute_client));
/// let handler = registry.resolve(&payload);
/// ```
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn StepHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self { handlers: vec![] }
    }

    /// Register a handler
    pub fn register(&mut self, handler: impl StepHandler) {
        self.handlers.push(Arc::new(handler));
    }

    /// Register an already shared handler
    pub fn register_arc(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.push(handler);
    }

    /// Resolve the handler owning a payload, first match wins.
    pub fn resolve(&self, payload: &JobPayload) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(payload))
            .cloned()
    }

    /// Resolve or fail with the unmatched target name.
    pub fn resolve_required(
        &self,
        payload: &JobPayload,
    ) -> Result<Arc<dyn StepHandler>, RegistryError> {
        self.resolve(payload)
            .ok_or_else(|| RegistryError::HandlerNotFound(payload.target.clone()))
    }

    /// Get the number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Get all registered handler names
    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|h| h.name())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handler_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No registered handler claimed the payload
    #[error("no handler registered for target: {0}")]
    HandlerNotFound(String),
}
