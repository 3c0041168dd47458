//! Chain activation
//!
//! This module provides:
//! - [`HandlerRegistry`] - The registered set of step handlers
//! - [`Activator`] - Drives one continuation step and re-queues the next

mod activator;
mod registry;

pub use activator::{Activator, ActivatorError};
pub use registry::{HandlerRegistry, RegistryError};
