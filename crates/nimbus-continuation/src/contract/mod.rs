//! Step contract between the engine and its handlers
//!
//! This module defines:
//! - [`JobPayload`] - The persisted state of a job chain, one message per step
//! - [`StepInput`] / [`StepResult`] - The shapes a handler exchanges per step
//! - [`StepHandler`] - The trait implemented by every step handler

mod payload;
mod step;

pub use payload::JobPayload;
pub use step::{StepHandler, StepInput, StepResult};
