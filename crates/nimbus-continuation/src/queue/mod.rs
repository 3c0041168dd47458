//! Durable queue abstraction and implementations
//!
//! This module provides:
//! - [`QueueRepository`] - The backing-queue interface the engine consumes
//! - [`QueuePump`] - Prefetch cache shielding workers from queue round-trips
//! - [`InMemoryQueue`] - Visibility-aware in-memory queue, primarily for tests
//! - [`PostgresQueue`] - Production queue using `FOR UPDATE SKIP LOCKED`

mod memory;
mod postgres;
mod pump;
mod repository;

pub use memory::InMemoryQueue;
pub use postgres::PostgresQueue;
pub use pump::QueuePump;
pub use repository::{QueueError, QueueMessage, QueueRepository};
