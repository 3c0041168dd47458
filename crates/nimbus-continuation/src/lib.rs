//! # Continuation Job Engine
//!
//! A queue-backed engine for long-running provisioning operations that cannot
//! finish in one synchronous call. A long operation is broken into discrete
//! steps; each step's progress token is persisted in a durable queue, and a
//! self-scaling pool of workers pulls, executes, and re-queues steps until
//! the chain reaches a terminal state.
//!
//! ## Features
//!
//! - **Resumable chains**: opaque continuation tokens carry progress between
//!   steps; an absent token ends the chain
//! - **Prefetching pump**: a warm in-process cache shields workers from
//!   per-message queue round-trips
//! - **Adaptive pool sizing**: per-worker activity levels drive scale
//!   decisions between configurable bounds, with no centralized locking
//! - **Pluggable queue**: PostgreSQL (`SKIP LOCKED`) for production,
//!   in-memory for tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkerPoolManager                        │
//! │  (spawns workers, sizing loop scales pool between bounds)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Worker  ──▶  QueuePump  ──▶  QueueRepository    │
//! │  (pull one message, resolve handler, drive one step)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Activator + HandlerRegistry                     │
//! │  (run handler step, re-queue successor while a token remains)│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use nimbus_continuation::prelude::*;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(ProvisionVmHandler::new(compute_client));
//!
//! let manager = WorkerPoolManager::new(
//!     Arc::new(PostgresQueue::new(pool)),
//!     Arc::new(registry),
//!     Arc::new(TokioScheduler),
//!     PoolManagerConfig::default(),
//! )?;
//! manager.start()?;
//!
//! // Submit a chain; the pool drives it to completion in the background.
//! let payload = JobPayload::new_chain("provision-vm", json!({"size": "M"}));
//! let handler = manager.registry().resolve_required(&payload)?;
//! let started = manager
//!     .activator()
//!     .execute(handler.as_ref(), "provision-vm", payload.input)
//!     .await?;
//! println!("chain {} started", started.tracking_id);
//! ```

pub mod contract;
pub mod engine;
pub mod queue;
pub mod scheduler;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::contract::{JobPayload, StepHandler, StepInput, StepResult};
    pub use crate::engine::{Activator, ActivatorError, HandlerRegistry, RegistryError};
    pub use crate::queue::{
        InMemoryQueue, PostgresQueue, QueueError, QueueMessage, QueuePump, QueueRepository,
    };
    pub use crate::scheduler::{TaskScheduler, TokioScheduler};
    pub use crate::worker::{
        PoolManagerConfig, PoolManagerError, Worker, WorkerConfig, WorkerPoolManager,
    };
}

// Re-export key types at crate root
pub use contract::{JobPayload, StepHandler, StepInput, StepResult};
pub use engine::{Activator, ActivatorError, HandlerRegistry, RegistryError};
pub use queue::{InMemoryQueue, PostgresQueue, QueueError, QueueMessage, QueuePump, QueueRepository};
pub use scheduler::{TaskScheduler, TokioScheduler};
pub use worker::{PoolManagerConfig, PoolManagerError, Worker, WorkerConfig, WorkerPoolManager};
