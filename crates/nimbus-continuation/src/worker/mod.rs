//! Workers and the self-scaling pool
//!
//! This module provides:
//! - [`Worker`] - One pull/continue/delete loop with a bounded activity level
//! - [`WorkerPoolManager`] - Spawns workers and scales the pool between bounds
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkerPoolManager                        │
//! │  ┌──────────────────┐        ┌───────────────────────────┐  │
//! │  │  Sizing loop     │        │  Pump populate loop       │  │
//! │  │  (30s, 25/175)   │        │  (10s, half-target)       │  │
//! │  └────────┬─────────┘        └─────────────┬─────────────┘  │
//! │           ▼                                ▼                │
//! │  ┌──────────────────────────┐    ┌──────────────────────┐   │
//! │  │ Pool: DashMap<id,Worker> │    │      QueuePump       │   │
//! │  │ [W1] [W2] [W3] ... [Wn]  │───▶│  (prefetch cache)    │   │
//! │  └──────────────────────────┘    └──────────┬───────────┘   │
//! │                                             ▼               │
//! │                                   backing QueueRepository   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod manager;
mod worker;

pub use manager::{PoolManagerConfig, PoolManagerError, WorkerPoolManager};
pub use worker::{Worker, WorkerConfig, WorkerError};
