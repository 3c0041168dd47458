//! Background-loop scheduling
//!
//! The engine schedules three kinds of repeating loops: one run loop per
//! worker (back-to-back, no interval), the pool manager's sizing loop, and
//! the pump's cache populate loop. [`TaskScheduler`] abstracts the "run this
//! named function repeatedly until it returns false" primitive so hosts can
//! plug in their own task infrastructure; [`TokioScheduler`] is the default.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

/// One iteration of a background loop; `false` stops the loop.
pub type LoopFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// The repeatedly invoked body of a background loop.
pub type LoopFn = Box<dyn FnMut() -> LoopFuture + Send + 'static>;

/// Runs named functions repeatedly until they return false.
pub trait TaskScheduler: Send + Sync + 'static {
    /// Schedule `task` to run repeatedly, sleeping `interval` between
    /// iterations (`None` means back-to-back), until it returns false or the
    /// process stops.
    fn run_loop(&self, name: &str, interval: Option<Duration>, task: LoopFn);
}

/// Scheduler backed by independent tokio tasks, one per loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl TaskScheduler for TokioScheduler {
    fn run_loop(&self, name: &str, interval: Option<Duration>, mut task: LoopFn) {
        let name = name.to_string();
        tokio::spawn(async move {
            debug!(loop_name = %name, "background loop started");
            loop {
                if !task().await {
                    break;
                }
                if let Some(interval) = interval {
                    tokio::time::sleep(interval).await;
                }
            }
            debug!(loop_name = %name, "background loop stopped");
        });
    }
}
