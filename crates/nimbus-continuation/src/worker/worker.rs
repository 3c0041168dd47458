//! Continuation worker - one pull/continue/delete loop

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};
use uuid::Uuid;

use crate::contract::JobPayload;
use crate::engine::{Activator, ActivatorError, HandlerRegistry, RegistryError};
use crate::queue::{QueueError, QueueMessage, QueuePump};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Sleep after an empty poll while the activity level is still above zero
    #[serde(with = "duration_millis")]
    pub busy_backoff: Duration,

    /// Lower bound of the randomized idle sleep (activity level at zero)
    #[serde(with = "duration_millis")]
    pub idle_backoff_min: Duration,

    /// Upper bound (exclusive) of the randomized idle sleep
    #[serde(with = "duration_millis")]
    pub idle_backoff_max: Duration,

    /// Cap on the activity level counter
    pub max_activity_level: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            busy_backoff: Duration::from_secs(1),
            idle_backoff_min: Duration::from_secs(2),
            idle_backoff_max: Duration::from_secs(5),
            max_activity_level: 200,
        }
    }
}

impl WorkerConfig {
    /// Create a new worker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the busy backoff interval
    pub fn with_busy_backoff(mut self, interval: Duration) -> Self {
        self.busy_backoff = interval;
        self
    }

    /// Set the randomized idle backoff window
    pub fn with_idle_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.idle_backoff_min = min;
        self.idle_backoff_max = max.max(min + Duration::from_millis(1));
        self
    }

    /// Set the activity level cap
    pub fn with_max_activity_level(mut self, max: u32) -> Self {
        self.max_activity_level = max.max(1);
        self
    }
}

/// Errors from one worker iteration
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Message body did not deserialize into a job payload
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// No handler claimed the payload
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The step itself failed
    #[error("activator error: {0}")]
    Activator(#[from] ActivatorError),

    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// A worker bound to one logical slot in the pool
///
/// Each iteration pulls one message via the pump and drives it through the
/// activator. The bounded activity level is the worker's only externally
/// observable load signal; it is a coarse increment/decrement counter so the
/// sizing decision stays cheap. Disposal is cooperative: the flag is checked
/// once per iteration, so an in-flight step always runs to completion.
pub struct Worker {
    id: String,
    pump: Arc<QueuePump>,
    registry: Arc<HandlerRegistry>,
    activator: Arc<Activator>,
    config: WorkerConfig,
    activity_level: AtomicU32,
    disposed: AtomicBool,
}

impl Worker {
    /// Create a new worker.
    pub fn new(
        pump: Arc<QueuePump>,
        registry: Arc<HandlerRegistry>,
        activator: Arc<Activator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: format!("worker-{}", Uuid::now_v7()),
            pump,
            registry,
            activator,
            config,
            activity_level: AtomicU32::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Get the worker identity
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current activity level, always within `[0, max_activity_level]`.
    pub fn activity_level(&self) -> u32 {
        self.activity_level.load(Ordering::Relaxed)
    }

    /// Request disposal; the loop exits at its next iteration boundary.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    /// Whether disposal has been requested.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Run one loop iteration; returns false once the worker is disposed.
    ///
    /// Failures never stop the loop: a bad message is logged and left for
    /// the queue to redeliver, and a queue outage degrades into backoff.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub async fn run_iteration(&self) -> bool {
        if self.is_disposed() {
            return false;
        }

        match self.pump.get_message().await {
            Ok(Some(message)) => {
                self.raise_activity();
                if let Err(e) = self.process_message(&message).await {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "iteration failed, message left for redelivery"
                    );
                }
            }
            Ok(None) => {
                let level = self.lower_activity();
                self.idle_backoff(level).await;
            }
            Err(e) => {
                warn!(error = %e, "queue fetch failed");
                tokio::time::sleep(self.config.busy_backoff).await;
            }
        }

        !self.is_disposed()
    }

    /// Deserialize, dispatch, and on success consume the message.
    ///
    /// The delete happens regardless of whether a next step was re-queued;
    /// the next step is a new message and this one is fully consumed.
    async fn process_message(&self, message: &QueueMessage) -> Result<(), WorkerError> {
        let payload: JobPayload = serde_json::from_str(&message.body)?;
        let handler = self.registry.resolve_required(&payload)?;

        let next = self
            .activator
            .continue_step(handler.as_ref(), &payload)
            .await?;

        self.pump.delete_message(message).await?;

        trace!(
            tracking_id = %next.tracking_id,
            terminal = next.is_terminal(),
            "processed step"
        );
        Ok(())
    }

    async fn idle_backoff(&self, level: u32) {
        let sleep = if level > 0 {
            self.config.busy_backoff
        } else {
            // Randomized so idle workers do not poll in lockstep.
            let min = self.config.idle_backoff_min.as_millis() as u64;
            let max = self.config.idle_backoff_max.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(min..max.max(min + 1)))
        };
        tokio::time::sleep(sleep).await;
    }

    fn raise_activity(&self) -> u32 {
        let max = self.config.max_activity_level;
        let _ = self
            .activity_level
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |level| {
                (level < max).then_some(level + 1)
            });
        self.activity_level()
    }

    fn lower_activity(&self) -> u32 {
        let _ = self
            .activity_level
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |level| {
                level.checked_sub(1)
            });
        self.activity_level()
    }

    #[cfg(test)]
    pub(crate) fn set_activity_level(&self, level: u32) {
        self.activity_level.store(level, Ordering::Relaxed);
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{StepHandler, StepInput, StepResult};
    use crate::queue::{InMemoryQueue, QueueRepository};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StepHandler for CountingHandler {
        fn name(&self) -> &str {
            "provision-vm"
        }

        async fn continue_step(
            &self,
            _input: StepInput,
            continuation_token: Option<&str>,
        ) -> anyhow::Result<StepResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match continuation_token {
                None => StepResult::in_progress("Allocating", "attach-disk"),
                Some(_) => StepResult::terminal("Succeeded"),
            })
        }
    }

    fn test_worker(queue: Arc<InMemoryQueue>, registry: HandlerRegistry) -> Worker {
        let pump = Arc::new(QueuePump::new(queue, Arc::new(AtomicUsize::new(1))));
        let activator = Arc::new(Activator::new(pump.clone()));
        Worker::new(pump, Arc::new(registry), activator, WorkerConfig::default())
    }

    async fn enqueue_chain(queue: &InMemoryQueue, target: &str) -> JobPayload {
        let payload = JobPayload::new_chain(target, json!({"size": "M"}));
        queue
            .add(serde_json::to_string(&payload).unwrap(), None)
            .await
            .unwrap();
        payload
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.busy_backoff, Duration::from_secs(1));
        assert_eq!(config.idle_backoff_min, Duration::from_secs(2));
        assert_eq!(config.idle_backoff_max, Duration::from_secs(5));
        assert_eq!(config.max_activity_level, 200);
    }

    #[test]
    fn test_activity_level_bounds() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = test_worker(queue, HandlerRegistry::new());

        for _ in 0..250 {
            worker.raise_activity();
        }
        assert_eq!(worker.activity_level(), 200);

        for _ in 0..250 {
            worker.lower_activity();
        }
        assert_eq!(worker.activity_level(), 0);
    }

    #[tokio::test]
    async fn test_message_raises_activity_and_consumes() {
        let queue = Arc::new(InMemoryQueue::new());
        let mut registry = HandlerRegistry::new();
        registry.register(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let worker = test_worker(queue.clone(), registry);

        enqueue_chain(&queue, "provision-vm").await;

        assert!(worker.run_iteration().await);
        assert_eq!(worker.activity_level(), 1);
        // Original message consumed, successor queued.
        assert_eq!(queue.message_count(), 1);
        let remaining: JobPayload =
            serde_json::from_str(&queue.fetch_one().await.unwrap().unwrap().body).unwrap();
        assert_eq!(remaining.continuation_token.as_deref(), Some("attach-disk"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_backoff_when_active_sleeps_fixed_interval() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = test_worker(queue, HandlerRegistry::new());
        worker.set_activity_level(10);

        let before = Instant::now();
        assert!(worker.run_iteration().await);

        assert_eq!(before.elapsed(), Duration::from_secs(1));
        assert_eq!(worker.activity_level(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_backoff_at_zero_sleeps_randomized_interval() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = test_worker(queue, HandlerRegistry::new());

        let before = Instant::now();
        assert!(worker.run_iteration().await);

        let slept = before.elapsed();
        assert!(slept >= Duration::from_secs(2), "slept {slept:?}");
        assert!(slept < Duration::from_secs(5), "slept {slept:?}");
        assert_eq!(worker.activity_level(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_target_leaves_message() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = test_worker(queue.clone(), HandlerRegistry::new());

        enqueue_chain(&queue, "unknown-target").await;

        assert!(worker.run_iteration().await);
        // Still stored; it will be redelivered once the lease lapses.
        assert_eq!(queue.message_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_leaves_message() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = test_worker(queue.clone(), HandlerRegistry::new());
        queue.add("not json".into(), None).await.unwrap();

        assert!(worker.run_iteration().await);
        assert_eq!(queue.message_count(), 1);
    }

    #[tokio::test]
    async fn test_disposed_worker_stops() {
        let queue = Arc::new(InMemoryQueue::new());
        let worker = test_worker(queue, HandlerRegistry::new());

        worker.dispose();
        assert!(worker.is_disposed());
        assert!(!worker.run_iteration().await);
    }
}
