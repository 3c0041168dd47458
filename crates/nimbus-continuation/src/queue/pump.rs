//! Queue pump with a local prefetch cache
//!
//! Decouples workers from backing-queue latency by keeping a warm in-process
//! cache of fetched messages. The cache is purely an optimization: a miss
//! always falls back to a direct single-item fetch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::repository::{QueueError, QueueMessage, QueueRepository};
use crate::contract::JobPayload;

/// Queue pump shared by all workers in a process
///
/// The cache is refilled opportunistically by a periodic populate loop; its
/// target length is the current worker-pool size, read from a shared gauge
/// the pool manager maintains.
pub struct QueuePump {
    queue: Arc<dyn QueueRepository>,
    cache: Mutex<VecDeque<QueueMessage>>,
    pool_size: Arc<AtomicUsize>,
    disposed: AtomicBool,
}

impl QueuePump {
    /// Create a new pump over a backing queue.
    ///
    /// `pool_size` is the gauge tracking the current worker count; the pool
    /// manager updates it as workers come and go.
    pub fn new(queue: Arc<dyn QueueRepository>, pool_size: Arc<AtomicUsize>) -> Self {
        Self {
            queue,
            cache: Mutex::new(VecDeque::new()),
            pool_size,
            disposed: AtomicBool::new(false),
        }
    }

    /// Refill the cache if it has dropped below half the target length.
    ///
    /// The half-target threshold avoids refill churn while still topping up
    /// before exhaustion. An empty fetch is not an error; the cache simply
    /// stays under-filled until the next call. Returns whether the pump is
    /// still active.
    #[instrument(skip(self))]
    pub async fn try_populate_cache(&self) -> Result<bool, QueueError> {
        if self.is_disposed() {
            return Ok(false);
        }

        let target = self.pool_size.load(Ordering::Relaxed);
        let cached = self.cache.lock().len();

        if cached * 2 < target {
            let wanted = target - cached;
            let fetched = self.queue.fetch_batch(wanted).await?;
            if !fetched.is_empty() {
                debug!(count = fetched.len(), target, "refilled pump cache");
                self.cache.lock().extend(fetched);
            }
        }

        Ok(!self.is_disposed())
    }

    /// Pop a message from the cache, falling back to a direct fetch on miss.
    pub async fn get_message(&self) -> Result<Option<QueueMessage>, QueueError> {
        if let Some(message) = self.cache.lock().pop_front() {
            return Ok(Some(message));
        }

        // Slow path: guarantees forward progress even if prefetch lags.
        self.queue.fetch_one().await
    }

    /// Delete a fully processed message from the backing queue.
    pub async fn delete_message(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.queue.delete(message).await
    }

    /// Serialize a payload and submit it, optionally delayed.
    pub async fn add_payload(
        &self,
        payload: &JobPayload,
        visibility_delay: Option<Duration>,
    ) -> Result<(), QueueError> {
        let body = serde_json::to_string(payload)?;
        self.queue.add(body, visibility_delay).await
    }

    /// Number of messages currently cached.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Stop the pump; subsequent populate calls report inactive.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    /// Whether the pump has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;

    /// Queue double that records the count of every batch fetch.
    struct RecordingQueue {
        inner: InMemoryQueue,
        batch_requests: PlMutex<Vec<usize>>,
    }

    impl RecordingQueue {
        fn new() -> Self {
            Self {
                inner: InMemoryQueue::new(),
                batch_requests: PlMutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl QueueRepository for RecordingQueue {
        async fn fetch_batch(&self, count: usize) -> Result<Vec<QueueMessage>, QueueError> {
            self.batch_requests.lock().push(count);
            self.inner.fetch_batch(count).await
        }

        async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
            self.inner.delete(message).await
        }

        async fn add(
            &self,
            body: String,
            visibility_delay: Option<Duration>,
        ) -> Result<(), QueueError> {
            self.inner.add(body, visibility_delay).await
        }
    }

    fn gauge(size: usize) -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(size))
    }

    async fn enqueue_chains(queue: &RecordingQueue, count: usize) {
        for i in 0..count {
            let payload = JobPayload::new_chain("provision-vm", json!({ "n": i }));
            queue
                .add(serde_json::to_string(&payload).unwrap(), None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_refill_requests_missing_count() {
        // Cache 1, pool size 5: below the half threshold, so 4 are requested.
        let queue = Arc::new(RecordingQueue::new());
        enqueue_chains(&queue, 10).await;
        let pump = QueuePump::new(queue.clone(), gauge(5));

        pump.try_populate_cache().await.unwrap();
        assert_eq!(queue.batch_requests.lock().as_slice(), &[5]);
        assert_eq!(pump.cached_len(), 5);

        // Drain down to 1 cached message.
        for _ in 0..4 {
            pump.get_message().await.unwrap().unwrap();
        }
        assert_eq!(pump.cached_len(), 1);

        pump.try_populate_cache().await.unwrap();
        assert_eq!(queue.batch_requests.lock().as_slice(), &[5, 4]);
        assert_eq!(pump.cached_len(), 5);
    }

    #[tokio::test]
    async fn test_no_refill_at_or_above_half_target() {
        let queue = Arc::new(RecordingQueue::new());
        enqueue_chains(&queue, 10).await;
        let pump = QueuePump::new(queue.clone(), gauge(5));

        pump.try_populate_cache().await.unwrap();
        assert_eq!(pump.cached_len(), 5);

        // Drain to 3: 3 * 2 >= 5, so no fetch happens.
        pump.get_message().await.unwrap().unwrap();
        pump.get_message().await.unwrap().unwrap();
        pump.try_populate_cache().await.unwrap();

        assert_eq!(queue.batch_requests.lock().as_slice(), &[5]);
    }

    #[tokio::test]
    async fn test_zero_pool_size_never_fetches() {
        let queue = Arc::new(RecordingQueue::new());
        enqueue_chains(&queue, 3).await;
        let pump = QueuePump::new(queue.clone(), gauge(0));

        let active = pump.try_populate_cache().await.unwrap();
        assert!(active);
        assert!(queue.batch_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_to_direct_fetch() {
        let queue = Arc::new(RecordingQueue::new());
        enqueue_chains(&queue, 1).await;
        let pump = QueuePump::new(queue.clone(), gauge(5));

        // Nothing cached; the message still comes through.
        let message = pump.get_message().await.unwrap();
        assert!(message.is_some());
    }

    #[tokio::test]
    async fn test_empty_queue_leaves_cache_underfilled() {
        let queue = Arc::new(RecordingQueue::new());
        let pump = QueuePump::new(queue.clone(), gauge(5));

        let active = pump.try_populate_cache().await.unwrap();
        assert!(active);
        assert_eq!(pump.cached_len(), 0);
        assert!(pump.get_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disposed_pump_reports_inactive() {
        let queue = Arc::new(RecordingQueue::new());
        enqueue_chains(&queue, 2).await;
        let pump = QueuePump::new(queue.clone(), gauge(5));

        pump.dispose();
        let active = pump.try_populate_cache().await.unwrap();
        assert!(!active);
        assert!(queue.batch_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_add_payload_serializes_wire_shape() {
        let queue = Arc::new(RecordingQueue::new());
        let pump = QueuePump::new(queue.clone(), gauge(1));

        let payload = JobPayload::new_chain("provision-vm", json!({"size": "M"}));
        pump.add_payload(&payload, None).await.unwrap();

        let message = pump.get_message().await.unwrap().unwrap();
        let roundtrip: JobPayload = serde_json::from_str(&message.body).unwrap();
        assert_eq!(roundtrip, payload);
    }
}
