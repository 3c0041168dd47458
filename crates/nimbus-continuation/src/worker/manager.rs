//! Self-scaling worker pool
//!
//! The pool manager owns worker lifecycles: it spawns the initial pool,
//! replaces disposed workers, and runs a periodic sizing loop that scales
//! the pool between bounds using each worker's activity level. The
//! scale-down band sits narrow near zero and the scale-up band wide near the
//! activity cap; keeping the bands asymmetric is what prevents oscillation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::worker::{Worker, WorkerConfig};
use crate::engine::{Activator, HandlerRegistry};
use crate::queue::{QueuePump, QueueRepository};
use crate::scheduler::TaskScheduler;

/// Worker pool manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolManagerConfig {
    /// Lower bound on pool size
    pub min_worker_count: usize,

    /// Initial pool size, also the top-up level when the pool falls under min
    pub target_worker_count: usize,

    /// Upper bound on pool size
    pub max_worker_count: usize,

    /// Workers below this activity level are removed while the pool is above min
    pub scale_down_threshold: u32,

    /// Workers above this activity level add a peer while the pool is under max
    pub scale_up_threshold: u32,

    /// Interval between sizing passes
    #[serde(with = "duration_millis")]
    pub sizing_interval: Duration,

    /// Interval between pump cache refills
    #[serde(with = "duration_millis")]
    pub cache_refill_interval: Duration,

    /// Configuration applied to every spawned worker
    pub worker: WorkerConfig,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            min_worker_count: 3,
            target_worker_count: 5,
            max_worker_count: 10,
            scale_down_threshold: 25,
            scale_up_threshold: 175,
            sizing_interval: Duration::from_secs(30),
            cache_refill_interval: Duration::from_secs(10),
            worker: WorkerConfig::default(),
        }
    }
}

impl PoolManagerConfig {
    /// Create a new pool manager configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool bounds
    pub fn with_worker_counts(mut self, min: usize, target: usize, max: usize) -> Self {
        self.min_worker_count = min;
        self.target_worker_count = target;
        self.max_worker_count = max;
        self
    }

    /// Set the scaling bands
    pub fn with_scale_thresholds(mut self, down: u32, up: u32) -> Self {
        self.scale_down_threshold = down;
        self.scale_up_threshold = up;
        self
    }

    /// Set the sizing pass interval
    pub fn with_sizing_interval(mut self, interval: Duration) -> Self {
        self.sizing_interval = interval;
        self
    }

    /// Set the pump cache refill interval
    pub fn with_cache_refill_interval(mut self, interval: Duration) -> Self {
        self.cache_refill_interval = interval;
        self
    }

    /// Set the per-worker configuration
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolManagerError> {
        if self.min_worker_count == 0 {
            return Err(PoolManagerError::InvalidConfig(
                "min_worker_count must be at least 1".into(),
            ));
        }
        if self.min_worker_count > self.target_worker_count
            || self.target_worker_count > self.max_worker_count
        {
            return Err(PoolManagerError::InvalidConfig(
                "worker counts must satisfy min <= target <= max".into(),
            ));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(PoolManagerError::InvalidConfig(
                "scale_down_threshold must be less than scale_up_threshold".into(),
            ));
        }
        if self.scale_up_threshold > self.worker.max_activity_level {
            return Err(PoolManagerError::InvalidConfig(
                "scale_up_threshold must not exceed max_activity_level".into(),
            ));
        }
        Ok(())
    }
}

/// Worker pool manager errors
#[derive(Debug, thiserror::Error)]
pub enum PoolManagerError {
    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Manager already started
    #[error("worker pool manager is already started")]
    AlreadyStarted,
}

struct ManagerInner {
    pump: Arc<QueuePump>,
    registry: Arc<HandlerRegistry>,
    activator: Arc<Activator>,
    scheduler: Arc<dyn TaskScheduler>,
    config: PoolManagerConfig,
    pool: DashMap<String, Arc<Worker>>,
    pool_size: Arc<AtomicUsize>,
    started: AtomicBool,
    disposed: AtomicBool,
}

/// Creates workers and scales the pool between bounds
///
/// The pool is a concurrent map keyed by worker identity; every mutation is
/// a single atomic map operation, so the sizing loop's scan never needs a
/// lock over the whole pool. A shared gauge tracks the live pool size for
/// the pump's cache-target calculation. The manager is a cheap handle and
/// can be cloned freely.
///
/// # Example
///
/// ```ignore
/// let manager = WorkerPoolManager::new(
///     queue,
///     registry,
///     Arc::new(TokioScheduler),
///     PoolManagerConfig::default(),
/// )?;
/// manager.start()?;
///
/// // Submit a chain through the same engine.
/// let payload = JobPayload::new_chain("provision-vm", input);
/// let handler = manager.registry().resolve_required(&payload)?;
/// manager.activator().execute(handler.as_ref(), "provision-vm", payload.input).await?;
/// ```
#[derive(Clone)]
pub struct WorkerPoolManager {
    inner: Arc<ManagerInner>,
}

impl WorkerPoolManager {
    /// Create a new pool manager over a backing queue.
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        registry: Arc<HandlerRegistry>,
        scheduler: Arc<dyn TaskScheduler>,
        config: PoolManagerConfig,
    ) -> Result<Self, PoolManagerError> {
        config.validate()?;

        let pool_size = Arc::new(AtomicUsize::new(0));
        let pump = Arc::new(QueuePump::new(queue, pool_size.clone()));
        let activator = Arc::new(Activator::new(pump.clone()));

        Ok(Self {
            inner: Arc::new(ManagerInner {
                pump,
                registry,
                activator,
                scheduler,
                config,
                pool: DashMap::new(),
                pool_size,
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// The pump the pool's workers consume from.
    pub fn pump(&self) -> &Arc<QueuePump> {
        &self.inner.pump
    }

    /// The activator, for submitting new chains into the same engine.
    pub fn activator(&self) -> &Arc<Activator> {
        &self.inner.activator
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Current number of live workers.
    pub fn worker_count(&self) -> usize {
        self.inner.pool.len()
    }

    /// Identities of the live workers.
    pub fn worker_ids(&self) -> Vec<String> {
        self.inner.pool.iter().map(|e| e.key().clone()).collect()
    }

    /// Activity level per live worker.
    pub fn activity_levels(&self) -> Vec<(String, u32)> {
        self.inner
            .pool
            .iter()
            .map(|e| (e.key().clone(), e.value().activity_level()))
            .collect()
    }

    /// Whether shutdown has been requested.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Relaxed)
    }

    /// Spawn the initial pool and schedule the periodic loops.
    pub fn start(&self) -> Result<(), PoolManagerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(PoolManagerError::AlreadyStarted);
        }

        info!(
            target_workers = self.inner.config.target_worker_count,
            "starting worker pool"
        );

        for _ in 0..self.inner.config.target_worker_count {
            self.start_worker();
        }

        let manager = self.clone();
        self.inner.scheduler.run_loop(
            "worker_pool_sizing",
            Some(self.inner.config.sizing_interval),
            Box::new(move || {
                let manager = manager.clone();
                Box::pin(async move {
                    if manager.is_disposed() {
                        return false;
                    }
                    manager.manage_pool_size();
                    true
                })
            }),
        );

        let pump = self.inner.pump.clone();
        self.inner.scheduler.run_loop(
            "pump_populate_cache",
            Some(self.inner.config.cache_refill_interval),
            Box::new(move || {
                let pump = pump.clone();
                Box::pin(async move {
                    match pump.try_populate_cache().await {
                        Ok(active) => active,
                        Err(e) => {
                            // One failed refill never stops the loop.
                            warn!(error = %e, "pump cache refill failed");
                            !pump.is_disposed()
                        }
                    }
                })
            }),
        );

        Ok(())
    }

    /// One sizing pass over the pool.
    ///
    /// Underused workers are retired while the pool is above min, saturated
    /// workers gain a peer while it is under max, disposed workers are
    /// replaced, and the bounds are enforced afterwards.
    pub fn manage_pool_size(&self) {
        let inner = &self.inner;
        let snapshot: Vec<(String, Arc<Worker>)> = inner
            .pool
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut removed = 0usize;
        let mut added = 0usize;
        let mut replaced = 0usize;

        for (id, worker) in snapshot {
            if worker.is_disposed() {
                // A dead slot is replaced rather than scaled.
                if inner.pool.remove(&id).is_some() {
                    self.sync_pool_gauge();
                    self.start_worker();
                    replaced += 1;
                }
                continue;
            }

            let level = worker.activity_level();
            if level < inner.config.scale_down_threshold
                && inner.pool.len() > inner.config.min_worker_count
            {
                self.end_worker(&id);
                removed += 1;
            } else if level > inner.config.scale_up_threshold
                && inner.pool.len() < inner.config.max_worker_count
            {
                self.start_worker();
                added += 1;
            }
        }

        if inner.pool.len() < inner.config.min_worker_count {
            while inner.pool.len() < inner.config.target_worker_count {
                self.start_worker();
                added += 1;
            }
        }

        while inner.pool.len() > inner.config.max_worker_count {
            // Bind the key first so the map iterator is released before the
            // removal takes the shard lock again.
            let victim = inner.pool.iter().next().map(|e| e.key().clone());
            match victim {
                Some(id) => {
                    self.end_worker(&id);
                    removed += 1;
                }
                None => break,
            }
        }

        debug!(
            pool_size = inner.pool.len(),
            added, removed, replaced, "sizing pass complete"
        );
    }

    /// Create a worker, add it to the pool, and schedule its run loop.
    pub fn start_worker(&self) {
        let inner = &self.inner;
        let worker = Arc::new(Worker::new(
            inner.pump.clone(),
            inner.registry.clone(),
            inner.activator.clone(),
            inner.config.worker.clone(),
        ));

        inner.pool.insert(worker.id().to_string(), worker.clone());
        self.sync_pool_gauge();
        debug!(worker_id = %worker.id(), pool_size = inner.pool.len(), "worker started");

        let loop_worker = worker.clone();
        inner.scheduler.run_loop(
            worker.id(),
            None,
            Box::new(move || {
                let worker = loop_worker.clone();
                Box::pin(async move { worker.run_iteration().await })
            }),
        );
    }

    /// Remove a worker from the pool, requesting disposal if needed.
    pub fn end_worker(&self, id: &str) {
        if let Some((_, worker)) = self.inner.pool.remove(id) {
            if !worker.is_disposed() {
                worker.dispose();
            }
            self.sync_pool_gauge();
            debug!(worker_id = %id, pool_size = self.inner.pool.len(), "worker ended");
        }
    }

    /// Dispose all workers and stop the periodic loops.
    ///
    /// Cooperative: in-flight steps run to completion before each worker's
    /// loop observes its flag.
    pub fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(pool_size = self.inner.pool.len(), "shutting down worker pool");
        for id in self.worker_ids() {
            self.end_worker(&id);
        }
        self.inner.pump.dispose();
    }

    fn sync_pool_gauge(&self) {
        self.inner
            .pool_size
            .store(self.inner.pool.len(), Ordering::Relaxed);
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
    use crate::queue::InMemoryQueue;
    use crate::scheduler::LoopFn;
    use parking_lot::Mutex;

    /// Scheduler double that records scheduled loops without running them.
    #[derive(Default)]
    struct RecordingScheduler {
        loops: Mutex<Vec<(String, Option<Duration>)>>,
    }

    impl RecordingScheduler {
        fn loop_names(&self) -> Vec<String> {
            self.loops.lock().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    impl TaskScheduler for RecordingScheduler {
        fn run_loop(&self, name: &str, interval: Option<Duration>, _task: LoopFn) {
            self.loops.lock().push((name.to_string(), interval));
        }
    }

    fn test_manager(config: PoolManagerConfig) -> (WorkerPoolManager, Arc<RecordingScheduler>) {
        let scheduler = Arc::new(RecordingScheduler::default());
        let manager = WorkerPoolManager::new(
            Arc::new(InMemoryQueue::new()),
            Arc::new(HandlerRegistry::new()),
            scheduler.clone(),
            config,
        )
        .unwrap();
        (manager, scheduler)
    }

    fn set_all_activity(manager: &WorkerPoolManager, level: u32) {
        for entry in manager.inner.pool.iter() {
            entry.value().set_activity_level(level);
        }
    }

    #[test]
    fn test_default_config() {
        let config = PoolManagerConfig::default();
        assert_eq!(config.min_worker_count, 3);
        assert_eq!(config.target_worker_count, 5);
        assert_eq!(config.max_worker_count, 10);
        assert_eq!(config.scale_down_threshold, 25);
        assert_eq!(config.scale_up_threshold, 175);
        assert_eq!(config.sizing_interval, Duration::from_secs(30));
        assert_eq!(config.cache_refill_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_config_builder_and_validation() {
        let config = PoolManagerConfig::new()
            .with_worker_counts(2, 4, 8)
            .with_scale_thresholds(10, 190)
            .with_sizing_interval(Duration::from_secs(15));
        assert!(config.validate().is_ok());

        let inverted_counts = PoolManagerConfig::new().with_worker_counts(5, 3, 10);
        assert!(inverted_counts.validate().is_err());

        let zero_min = PoolManagerConfig::new().with_worker_counts(0, 5, 10);
        assert!(zero_min.validate().is_err());

        // The asymmetric bands must not collapse.
        let collapsed_bands = PoolManagerConfig::new().with_scale_thresholds(100, 100);
        assert!(collapsed_bands.validate().is_err());

        let band_above_cap = PoolManagerConfig::new().with_scale_thresholds(25, 300);
        assert!(band_above_cap.validate().is_err());
    }

    #[test]
    fn test_start_spawns_target_workers_and_loops() {
        let (manager, scheduler) = test_manager(PoolManagerConfig::default());

        manager.start().unwrap();

        assert_eq!(manager.worker_count(), 5);
        let names = scheduler.loop_names();
        // One loop per worker plus the sizing and cache-refill loops.
        assert_eq!(names.len(), 7);
        assert!(names.iter().any(|n| n == "worker_pool_sizing"));
        assert!(names.iter().any(|n| n == "pump_populate_cache"));

        assert!(matches!(
            manager.start(),
            Err(PoolManagerError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_idle_pool_shrinks_to_min() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();

        set_all_activity(&manager, 0);
        manager.manage_pool_size();

        assert_eq!(manager.worker_count(), 3);
    }

    #[test]
    fn test_saturated_pool_grows_to_max() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();

        set_all_activity(&manager, 200);
        manager.manage_pool_size();
        assert_eq!(manager.worker_count(), 10);

        // Another saturated pass stays bounded.
        set_all_activity(&manager, 200);
        manager.manage_pool_size();
        assert_eq!(manager.worker_count(), 10);
    }

    #[test]
    fn test_mid_band_pool_is_stable() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();

        set_all_activity(&manager, 100);
        manager.manage_pool_size();

        assert_eq!(manager.worker_count(), 5);
    }

    #[test]
    fn test_disposed_worker_is_replaced() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();
        set_all_activity(&manager, 100);

        let victim = manager.worker_ids().remove(0);
        manager
            .inner
            .pool
            .get(&victim)
            .expect("victim should exist")
            .dispose();

        manager.manage_pool_size();

        assert_eq!(manager.worker_count(), 5);
        assert!(!manager.worker_ids().contains(&victim));
        for entry in manager.inner.pool.iter() {
            assert!(!entry.value().is_disposed());
        }
    }

    #[test]
    fn test_pool_below_min_tops_up_to_target() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();

        let mut ids = manager.worker_ids();
        ids.truncate(3);
        for id in ids {
            manager.end_worker(&id);
        }
        assert_eq!(manager.worker_count(), 2);

        manager.manage_pool_size();
        assert_eq!(manager.worker_count(), 5);
    }

    #[test]
    fn test_pool_above_max_is_trimmed() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();

        for _ in 0..7 {
            manager.start_worker();
        }
        assert_eq!(manager.worker_count(), 12);

        set_all_activity(&manager, 100);
        manager.manage_pool_size();
        assert_eq!(manager.worker_count(), 10);
    }

    #[test]
    fn test_pool_gauge_tracks_worker_count() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();
        assert_eq!(manager.inner.pool_size.load(Ordering::Relaxed), 5);

        set_all_activity(&manager, 0);
        manager.manage_pool_size();
        assert_eq!(manager.inner.pool_size.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_shutdown_disposes_everything() {
        let (manager, _) = test_manager(PoolManagerConfig::default());
        manager.start().unwrap();

        let workers: Vec<Arc<Worker>> = manager
            .inner
            .pool
            .iter()
            .map(|e| e.value().clone())
            .collect();

        manager.shutdown();

        assert_eq!(manager.worker_count(), 0);
        assert!(manager.is_disposed());
        assert!(manager.pump().is_disposed());
        for worker in workers {
            assert!(worker.is_disposed());
        }
    }
}
