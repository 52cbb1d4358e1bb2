//! Worker pool
//!
//! Owns one worker per configured device and hands them out exclusively.
//! Idle workers sit in a lock-free `ArrayQueue`; a semaphore with one permit
//! per idle worker suspends callers while the queue is empty and wakes them
//! in FIFO order.
//!
//! Invariant: a permit is only ever added after its worker has been pushed,
//! so holding a permit guarantees a worker can be popped.

use crate::inference::classifier::{Classification, ClassifierError, ClassifierLoader, SentimentClassifier};
use crate::inference::device::{Device, DeviceFamily, DeviceInventory};
use crate::infrastructure::config::PoolConfig;
use crate::log_pool;
use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::Level;

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Config(String),
    #[error("Failed to load worker {worker_id} on {device}: {source}")]
    Load {
        worker_id: usize,
        device: String,
        #[source]
        source: ClassifierError,
    },
    #[error("Worker pool is closed")]
    Closed,
    #[error("No worker became available within {0:?}")]
    AcquireTimeout(Duration),
    #[error("Too many callers waiting for a worker ({0})")]
    QueueFull(usize),
    #[error("Idle queue empty while a permit was held")]
    Inconsistent,
}

/// One exclusive handle to a loaded model
pub struct Worker {
    id: usize,
    device: Device,
    classifier: Box<dyn SentimentClassifier>,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run inference on this worker's model
    pub async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        self.classifier.classify(text).await
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
}

/// Bounded pool of exclusive workers
pub struct WorkerPool {
    idle: ArrayQueue<Worker>,
    permits: Semaphore,
    devices: Vec<Device>,
    family: DeviceFamily,
    waiting: AtomicUsize,
    acquire_timeout: Option<Duration>,
    max_waiting: Option<usize>,
}

impl WorkerPool {
    /// Load one worker per device and fill the idle queue
    ///
    /// # Errors
    /// `Config` when the requested parallelism is invalid for the device
    /// family, `Load` when any worker fails to load. No partial pool is
    /// returned.
    pub fn initialize(
        config: &PoolConfig,
        inventory: DeviceInventory,
        loader: &dyn ClassifierLoader,
    ) -> Result<Self, PoolError> {
        let num_workers = config
            .num_workers
            .unwrap_or_else(|| inventory.default_parallelism());

        if num_workers == 0 {
            return Err(PoolError::Config("num_workers must be at least 1".to_string()));
        }
        if num_workers > 1 && !inventory.family.supports_multiplexing() {
            return Err(PoolError::Config(format!(
                "only cuda supports multiple workers, {} does not (requested {})",
                inventory.family, num_workers
            )));
        }
        if num_workers > inventory.count {
            return Err(PoolError::Config(format!(
                "requested {} workers but only {} {} device(s) available",
                num_workers, inventory.count, inventory.family
            )));
        }

        tracing::info!(target: "pool", "Initializing worker pool with {} worker(s) on {}", num_workers, inventory.family);

        let devices = inventory.devices(num_workers);
        let idle = ArrayQueue::new(num_workers);

        for (id, device) in devices.iter().copied().enumerate() {
            tracing::info!(target: "pool", "Loading model on {}", device);
            let classifier = loader.load(device).map_err(|source| PoolError::Load {
                worker_id: id,
                device: device.to_string(),
                source,
            })?;

            if idle.push(Worker { id, device, classifier }).is_err() {
                return Err(PoolError::Inconsistent);
            }
        }

        tracing::info!(target: "pool", "All {} workers initialized", num_workers);

        Ok(Self {
            idle,
            permits: Semaphore::new(num_workers),
            devices,
            family: inventory.family,
            waiting: AtomicUsize::new(0),
            acquire_timeout: config.acquire_timeout_ms.map(Duration::from_millis),
            max_waiting: config.max_waiting,
        })
    }

    /// Take an idle worker, suspending until one is released
    ///
    /// Dropping the returned guard puts the worker back. Dropping the future
    /// while it waits leaves the pool untouched.
    ///
    /// # Errors
    /// `AcquireTimeout` / `QueueFull` only when the corresponding limits are
    /// configured; `Closed` after [`WorkerPool::close`].
    pub async fn acquire(&self) -> Result<WorkerGuard<'_>, PoolError> {
        match self.permits.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
            Err(TryAcquireError::NoPermits) => self.wait_for_permit().await?,
        }

        self.take_idle()
    }

    /// Take an idle worker without waiting
    pub fn try_acquire(&self) -> Option<WorkerGuard<'_>> {
        let permit = self.permits.try_acquire().ok()?;
        permit.forget();
        self.take_idle().ok()
    }

    async fn wait_for_permit(&self) -> Result<(), PoolError> {
        let previously_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiter = WaitingSlot(&self.waiting);

        if let Some(limit) = self.max_waiting {
            if previously_waiting >= limit {
                log_pool!(Level::WARN, "Rejecting caller: {} already waiting for a worker", previously_waiting);
                return Err(PoolError::QueueFull(previously_waiting));
            }
        }

        let permit = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.permits.acquire())
                .await
                .map_err(|_| PoolError::AcquireTimeout(limit))?,
            None => self.permits.acquire().await,
        }
        .map_err(|_| PoolError::Closed)?;

        permit.forget();
        Ok(())
    }

    fn take_idle(&self) -> Result<WorkerGuard<'_>, PoolError> {
        match self.idle.pop() {
            Some(worker) => {
                tracing::debug!(target: "pool", "Worker {} acquired", worker.id);
                Ok(WorkerGuard {
                    pool: self,
                    worker: Some(worker),
                })
            }
            None => Err(PoolError::Inconsistent),
        }
    }

    /// Return a worker and wake one waiting caller
    fn release(&self, worker: Worker) {
        let id = worker.id;
        match self.idle.push(worker) {
            Ok(()) => {
                self.permits.add_permits(1);
                tracing::debug!(target: "pool", "Worker {} released", id);
            }
            Err(_) => {
                // Capacity equals the number of workers ever created
                log_pool!(Level::ERROR, "Idle queue full while releasing worker {}", id);
            }
        }
    }

    /// Stop handing out workers; current and future waiters get `Closed`
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Number of workers owned by the pool
    pub fn size(&self) -> usize {
        self.devices.len()
    }

    /// Number of workers currently idle
    pub fn available(&self) -> usize {
        self.idle.len()
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Ready when at least one worker exists
    pub fn is_ready(&self) -> bool {
        self.size() > 0 && !self.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.size();
        let idle = self.available().min(total);
        PoolStats {
            total,
            idle,
            in_use: total - idle,
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the waiting counter on every exit path of a wait
struct WaitingSlot<'a>(&'a AtomicUsize);

impl Drop for WaitingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive access to one worker; releases it on drop
pub struct WorkerGuard<'a> {
    pool: &'a WorkerPool,
    worker: Option<Worker>,
}

impl WorkerGuard<'_> {
    /// Return the worker to the pool now
    pub fn release(mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}

impl std::fmt::Debug for WorkerGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WorkerGuard").field(&self.worker).finish()
    }
}

impl Deref for WorkerGuard<'_> {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        // Only `release`/`drop` take the worker, and both consume the guard
        match &self.worker {
            Some(worker) => worker,
            None => unreachable!("worker guard used after release"),
        }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cpu_inventory, cuda_inventory, MockLoader};
    use proptest::prelude::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready};

    fn pool_config(num_workers: usize) -> PoolConfig {
        PoolConfig {
            num_workers: Some(num_workers),
            ..PoolConfig::default()
        }
    }

    fn pool(num_workers: usize) -> WorkerPool {
        WorkerPool::initialize(
            &pool_config(num_workers),
            cuda_inventory(num_workers),
            &MockLoader::positive(),
        )
        .unwrap()
    }

    #[test]
    fn test_initialize_fills_idle_queue() {
        let pool = pool(3);
        assert_eq!(pool.size(), 3);
        assert_eq!(
            pool.stats(),
            PoolStats { total: 3, idle: 3, in_use: 0, waiting: 0 }
        );
        assert!(pool.is_ready());
        let ordinals: Vec<usize> = pool.devices().iter().map(|d| d.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_default_parallelism_uses_device_count() {
        let pool = WorkerPool::initialize(
            &PoolConfig::default(),
            cuda_inventory(2),
            &MockLoader::positive(),
        )
        .unwrap();
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_multiple_workers_rejected_on_cpu() {
        let result = WorkerPool::initialize(&pool_config(2), cpu_inventory(), &MockLoader::positive());
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_more_workers_than_devices_rejected() {
        let result =
            WorkerPool::initialize(&pool_config(4), cuda_inventory(2), &MockLoader::positive());
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = WorkerPool::initialize(&pool_config(0), cpu_inventory(), &MockLoader::positive());
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_load_failure_is_fatal() {
        let loader = MockLoader::positive().fail_on_ordinal(1);
        let result = WorkerPool::initialize(&pool_config(2), cuda_inventory(2), &loader);
        match result {
            Err(PoolError::Load { worker_id, device, .. }) => {
                assert_eq!(worker_id, 1);
                assert_eq!(device, "cuda:1");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected load failure"),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = pool(2);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().in_use, 2);
        assert!(pool.try_acquire().is_none());

        a.release();
        assert_eq!(pool.stats().idle, 1);
        drop(b);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn test_acquire_suspends_until_release() {
        let pool = pool(1);
        let held = pool.acquire().await.unwrap();

        let mut second = tokio_test::task::spawn(pool.acquire());
        assert_pending!(second.poll());
        assert_eq!(pool.stats().waiting, 1);

        held.release();
        assert!(second.is_woken());
        let guard = assert_ready!(second.poll()).unwrap();
        assert_eq!(guard.id(), 0);
        assert_eq!(pool.stats().in_use, 1);
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn test_waiters_served_in_order() {
        let pool = pool(1);
        let held = pool.acquire().await.unwrap();

        let mut first = tokio_test::task::spawn(pool.acquire());
        let mut second = tokio_test::task::spawn(pool.acquire());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        drop(held);
        assert_pending!(second.poll());
        let guard = assert_ready!(first.poll()).unwrap();
        drop(guard);
        assert!(assert_ready!(second.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_release_on_error_path() {
        let loader = MockLoader::positive().fail_on_text("boom");
        let pool = WorkerPool::initialize(&pool_config(1), cpu_inventory(), &loader).unwrap();

        async fn run(pool: &WorkerPool, text: &str) -> Result<Classification, ClassifierError> {
            let worker = pool.acquire().await.expect("worker");
            worker.classify(text).await
        }

        assert!(run(&pool, "boom").await.is_err());
        assert_eq!(pool.stats().idle, 1);
        assert!(run(&pool, "fine").await.is_ok());
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(loader.stats().calls(), 2);
    }

    #[tokio::test]
    async fn test_dropping_pending_acquire_does_not_leak() {
        let pool = pool(1);
        let held = pool.acquire().await.unwrap();

        {
            let mut pending = tokio_test::task::spawn(pool.acquire());
            assert_pending!(pending.poll());
        }
        assert_eq!(pool.stats().waiting, 0);

        drop(held);
        assert!(pool.try_acquire().is_some());
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let config = PoolConfig {
            num_workers: Some(1),
            acquire_timeout_ms: Some(20),
            ..PoolConfig::default()
        };
        let pool = WorkerPool::initialize(&config, cpu_inventory(), &MockLoader::positive()).unwrap();

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn test_queue_depth_limit() {
        let config = PoolConfig {
            num_workers: Some(1),
            max_waiting: Some(1),
            ..PoolConfig::default()
        };
        let pool = WorkerPool::initialize(&config, cpu_inventory(), &MockLoader::positive()).unwrap();
        let _held = pool.acquire().await.unwrap();

        let mut waiter = tokio_test::task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::QueueFull(1)));
        assert_eq!(pool.stats().waiting, 1);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let pool = pool(1);
        let held = pool.acquire().await.unwrap();

        let mut waiter = tokio_test::task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        pool.close();
        assert!(matches!(assert_ready!(waiter.poll()), Err(PoolError::Closed)));
        assert!(!pool.is_ready());

        // Held workers still go back to the idle queue
        drop(held);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_serializes_inference() {
        let loader = MockLoader::positive().with_delay(Duration::from_millis(20));
        let pool = Arc::new(
            WorkerPool::initialize(&pool_config(1), cpu_inventory(), &loader).unwrap(),
        );

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let worker = pool.acquire().await?;
                    let result = worker.classify(&format!("request {i}")).await;
                    Ok::<_, PoolError>(result)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_ok());
        }

        let stats = loader.stats();
        assert_eq!(stats.calls(), 5);
        assert_eq!(stats.max_in_flight(), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_use_never_exceeds_size() {
        let loader = MockLoader::positive().with_delay(Duration::from_millis(5));
        let pool = Arc::new(
            WorkerPool::initialize(&pool_config(3), cuda_inventory(3), &loader).unwrap(),
        );

        let handles: Vec<_> = (0..24)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let worker = pool.acquire().await.unwrap();
                    let stats = pool.stats();
                    assert!(stats.in_use <= stats.total);
                    assert_eq!(stats.idle + stats.in_use, stats.total);
                    worker.classify("hello").await.unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(loader.stats().max_in_flight() <= 3);
        assert_eq!(pool.stats().idle, 3);
    }

    proptest! {
        #[test]
        fn prop_idle_plus_in_use_is_size(
            size in 1usize..6,
            ops in proptest::collection::vec(any::<bool>(), 0..64),
        ) {
            let pool = WorkerPool::initialize(
                &pool_config(size),
                cuda_inventory(size),
                &MockLoader::positive(),
            ).unwrap();
            let mut held = Vec::new();

            for take in ops {
                if take {
                    match pool.try_acquire() {
                        Some(guard) => held.push(guard),
                        None => {
                            prop_assert_eq!(held.len(), size);
                        }
                    }
                } else if let Some(guard) = held.pop() {
                    guard.release();
                }

                let stats = pool.stats();
                prop_assert_eq!(stats.idle + stats.in_use, size);
                prop_assert_eq!(stats.in_use, held.len());
            }
        }
    }
}
