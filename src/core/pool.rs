use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::core::config::{OverloadPolicy, ServerConfig};
use crate::utils::{DhtError, Result};

/// Bounded pool of execution contexts for connection handling.
///
/// Backed by a runtime owned by the server: `min_pool_size` worker threads
/// carry connection I/O, handlers run on the blocking pool which grows up to
/// `max_pool_size` threads and retires idle ones after `idle_timeout`. A
/// semaphore with `max_pool_size` permits caps concurrent exchanges.
pub struct WorkerPool {
    name: String,
    runtime: Runtime,
    handle: PoolHandle,
}

/// Cheap handle used by the accept loop to admit and submit work.
#[derive(Clone)]
pub struct PoolHandle {
    handle: Handle,
    permits: Arc<Semaphore>,
    capacity: usize,
    policy: OverloadPolicy,
}

impl WorkerPool {
    pub fn new(config: &ServerConfig, name: &str) -> Result<Self> {
        debug!(
            "Creating worker pool {} with size ranging from {} to {} and an idle timeout of {:?}",
            name,
            config.min_pool_size,
            config.max_pool_size,
            config.idle_timeout()
        );

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.min_pool_size)
            .max_blocking_threads(config.max_pool_size)
            .thread_keep_alive(config.idle_timeout())
            .thread_name(format!("{}-worker", name))
            .enable_all()
            .build()
            .map_err(|e| DhtError::IoError(format!("Failed to build worker pool: {}", e)))?;

        let handle = PoolHandle {
            handle: runtime.handle().clone(),
            permits: Arc::new(Semaphore::new(config.max_pool_size)),
            capacity: config.max_pool_size,
            policy: config.overload_policy,
        };

        Ok(Self {
            name: name.to_string(),
            runtime,
            handle,
        })
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn runtime_handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Stop taking work and wait up to `drain` for in-flight exchanges.
    ///
    /// Exchanges are never cancelled: whatever is still running after `drain`
    /// finishes on a background thread, which releases the runtime once the
    /// last permit is back. Must not be called from within an async context.
    pub fn shutdown(self, drain: Duration) {
        let active = self.handle.active();
        if active == 0 {
            self.release();
            return;
        }

        info!("Waiting up to {:?} for {} in-flight exchanges", drain, active);
        let drained = self
            .runtime
            .block_on(async { timeout(drain, self.handle.wait_idle()).await.is_ok() });

        if drained {
            debug!("Worker pool {} drained", self.name);
            self.release();
            return;
        }

        warn!(
            "Worker pool {} still has {} exchanges running after {:?}, letting them finish in the background",
            self.name,
            self.handle.active(),
            drain
        );

        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-drain", name))
            .spawn(move || {
                self.runtime.block_on(self.handle.wait_idle());
                debug!("Worker pool {} drained in the background", self.name);
                self.release();
            });

        if let Err(e) = spawned {
            // Pool was dropped along with the closure, remaining work is lost
            error!("Could not spawn drain thread for worker pool {}: {}", name, e);
        }
    }

    /// Hand the whole shutdown to a background thread.
    ///
    /// Safe to call from within an async context.
    pub fn shutdown_in_background(self, drain: Duration) {
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-shutdown", name))
            .spawn(move || self.shutdown(drain));

        if let Err(e) = spawned {
            error!("Could not spawn shutdown thread for worker pool {}: {}", name, e);
        }
    }

    fn release(self) {
        self.handle.permits.close();
        self.runtime.shutdown_timeout(Duration::from_millis(100));
    }
}

impl PoolHandle {
    /// Take a worker slot if one is free right now.
    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }

    /// Wait for a worker slot. `None` once the pool is closed.
    pub async fn wait_for_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    /// Resolves once every slot is free again.
    async fn wait_idle(&self) {
        let _all = self.permits.acquire_many(self.capacity as u32).await;
    }

    /// Run `task` on the pool, releasing `permit` when it completes.
    pub fn submit<F>(&self, permit: OwnedSemaphorePermit, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(async move {
            task.await;
            drop(permit);
        });
    }

    pub fn active(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverloadPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tokio::sync::oneshot;

    fn config(max: usize, policy: OverloadPolicy) -> ServerConfig {
        ServerConfig {
            min_pool_size: 1,
            max_pool_size: max,
            overload_policy: policy,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_try_admit_when_full() {
        let pool = WorkerPool::new(&config(1, OverloadPolicy::Reject), "test-reject").unwrap();
        let handle = pool.handle();

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = handle.try_admit().unwrap();
        handle.submit(first, async move {
            let _ = release_rx.await;
        });

        assert_eq!(handle.active(), 1);
        assert!(handle.try_admit().is_none());

        release_tx.send(()).unwrap();
        pool.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_wait_for_slot_after_release() {
        let pool = WorkerPool::new(&config(1, OverloadPolicy::Block), "test-block").unwrap();
        let handle = pool.handle();

        let first = handle.try_admit().unwrap();
        handle.submit(first, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let second = pool
            .runtime
            .block_on(async { timeout(Duration::from_secs(5), handle.wait_for_slot()).await })
            .unwrap();
        assert!(second.is_some());

        drop(second);
        pool.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_waits_for_in_flight_work() {
        let pool = WorkerPool::new(&config(4, OverloadPolicy::Block), "test-drain").unwrap();
        let handle = pool.handle();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let permit = handle.try_admit().unwrap();
            let done = done.clone();
            handle.submit(permit, async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.shutdown(Duration::from_secs(5));
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_work_outliving_drain_still_completes() {
        let pool = WorkerPool::new(&config(2, OverloadPolicy::Block), "test-linger").unwrap();
        let handle = pool.handle();
        let done = Arc::new(AtomicUsize::new(0));

        let permit = handle.try_admit().unwrap();
        let finished = done.clone();
        handle.submit(permit, async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            finished.fetch_add(1, Ordering::SeqCst);
        });

        let started = Instant::now();
        pool.shutdown(Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(done.load(Ordering::SeqCst), 0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while done.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "lingering work was cancelled");
            thread::sleep(Duration::from_millis(10));
        }
    }
}
