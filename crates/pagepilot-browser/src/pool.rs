//! Bounded pool of isolated browser contexts.
//!
//! The pool is the single shared mutable resource in the engine. All
//! acquisition goes through a fair semaphore (waiters are served FIFO), and
//! release happens in the guard's `Drop`, so a context is returned on every
//! exit path without cooperation from the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pagepilot_core::{AutomationError, FingerprintProfile, PoolConfig};

use crate::driver::PageDriver;
use crate::profile::ProfileRotation;

/// Creates fresh page drivers for the pool.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    /// Create an isolated page driver with the given profile applied.
    async fn create(
        &self,
        profile: &FingerprintProfile,
    ) -> Result<Arc<dyn PageDriver>, AutomationError>;
}

/// A pooled browser execution context.
pub struct BrowserContext {
    /// Context ID.
    pub id: Uuid,
    /// Profile currently applied to the context.
    pub profile: FingerprintProfile,
    /// When the underlying browser context was created.
    pub created_at: Instant,
    /// When the context last finished work.
    pub last_used_at: Instant,
    /// The page driver bound to this context.
    pub driver: Arc<dyn PageDriver>,
}

impl BrowserContext {
    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}

/// Pool observability snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Contexts currently bound to tasks.
    pub active: usize,
    /// Healthy contexts waiting in the free set.
    pub idle: usize,
    /// Callers blocked in `acquire`.
    pub waiting: usize,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ContextFactory>,
    rotation: ProfileRotation,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<BrowserContext>>,
    active: AtomicUsize,
    waiting: AtomicUsize,
}

impl PoolInner {
    fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.config.max_lifetime_secs)
    }

    fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.config.idle_ttl_secs)
    }

    /// Destroy a context, closing its driver off the caller's path.
    fn destroy(&self, ctx: BrowserContext) {
        debug!("Destroying context {}", ctx.id);
        let driver = ctx.driver;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { driver.close().await });
        }
    }
}

/// Bounded, FIFO-fair pool of browser contexts.
pub struct BrowserContextPool {
    inner: Arc<PoolInner>,
}

impl BrowserContextPool {
    /// Create a pool. Contexts are built lazily on first acquisition.
    pub fn new(config: PoolConfig, factory: Arc<dyn ContextFactory>) -> Self {
        let rotation = ProfileRotation::new(config.profiles.clone());
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                rotation,
                semaphore,
                idle: Mutex::new(VecDeque::new()),
                active: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Acquire a context, waiting up to the configured timeout.
    pub async fn acquire(&self) -> Result<PooledContext, AutomationError> {
        self.acquire_timeout(Duration::from_millis(self.inner.config.acquire_timeout_ms))
            .await
    }

    /// Acquire a context, waiting up to `timeout` for a free slot.
    ///
    /// Waiters are admitted in FIFO order; expiry surfaces `PoolExhausted`.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledContext, AutomationError> {
        let started = Instant::now();
        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = tokio::time::timeout(
            timeout,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await;
        self.inner.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(AutomationError::Internal("pool closed".to_string()));
            }
            Err(_) => {
                return Err(AutomationError::PoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let profile = self.inner.rotation.next();
        // On creation failure the permit drops with this frame, freeing
        // the slot for the next waiter.
        let ctx = match self.take_idle(&profile).await {
            Some(ctx) => ctx,
            None => self.create_context(profile).await?,
        };

        self.inner.active.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Acquired context {} after {}ms",
            ctx.id,
            started.elapsed().as_millis()
        );
        Ok(PooledContext {
            inner: self.inner.clone(),
            ctx: Some(ctx),
            discard: false,
            _permit: permit,
        })
    }

    /// Pop a reusable idle context, destroying stale ones along the way.
    async fn take_idle(&self, profile: &FingerprintProfile) -> Option<BrowserContext> {
        loop {
            let candidate = self.inner.idle.lock().pop_front()?;
            if candidate.age() >= self.inner.max_lifetime()
                || candidate.idle_for() >= self.inner.idle_ttl()
            {
                self.inner.destroy(candidate);
                continue;
            }

            let mut ctx = candidate;
            match ctx.driver.apply_profile(profile).await {
                Ok(()) => {
                    ctx.profile = profile.clone();
                    return Some(ctx);
                }
                Err(e) => {
                    // Context no longer responds; replace it.
                    warn!("Context {} failed profile rotation: {}", ctx.id, e);
                    self.inner.destroy(ctx);
                }
            }
        }
    }

    async fn create_context(
        &self,
        profile: FingerprintProfile,
    ) -> Result<BrowserContext, AutomationError> {
        let driver = self.inner.factory.create(&profile).await?;
        let now = Instant::now();
        let ctx = BrowserContext {
            id: Uuid::new_v4(),
            profile,
            created_at: now,
            last_used_at: now,
            driver,
        };
        debug!("Created context {}", ctx.id);
        Ok(ctx)
    }

    /// Snapshot of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.inner.active.load(Ordering::SeqCst),
            idle: self.inner.idle.lock().len(),
            waiting: self.inner.waiting.load(Ordering::SeqCst),
        }
    }

    /// Evict idle contexts past their idle TTL or max lifetime.
    pub fn sweep(&self) {
        let mut kept = VecDeque::new();
        let mut expired = Vec::new();
        {
            let mut idle = self.inner.idle.lock();
            while let Some(ctx) = idle.pop_front() {
                if ctx.idle_for() >= self.inner.idle_ttl()
                    || ctx.age() >= self.inner.max_lifetime()
                {
                    expired.push(ctx);
                } else {
                    kept.push_back(ctx);
                }
            }
            *idle = kept;
        }
        for ctx in expired {
            info!("Sweeping stale context {}", ctx.id);
            self.inner.destroy(ctx);
        }
    }

    /// Spawn the periodic sweep task; aborts when the handle is dropped
    /// by the caller.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        let interval = Duration::from_secs(self.inner.config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.sweep();
            }
        })
    }

    /// Close every idle context. Active contexts close when released.
    pub async fn shutdown(&self) {
        let drained: Vec<BrowserContext> = self.inner.idle.lock().drain(..).collect();
        for ctx in drained {
            ctx.driver.close().await;
        }
        info!("Context pool shut down");
    }
}

impl Clone for BrowserContextPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// RAII guard over an acquired context.
///
/// Dropping the guard returns the context to the free set, or destroys it
/// when it was flagged for discard or exceeded its lifetime. The semaphore
/// permit is released after the context is returned.
pub struct PooledContext {
    inner: Arc<PoolInner>,
    ctx: Option<BrowserContext>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledContext {
    // `ctx` is only taken inside `Drop`, so it is always present here.
    fn context(&self) -> &BrowserContext {
        self.ctx.as_ref().expect("context present until drop")
    }

    /// The driver bound to this context.
    pub fn driver(&self) -> Arc<dyn PageDriver> {
        self.context().driver.clone()
    }

    /// Context ID.
    pub fn id(&self) -> Uuid {
        self.context().id
    }

    /// Profile applied for this acquisition.
    pub fn profile(&self) -> &FingerprintProfile {
        &self.context().profile
    }

    /// Destroy the context on release instead of returning it.
    ///
    /// Used after protocol-level failures that leave the browser context in
    /// an unknown state.
    pub fn flag_discard(&mut self) {
        self.discard = true;
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            self.inner.active.fetch_sub(1, Ordering::SeqCst);
            ctx.last_used_at = Instant::now();
            if self.discard || ctx.age() >= self.inner.max_lifetime() {
                self.inner.destroy(ctx);
            } else {
                self.inner.idle.lock().push_back(ctx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFactory;

    fn test_config(max_size: usize) -> PoolConfig {
        PoolConfig {
            max_size,
            acquire_timeout_ms: 1_000,
            idle_ttl_secs: 300,
            max_lifetime_secs: 1_800,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_release_reuses_context() {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(test_config(2), factory.clone());

        let guard = pool.acquire().await.unwrap();
        let first_id = guard.id();
        assert_eq!(pool.stats().active, 1);
        drop(guard);

        assert_eq!(pool.stats(), PoolStats { active: 0, idle: 1, waiting: 0 });

        let guard = pool.acquire().await.unwrap();
        assert_eq!(guard.id(), first_id);
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(test_config(1), factory);

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire_timeout(Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(AutomationError::PoolExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_waiters_served_fifo() {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(test_config(1), factory);

        let held = pool.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3u32 {
            let pool = pool.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let guard = pool
                    .acquire_timeout(Duration::from_secs(5))
                    .await
                    .unwrap();
                order.lock().push(i);
                drop(guard);
            }));
            // Give each waiter time to join the queue before the next.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_discard_destroys_context() {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(test_config(1), factory.clone());

        let mut guard = pool.acquire().await.unwrap();
        guard.flag_discard();
        drop(guard);
        tokio::task::yield_now().await;

        assert_eq!(pool.stats().idle, 0);
        let _guard = pool.acquire().await.unwrap();
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_active_never_exceeds_max() {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(test_config(3), factory);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = pool.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(tokio::spawn(async move {
                let _guard = pool.acquire_timeout(Duration::from_secs(10)).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_contexts() {
        let factory = Arc::new(FakeFactory::default());
        let config = PoolConfig {
            idle_ttl_secs: 0,
            ..test_config(2)
        };
        let pool = BrowserContextPool::new(config, factory);

        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.stats().idle, 1);

        pool.sweep();
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_profile_rotates_across_acquisitions() {
        let factory = Arc::new(FakeFactory::default());
        let pool = BrowserContextPool::new(test_config(1), factory);

        let first = pool.acquire().await.unwrap().profile().user_agent.clone();
        let second = pool.acquire().await.unwrap().profile().user_agent.clone();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_factory_failure_frees_slot() {
        let factory = Arc::new(FakeFactory::default());
        factory.fail_next_create();
        let pool = BrowserContextPool::new(test_config(1), factory.clone());

        assert!(pool.acquire_timeout(Duration::from_millis(100)).await.is_err());
        // The slot was not leaked by the failed creation.
        let guard = pool.acquire_timeout(Duration::from_millis(100)).await;
        assert!(guard.is_ok());
        assert_eq!(factory.created(), 1);
    }
}
