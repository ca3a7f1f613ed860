//! The Browser Pool: bounded concurrent browser acquisition with transparent
//! local<->cloud failover.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore};
use uxr_core::{BrowserMode, EntityId};

/// A leased browser session. `release()` is idempotent and safe to call more
/// than once (including implicitly, via `Drop`), matching the session-manager
/// shutdown idiom this pool is grounded on.
pub struct Lease {
    session_id: EntityId,
    pub mode: BrowserMode,
    pub live_view_url: Option<String>,
    pool: Arc<PoolInner>,
    released: AtomicBool,
}

impl Lease {
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.permits.add_permits(1);
        self.pool.active_sessions.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(session_id = %self.session_id, "released browser lease");
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub mode: BrowserMode,
    pub active_sessions: u32,
    pub uptime_s: u64,
    pub crash_count: u32,
    pub failover_active: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowserPoolError {
    #[error("browser acquisition deadline ({0:?}) exceeded while waiting for a free slot")]
    AcquisitionTimeout(Duration),
    #[error("cloud browser provider is unavailable: {0}")]
    CloudUnavailable(String),
}

struct PoolInner {
    permits: Semaphore,
    active_sessions: AtomicU32,
    crash_count: AtomicU32,
    started_at: Instant,
    cloud_failures: Mutex<VecDeque<Instant>>,
    failover_until: Mutex<Option<Instant>>,
    last_default_mode: AtomicBool, // true == cloud
}

/// Factory trait so the pool can be tested without a real browser backend:
/// `acquire_cloud`/`acquire_local` return a live-view URL (cloud only) or
/// fail to simulate provider outages.
#[async_trait::async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn acquire_local(&self, session_id: EntityId) -> Result<()>;
    async fn acquire_cloud(&self, session_id: EntityId) -> Result<String>;
}

pub struct BrowserPool<P: BrowserProvider> {
    provider: Arc<P>,
    inner: Arc<PoolInner>,
    failover_cooldown: Duration,
    acquire_deadline: Duration,
    consecutive_failure_threshold: u32,
    failure_window: Duration,
}

impl<P: BrowserProvider> BrowserPool<P> {
    pub fn new(
        provider: P,
        max_concurrent_sessions: usize,
        failover_cooldown: Duration,
        acquire_deadline: Duration,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            inner: Arc::new(PoolInner {
                permits: Semaphore::new(max_concurrent_sessions),
                active_sessions: AtomicU32::new(0),
                crash_count: AtomicU32::new(0),
                started_at: Instant::now(),
                cloud_failures: Mutex::new(VecDeque::new()),
                failover_until: Mutex::new(None),
                last_default_mode: AtomicBool::new(false),
            }),
            failover_cooldown,
            acquire_deadline,
            consecutive_failure_threshold: 3,
            failure_window: Duration::from_secs(300),
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let failover_active = self.is_failover_active().await;
        PoolStats {
            mode: if self.inner.last_default_mode.load(Ordering::SeqCst) {
                BrowserMode::Cloud
            } else {
                BrowserMode::Local
            },
            active_sessions: self.inner.active_sessions.load(Ordering::SeqCst),
            uptime_s: self.inner.started_at.elapsed().as_secs(),
            crash_count: self.inner.crash_count.load(Ordering::SeqCst),
            failover_active,
        }
    }

    async fn is_failover_active(&self) -> bool {
        let mut guard = self.inner.failover_until.lock().await;
        match *guard {
            Some(until) if until > Instant::now() => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    async fn record_cloud_failure(&self) {
        let mut failures = self.inner.cloud_failures.lock().await;
        let now = Instant::now();
        failures.push_back(now);
        while failures
            .front()
            .is_some_and(|first| now.duration_since(*first) > self.failure_window)
        {
            failures.pop_front();
        }
        if failures.len() as u32 >= self.consecutive_failure_threshold {
            let mut failover = self.inner.failover_until.lock().await;
            *failover = Some(now + self.failover_cooldown);
            tracing::warn!(
                "browser pool entering failover_active for {:?} after {} consecutive cloud failures",
                self.failover_cooldown,
                failures.len()
            );
        }
    }

    /// Acquires a lease, blocking on the bounded semaphore up to
    /// `acquire_deadline`. `requested_mode` is downgraded to local
    /// transparently while failover is active.
    pub async fn acquire(
        &self,
        requested_mode: BrowserMode,
        session_id: EntityId,
    ) -> Result<Lease, BrowserPoolError> {
        let permit = tokio::time::timeout(self.acquire_deadline, self.inner.permits.acquire())
            .await
            .map_err(|_| BrowserPoolError::AcquisitionTimeout(self.acquire_deadline))?;
        // The semaphore permit itself is released by returning it to the
        // pool on `Lease::release`, not by dropping the borrowed guard here.
        permit.unwrap().forget();
        self.inner.active_sessions.fetch_add(1, Ordering::SeqCst);

        let effective_mode = if self.is_failover_active().await {
            BrowserMode::Local
        } else {
            requested_mode
        };
        self.inner
            .last_default_mode
            .store(effective_mode == BrowserMode::Cloud, Ordering::SeqCst);

        let live_view_url = match effective_mode {
            BrowserMode::Local => {
                if let Err(err) = self.provider.acquire_local(session_id).await {
                    self.inner.active_sessions.fetch_sub(1, Ordering::SeqCst);
                    self.inner.permits.add_permits(1);
                    self.inner.crash_count.fetch_add(1, Ordering::SeqCst);
                    return Err(BrowserPoolError::CloudUnavailable(err.to_string()));
                }
                None
            }
            BrowserMode::Cloud => match self.provider.acquire_cloud(session_id).await {
                Ok(url) => Some(url),
                Err(err) => {
                    self.record_cloud_failure().await;
                    // Fail over to local for this acquisition rather than
                    // failing the session outright.
                    if let Err(local_err) = self.provider.acquire_local(session_id).await {
                        self.inner.active_sessions.fetch_sub(1, Ordering::SeqCst);
                        self.inner.permits.add_permits(1);
                        return Err(BrowserPoolError::CloudUnavailable(format!(
                            "cloud failed ({err}), local fallback failed ({local_err})"
                        )));
                    }
                    None
                }
            },
        };

        Ok(Lease {
            session_id,
            mode: effective_mode,
            live_view_url,
            pool: Arc::clone(&self.inner),
            released: AtomicBool::new(false),
        })
    }
}
