//! Process-wide bound on concurrent renders.
//!
//! [`ConcurrencyLimiter`] wraps a `tokio::sync::Semaphore`. A limit of zero
//! means unbounded: [`acquire`](ConcurrencyLimiter::acquire) never suspends.
//!
//! Permits are RAII guards. Dropping a [`Permit`] returns its unit to the
//! budget, so the release happens exactly once on every exit path: normal
//! return, error, panic unwinding, or abort of the task holding it.
//!
//! Waiting is cancel-safe. Dropping an `acquire()` future before it resolves
//! leaves the budget untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::telemetry;
use crate::{ManifoldError, Result};

/// Configuration for the concurrency limiter.
#[derive(Debug, Clone, Default)]
pub struct LimiterConfig {
    /// Maximum concurrent renders. Zero means unbounded. Default: 0.
    pub max_concurrent: usize,
    /// Give up waiting for a permit after this long. `None` waits until the
    /// caller is cancelled. Default: `None`.
    pub acquire_timeout: Option<Duration>,
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit (zero = unbounded).
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    /// Set the maximum time to wait for a permit.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Build from a signed limit, as accepted on the command line.
    /// Any value below 1 means unbounded.
    pub fn from_signed_limit(limit: i64) -> Self {
        let max_concurrent = if limit < 1 {
            0
        } else {
            usize::try_from(limit).unwrap_or(usize::MAX)
        };
        Self {
            max_concurrent: clamp_limit(max_concurrent),
            acquire_timeout: None,
        }
    }
}

fn clamp_limit(limit: usize) -> usize {
    if limit > Semaphore::MAX_PERMITS {
        warn!(
            requested = limit,
            max = Semaphore::MAX_PERMITS,
            "parallelism limit too large, clamping"
        );
        Semaphore::MAX_PERMITS
    } else {
        limit
    }
}

/// Bounded counting resource shared by every generation.
pub struct ConcurrencyLimiter {
    semaphore: Option<Arc<Semaphore>>,
    limit: usize,
    acquire_timeout: Option<Duration>,
    in_use: Arc<AtomicUsize>,
}

/// One unit of the concurrency budget. Released on drop.
#[must_use = "the permit is released as soon as it is dropped"]
#[derive(Debug)]
pub struct Permit {
    _inner: Option<OwnedSemaphorePermit>,
    in_use: Arc<AtomicUsize>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let held = self.in_use.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!(telemetry::PERMITS_IN_USE).set(held as f64);
    }
}

impl ConcurrencyLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        let limit = clamp_limit(config.max_concurrent);
        let semaphore = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        Self {
            semaphore,
            limit,
            acquire_timeout: config.acquire_timeout,
            in_use: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A limiter that never blocks.
    pub fn unbounded() -> Self {
        Self::new(&LimiterConfig::default())
    }

    /// Configured limit, or `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|_| self.limit)
    }

    /// Permits currently free, or `None` when unbounded.
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Wait for a permit.
    ///
    /// Fails with [`ManifoldError::ResourceExhausted`] if the configured
    /// acquire timeout elapses first. No permit is granted on failure.
    pub async fn acquire(&self) -> Result<Permit> {
        let Some(semaphore) = &self.semaphore else {
            return Ok(self.grant(None));
        };

        if semaphore.available_permits() == 0 {
            debug!(limit = self.limit, "parallelism limit reached, waiting for a permit");
        }

        let acquire = Arc::clone(semaphore).acquire_owned();
        let acquired = match self.acquire_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                Ok(result) => result,
                Err(_) => {
                    metrics::counter!(telemetry::PERMIT_TIMEOUTS_TOTAL).increment(1);
                    return Err(ManifoldError::ResourceExhausted(format!(
                        "no generation slot became free within {timeout:?} (limit {})",
                        self.limit
                    )));
                }
            },
            None => acquire.await,
        };

        match acquired {
            Ok(permit) => Ok(self.grant(Some(permit))),
            Err(_) => {
                metrics::counter!(telemetry::PERMIT_TIMEOUTS_TOTAL).increment(1);
                Err(ManifoldError::ResourceExhausted(
                    "concurrency limiter is closed".into(),
                ))
            }
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        match &self.semaphore {
            None => Some(self.grant(None)),
            Some(semaphore) => Arc::clone(semaphore)
                .try_acquire_owned()
                .ok()
                .map(|permit| self.grant(Some(permit))),
        }
    }

    /// Return a permit to the budget. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Stop granting permits. Pending and future acquires fail.
    pub fn close(&self) {
        if let Some(semaphore) = &self.semaphore {
            semaphore.close();
        }
    }

    fn grant(&self, inner: Option<OwnedSemaphorePermit>) -> Permit {
        let held = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::gauge!(telemetry::PERMITS_IN_USE).set(held as f64);
        Permit {
            _inner: inner,
            in_use: Arc::clone(&self.in_use),
        }
    }
}
