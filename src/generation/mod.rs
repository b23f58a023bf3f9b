//! Manifest generation pipeline.
//!
//! [`Orchestrator`] composes the result cache, [`FailureTracker`],
//! [`SingleFlight`] and [`ConcurrencyLimiter`] around a
//! [`ManifestRenderer`](crate::render::ManifestRenderer).

pub mod breaker;
pub mod limiter;
pub mod orchestrator;
pub mod singleflight;

pub use breaker::{BreakerConfig, BreakerState, FailureScope, FailureState, FailureTracker, TargetKey};
pub use limiter::{ConcurrencyLimiter, LimiterConfig, Permit};
pub use orchestrator::Orchestrator;
pub use singleflight::{CancelPolicy, SingleFlight};

use crate::cache::CacheConfig;

/// Everything needed to build an [`Orchestrator`].
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub limiter: LimiterConfig,
    pub cancel_policy: CancelPolicy,
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.cancel_policy = policy;
        self
    }
}
