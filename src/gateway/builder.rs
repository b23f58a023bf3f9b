//! Builder for configuring gateway instances

use std::path::PathBuf;
use std::sync::Arc;

use super::EmbeddedGateway;
use crate::cache::{CacheConfig, ResultCache, RevisionMetadataCache};
use crate::generation::{
    BreakerConfig, CancelPolicy, ConcurrencyLimiter, FailureTracker, GenerationConfig,
    LimiterConfig, Orchestrator, TargetKey,
};
use crate::render::{DirectoryRenderer, ManifestRenderer};
use crate::{ManifoldError, Result};

/// Main entry point for creating gateway instances.
pub struct Manifold;

impl Manifold {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> ManifoldBuilder {
        ManifoldBuilder::new()
    }
}

/// Builder for configuring gateway instances.
pub struct ManifoldBuilder {
    renderer: Option<Arc<dyn ManifestRenderer>>,
    generation: GenerationConfig,
    target_key: Option<Arc<dyn TargetKey>>,
    metadata_cache_entries: Option<u64>,
}

impl ManifoldBuilder {
    pub fn new() -> Self {
        Self {
            renderer: None,
            generation: GenerationConfig::default(),
            target_key: None,
            metadata_cache_entries: None,
        }
    }

    /// Use a custom rendering collaborator.
    pub fn renderer(mut self, renderer: Arc<dyn ManifestRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Render plain manifests from repositories checked out under `root`.
    pub fn directory(self, root: impl Into<PathBuf>) -> Self {
        self.renderer(Arc::new(DirectoryRenderer::new(root)))
    }

    /// Replace the whole generation config.
    pub fn generation(mut self, config: GenerationConfig) -> Self {
        self.generation = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.generation.cache = config;
        self
    }

    pub fn breaker(mut self, config: BreakerConfig) -> Self {
        self.generation.breaker = config;
        self
    }

    pub fn limiter(mut self, config: LimiterConfig) -> Self {
        self.generation.limiter = config;
        self
    }

    /// Maximum concurrent renders; anything below 1 means unbounded.
    pub fn parallelism_limit(mut self, limit: i64) -> Self {
        let timeout = self.generation.limiter.acquire_timeout;
        self.generation.limiter = LimiterConfig::from_signed_limit(limit);
        self.generation.limiter.acquire_timeout = timeout;
        self
    }

    pub fn cancel_policy(mut self, policy: CancelPolicy) -> Self {
        self.generation.cancel_policy = policy;
        self
    }

    /// Override how failures are grouped into breaker targets.
    ///
    /// Takes precedence over [`BreakerConfig::scope`].
    pub fn target_key(mut self, key: Arc<dyn TargetKey>) -> Self {
        self.target_key = Some(key);
        self
    }

    /// Capacity of the revision metadata cache (default: 1,000).
    pub fn metadata_cache_entries(mut self, n: u64) -> Self {
        self.metadata_cache_entries = Some(n);
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<EmbeddedGateway> {
        let renderer = self
            .renderer
            .ok_or_else(|| ManifoldError::Configuration("no renderer configured".into()))?;
        let config = self.generation;

        let breaker = match self.target_key {
            Some(key) => FailureTracker::with_target_key(&config.breaker, key),
            None => FailureTracker::new(&config.breaker),
        };
        let orchestrator = Orchestrator::from_parts(
            renderer,
            Arc::new(ResultCache::new(&config.cache)),
            Arc::new(breaker),
            Arc::new(ConcurrencyLimiter::new(&config.limiter)),
            config.cancel_policy,
        );
        let metadata = match self.metadata_cache_entries {
            Some(n) => RevisionMetadataCache::with_max_entries(n),
            None => RevisionMetadataCache::new(),
        };

        Ok(EmbeddedGateway::new(Arc::new(orchestrator), Arc::new(metadata)))
    }
}

impl Default for ManifoldBuilder {
    fn default() -> Self {
        Self::new()
    }
}
