//! End-to-end generation flow.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use super::{
    CancelPolicy, ConcurrencyLimiter, FailureTracker, GenerationConfig, SingleFlight,
};
use crate::cache::{Epoch, Fingerprint, ResultCache, fingerprint};
use crate::render::ManifestRenderer;
use crate::telemetry;
use crate::types::{GenerationRequest, InvalidationSignal, ManifestResponse};
use crate::Result;

/// Serves generation requests through cache, breaker, single-flight and
/// concurrency limit, in that order.
///
/// Cheap to share: every collaborator sits behind an `Arc`.
pub struct Orchestrator {
    renderer: Arc<dyn ManifestRenderer>,
    cache: Arc<ResultCache>,
    breaker: Arc<FailureTracker>,
    limiter: Arc<ConcurrencyLimiter>,
    flights: SingleFlight<Arc<ManifestResponse>>,
}

impl Orchestrator {
    /// Build an orchestrator with fresh state from `config`.
    pub fn new(renderer: Arc<dyn ManifestRenderer>, config: &GenerationConfig) -> Self {
        Self::from_parts(
            renderer,
            Arc::new(ResultCache::new(&config.cache)),
            Arc::new(FailureTracker::new(&config.breaker)),
            Arc::new(ConcurrencyLimiter::new(&config.limiter)),
            config.cancel_policy,
        )
    }

    /// Build an orchestrator over existing shared state.
    pub fn from_parts(
        renderer: Arc<dyn ManifestRenderer>,
        cache: Arc<ResultCache>,
        breaker: Arc<FailureTracker>,
        limiter: Arc<ConcurrencyLimiter>,
        cancel_policy: CancelPolicy,
    ) -> Self {
        Self {
            renderer,
            cache,
            breaker,
            limiter,
            flights: SingleFlight::new(cancel_policy),
        }
    }

    pub fn renderer(&self) -> &Arc<dyn ManifestRenderer> {
        &self.renderer
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<FailureTracker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.limiter
    }

    /// Generations currently running (after coalescing).
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Produce the manifests for `request`.
    ///
    /// A cached outcome (success or cached failure) is returned without any
    /// work. Otherwise the target's breaker is consulted and the render is
    /// coalesced with identical in-flight requests. Requests arriving after
    /// an invalidation of the repository never join a render that started
    /// before it.
    #[instrument(
        name = "orchestrator.generate",
        skip(self, request),
        fields(repo = %request.repo_url, revision = %request.revision, path = %request.path)
    )]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Arc<ManifestResponse>> {
        request.validate()?;
        let key = fingerprint(request);

        if request.no_cache {
            debug!(fingerprint = %key.short(), "cache lookup skipped");
        } else if let Some(entry) = self.cache.get(&key).await {
            debug!(fingerprint = %key.short(), failure = entry.is_failure(), "cache hit");
            return entry.outcome;
        }

        let target = self.breaker.target_for(request, &key);
        self.breaker.check(&target)?;

        let epoch = self.cache.epoch(&request.repo_url);
        let job = GenerationJob {
            key,
            epoch,
            target,
            request: request.clone(),
            renderer: Arc::clone(&self.renderer),
            cache: Arc::clone(&self.cache),
            breaker: Arc::clone(&self.breaker),
            limiter: Arc::clone(&self.limiter),
        };
        self.flights
            .execute(key.salted(epoch.value()), move || job.run())
            .await
    }

    /// Apply an invalidation signal to the result cache. Returns the number
    /// of entries removed.
    pub async fn invalidate(&self, signal: &InvalidationSignal) -> usize {
        let removed = match signal {
            InvalidationSignal::Repository(url) | InvalidationSignal::CredentialsChanged(url) => {
                self.cache.invalidate_repository(url).await
            }
            InvalidationSignal::KeyringChanged | InvalidationSignal::All => self.cache.clear().await,
        };
        debug!(?signal, removed, "invalidation applied");
        removed
    }
}

/// The leader's unit of work, owned by the spawned task.
struct GenerationJob {
    key: Fingerprint,
    epoch: Epoch,
    target: String,
    request: GenerationRequest,
    renderer: Arc<dyn ManifestRenderer>,
    cache: Arc<ResultCache>,
    breaker: Arc<FailureTracker>,
    limiter: Arc<ConcurrencyLimiter>,
}

impl GenerationJob {
    async fn run(self) -> Result<Arc<ManifestResponse>> {
        // Another flight may have filled the cache between our lookup and
        // becoming leader.
        if !self.request.no_cache
            && let Some(entry) = self.cache.get(&self.key).await
        {
            return entry.outcome;
        }

        let permit = self.limiter.acquire().await?;
        let started = Instant::now();
        let rendered = self.renderer.render(&self.request).await;
        drop(permit);
        metrics::histogram!(telemetry::GENERATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match rendered {
            Ok(response) => {
                let response = Arc::new(response);
                self.cache
                    .put_success_at(
                        self.key,
                        &self.request.repo_url,
                        Arc::clone(&response),
                        self.epoch,
                    )
                    .await;
                self.breaker.record_success(&self.target);
                metrics::counter!(telemetry::GENERATIONS_TOTAL, "status" => "ok").increment(1);
                Ok(response)
            }
            Err(err) => {
                warn!(
                    renderer = self.renderer.name(),
                    fingerprint = %self.key.short(),
                    error = %err,
                    "manifest generation failed"
                );
                self.breaker.record_failure(&self.target, &err);
                self.cache
                    .put_failure_at(self.key, &self.request.repo_url, err.clone(), self.epoch)
                    .await;
                metrics::counter!(
                    telemetry::GENERATIONS_TOTAL,
                    "status" => "error",
                    "kind" => err.kind()
                )
                .increment(1);
                Err(err)
            }
        }
    }
}
