//! Telemetry metric name constants.
//!
//! Centralised metric names for manifold operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `manifold_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status`: "ok" or "error"
//! - `outcome`: what a cache hit returned, "success" or "failure"
//! - `kind`: error kind on failed generations, see [`ManifoldError::kind`](crate::ManifoldError::kind)

/// Total renders dispatched to the rendering collaborator.
///
/// Labels: `status` ("ok" | "error"), `kind` (errors only).
pub const GENERATIONS_TOTAL: &str = "manifold_generations_total";

/// Render duration in seconds (permit held).
pub const GENERATION_DURATION_SECONDS: &str = "manifold_generation_duration_seconds";

/// Total result cache hits.
///
/// Labels: `outcome` ("success" | "failure").
pub const CACHE_HITS_TOTAL: &str = "manifold_cache_hits_total";

/// Total result cache misses.
pub const CACHE_MISSES_TOTAL: &str = "manifold_cache_misses_total";

/// Total cache entries removed by invalidation signals.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "manifold_cache_invalidations_total";

/// Total requests rejected because the target's breaker was open.
pub const BREAKER_REJECTIONS_TOTAL: &str = "manifold_breaker_rejections_total";

/// Total Closed/HalfOpen → Open transitions.
pub const BREAKER_OPENED_TOTAL: &str = "manifold_breaker_opened_total";

/// Total callers that joined an already in-flight generation.
pub const SINGLEFLIGHT_JOINS_TOTAL: &str = "manifold_singleflight_joins_total";

/// Concurrency permits currently held.
pub const PERMITS_IN_USE: &str = "manifold_permits_in_use";

/// Total permit acquisitions that gave up (timeout or limiter closed).
pub const PERMIT_TIMEOUTS_TOTAL: &str = "manifold_permit_timeouts_total";
