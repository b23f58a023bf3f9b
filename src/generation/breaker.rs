//! Failure tracking and generation pause (circuit breaker).
//!
//! Repositories that are malformed or unreachable would otherwise be
//! re-rendered on every reconciliation tick. [`FailureTracker`] counts
//! consecutive failures per target and pauses generation for that target
//! once a threshold is reached.
//!
//! # States
//!
//! ```text
//!            failure (count < threshold)
//!              ┌──────┐
//!              ▼      │
//!          ┌────────┐ │   failure (count >= threshold)   ┌────────┐
//!   ──────►│ Closed │─┴────────────────────────────────►│  Open  │◄─┐
//!          └────────┘                                   └────────┘  │
//!              ▲                                   window/budget    │
//!              │ success                           exhausted        │ failure
//!              │                                        ▼           │
//!              │                                   ┌──────────┐     │
//!              └───────────────────────────────────│ HalfOpen │─────┘
//!                                                  └──────────┘
//! ```
//!
//! The pause window has two independent dimensions, either of which may be
//! disabled with zero: a wall-clock duration and a number of requests to
//! reject. Whichever runs out first ends the pause.
//!
//! Time is read from `tokio::time::Instant`, so tests can drive the window
//! with a paused runtime clock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::ops::compute::Op;
use moka::sync::Cache;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Longest pause honoured; longer windows end here instead of overflowing.
pub const MAX_PAUSE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Deadline of a pause window starting at `now`, or `None` when the time
/// dimension is disabled.
fn pause_deadline(now: Instant, pause: Duration) -> Option<Instant> {
    if pause.is_zero() {
        return None;
    }
    now.checked_add(pause.min(MAX_PAUSE))
}

use crate::cache::Fingerprint;
use crate::telemetry;
use crate::types::GenerationRequest;
use crate::{ManifoldError, Result};

/// Upper bound on tracked targets. Evicting a failing target only resets it.
const MAX_TRACKED_TARGETS: u64 = 10_000;

/// Which requests share a failure counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureScope {
    /// Exactly identical requests.
    Fingerprint,
    /// Any path of the same repository at the same revision.
    #[default]
    Revision,
    /// Every request against the repository.
    Repository,
}

/// Derives the breaker key for a request.
///
/// Implement this to plug in a custom scope; [`FailureScope`] covers the
/// common cases.
pub trait TargetKey: Send + Sync {
    fn target(&self, request: &GenerationRequest, fingerprint: &Fingerprint) -> String;
}

impl TargetKey for FailureScope {
    fn target(&self, request: &GenerationRequest, fingerprint: &Fingerprint) -> String {
        let repo = crate::cache::normalize_repo_url(&request.repo_url);
        match self {
            FailureScope::Fingerprint => fingerprint.to_hex(),
            FailureScope::Revision => format!("{repo}@{}", request.revision),
            FailureScope::Repository => repo,
        }
    }
}

/// Configuration for the failure tracker.
///
/// ```rust
/// # use manifold::BreakerConfig;
/// # use std::time::Duration;
/// // Pause after 5 failures, for 10 minutes or 20 requests, whichever ends first.
/// let config = BreakerConfig::new()
///     .failure_threshold(5)
///     .pause_duration(Duration::from_secs(600))
///     .pause_requests(20);
/// ```
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before pausing. Zero disables the breaker. Default: 3.
    pub failure_threshold: u32,
    /// Wall-clock pause. Zero disables this dimension. Default: 60 minutes.
    pub pause_duration: Duration,
    /// Requests to reject while paused. Zero disables this dimension. Default: 0.
    pub pause_requests: u32,
    /// Key derivation for built-in scopes. Default: [`FailureScope::Revision`].
    pub scope: FailureScope,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            pause_duration: Duration::from_secs(60 * 60),
            pause_requests: 0,
            scope: FailureScope::default(),
        }
    }
}

impl BreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never pauses.
    pub fn disabled() -> Self {
        Self {
            failure_threshold: 0,
            ..Self::default()
        }
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn pause_duration(mut self, duration: Duration) -> Self {
        self.pause_duration = duration;
        self
    }

    pub fn pause_requests(mut self, n: u32) -> Self {
        self.pause_requests = n;
        self
    }

    pub fn scope(mut self, scope: FailureScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether the breaker can ever open with this config.
    pub fn is_enabled(&self) -> bool {
        self.failure_threshold > 0 && (!self.pause_duration.is_zero() || self.pause_requests > 0)
    }
}

/// Breaker position for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open {
        until: Option<Instant>,
        remaining_requests: Option<u32>,
    },
    HalfOpen,
}

/// Failure bookkeeping for one target.
#[derive(Debug, Clone)]
pub struct FailureState {
    pub consecutive_failures: u32,
    /// When the current failure streak started.
    pub first_failure_at: Instant,
    pub last_error: String,
    pub state: BreakerState,
}

impl FailureState {
    fn new(now: Instant) -> Self {
        Self {
            consecutive_failures: 0,
            first_failure_at: now,
            last_error: String::new(),
            state: BreakerState::Closed,
        }
    }
}

/// Per-target consecutive-failure counters with pause windows.
///
/// Thread-safe: state lives in a moka cache and every transition is a
/// single atomic `and_compute_with` on the target's entry.
pub struct FailureTracker {
    states: Cache<String, FailureState>,
    config: BreakerConfig,
    key: Arc<dyn TargetKey>,
}

impl fmt::Debug for FailureTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureTracker")
            .field("config", &self.config)
            .field("tracked", &self.states.entry_count())
            .finish()
    }
}

impl FailureTracker {
    /// Create a tracker keyed by `config.scope`.
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_target_key(config, Arc::new(config.scope))
    }

    /// Create a tracker with a custom key derivation.
    pub fn with_target_key(config: &BreakerConfig, key: Arc<dyn TargetKey>) -> Self {
        Self {
            states: Cache::new(MAX_TRACKED_TARGETS),
            config: config.clone(),
            key,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Breaker key for a request.
    pub fn target_for(&self, request: &GenerationRequest, fingerprint: &Fingerprint) -> String {
        self.key.target(request, fingerprint)
    }

    /// Decide whether a fresh attempt for `target` may proceed.
    ///
    /// While Open, returns [`ManifoldError::BreakerOpen`] and consumes one
    /// unit of the request budget (if that dimension is active). Once the
    /// window or budget is exhausted the target moves to HalfOpen and the
    /// attempt is allowed.
    pub fn check(&self, target: &str) -> Result<()> {
        let now = Instant::now();
        let mut verdict = Ok(());

        self.states
            .entry(target.to_owned())
            .and_compute_with(|existing| {
                let Some(entry) = existing else {
                    return Op::Nop;
                };
                let mut state = entry.into_value();
                let BreakerState::Open {
                    until,
                    remaining_requests,
                } = state.state
                else {
                    return Op::Nop;
                };

                let window_over = until.is_some_and(|deadline| now >= deadline);
                let budget_over = remaining_requests == Some(0);
                if window_over || budget_over {
                    info!(
                        key = target,
                        failures = state.consecutive_failures,
                        "generation pause over, allowing a retry"
                    );
                    state.state = BreakerState::HalfOpen;
                    return Op::Put(state);
                }

                let remaining_requests = remaining_requests.map(|n| n - 1);
                verdict = Err(ManifoldError::BreakerOpen {
                    target: target.to_owned(),
                    failures: state.consecutive_failures,
                    retry_in: until.map(|deadline| deadline.saturating_duration_since(now)),
                    remaining_requests,
                    last_error: state.last_error.clone(),
                });
                if remaining_requests.is_some() {
                    state.state = BreakerState::Open {
                        until,
                        remaining_requests,
                    };
                    Op::Put(state)
                } else {
                    Op::Nop
                }
            });

        if verdict.is_err() {
            metrics::counter!(telemetry::BREAKER_REJECTIONS_TOTAL).increment(1);
        }
        verdict
    }

    /// Record a failed generation. Returns `true` if this failure opened
    /// (or re-opened) the breaker.
    pub fn record_failure(&self, target: &str, error: &ManifoldError) -> bool {
        let now = Instant::now();
        let mut opened = false;

        self.states
            .entry(target.to_owned())
            .and_compute_with(|existing| {
                let mut state = existing
                    .map(|entry| entry.into_value())
                    .unwrap_or_else(|| FailureState::new(now));
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_error = error.to_string();

                if self.config.is_enabled()
                    && state.consecutive_failures >= self.config.failure_threshold
                {
                    state.state = BreakerState::Open {
                        until: pause_deadline(now, self.config.pause_duration),
                        remaining_requests: (self.config.pause_requests > 0)
                            .then_some(self.config.pause_requests),
                    };
                    opened = true;
                    warn!(
                        key = target,
                        failures = state.consecutive_failures,
                        streak_secs = now.saturating_duration_since(state.first_failure_at).as_secs(),
                        pause_secs = self.config.pause_duration.as_secs(),
                        pause_requests = self.config.pause_requests,
                        error = %error,
                        "pausing manifest generation after repeated failures"
                    );
                }
                Op::Put(state)
            });

        if opened {
            metrics::counter!(telemetry::BREAKER_OPENED_TOTAL).increment(1);
        }
        opened
    }

    /// Record a successful generation: the target returns to Closed with a
    /// zero counter.
    pub fn record_success(&self, target: &str) {
        if let Some(previous) = self.states.remove(target) {
            info!(
                key = target,
                failures = previous.consecutive_failures,
                "generation succeeded, failure counter reset"
            );
        }
    }

    /// Snapshot of a target's bookkeeping, `None` if it has no failures.
    pub fn state(&self, target: &str) -> Option<FailureState> {
        self.states.get(target)
    }

    /// Breaker position for a target, without consuming any budget.
    ///
    /// An expired Open window is reported as HalfOpen.
    pub fn breaker_state(&self, target: &str) -> BreakerState {
        let Some(state) = self.states.get(target) else {
            return BreakerState::Closed;
        };
        match state.state {
            BreakerState::Open {
                until,
                remaining_requests,
            } if until.is_some_and(|deadline| Instant::now() >= deadline)
                || remaining_requests == Some(0) =>
            {
                BreakerState::HalfOpen
            }
            other => other,
        }
    }

    pub fn consecutive_failures(&self, target: &str) -> u32 {
        self.states
            .get(target)
            .map_or(0, |state| state.consecutive_failures)
    }

    /// Forget every target (e.g. after a configuration reload).
    pub fn reset_all(&self) {
        self.states.invalidate_all();
        self.states.run_pending_tasks();
    }
}
