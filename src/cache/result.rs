//! Result cache for manifest generation outcomes.
//!
//! [`ResultCache`] stores the latest outcome per [`Fingerprint`]: either the
//! rendered manifests or, when failure caching is enabled, the terminal
//! error of the last attempt. A cache hit bypasses the breaker, the
//! single-flight table and the concurrency limiter entirely.
//!
//! # Expiry
//!
//! Every entry carries its own TTL (successes and failures are configured
//! separately). Expiry is enforced twice:
//!
//! - lazily on [`get`](ResultCache::get), against `tokio::time::Instant`, so a
//!   paused test clock is honoured;
//! - in the background by moka through a per-entry [`Expiry`] policy, which
//!   keeps memory bounded without lookups.
//!
//! Capacity is bounded by `max_entries`. The cache runs moka's LRU policy:
//! every insert is admitted and the least-recently-used entry is evicted
//! first.
//!
//! # Invalidation
//!
//! Explicit invalidation wins over TTL. [`invalidate`](ResultCache::invalidate)
//! removes matching entries immediately, so the very next lookup misses.
//!
//! Invalidation also wins over renders that are still running. Each
//! repository carries an [`Epoch`] that moves forward on every repository or
//! global invalidation. A render captures the epoch before it starts and
//! stores its outcome through [`put_success_at`](ResultCache::put_success_at),
//! which drops the outcome if the epoch has moved in the meantime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::Expiry;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::fingerprint::Fingerprint;
use crate::telemetry;
use crate::types::ManifestResponse;
use crate::{ManifoldError, Result};

/// Configuration for the result cache.
///
/// ```rust
/// # use manifold::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(5_000)
///     .ttl(Duration::from_secs(3600))
///     .failure_ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// Time-to-live for successful renders. Default: 24 hours. Zero disables caching.
    pub ttl: Duration,
    /// Time-to-live for cached failures. Default: zero (failures are not cached).
    pub failure_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(24 * 3600),
            failure_ttl: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for successful renders.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the time-to-live for cached failures (zero disables failure caching).
    pub fn failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = ttl;
        self
    }
}

/// One cached generation outcome.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub outcome: Result<Arc<ManifestResponse>>,
    /// Repository the entry was rendered from, used by invalidation.
    pub repo_url: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn success(repo_url: impl Into<String>, response: Arc<ManifestResponse>, ttl: Duration) -> Self {
        Self {
            outcome: Ok(response),
            repo_url: repo_url.into(),
            created_at: Instant::now(),
            ttl,
        }
    }

    pub fn failure(repo_url: impl Into<String>, error: ManifoldError, ttl: Duration) -> Self {
        Self {
            outcome: Err(error),
            repo_url: repo_url.into(),
            created_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Restarts an entry's clock on every insert or overwrite.
struct EntryExpiry;

impl Expiry<Fingerprint, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &CacheEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Invalidation counter observed by a render before it starts.
///
/// Zero until the first invalidation that covers the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Last invalidation stamp per repository and for the whole cache.
#[derive(Default)]
struct Epochs {
    clock: AtomicU64,
    everything: AtomicU64,
    repositories: Mutex<HashMap<String, u64>>,
}

impl Epochs {
    fn current(&self, repo_url: &str) -> Epoch {
        let repo = self
            .repositories
            .lock()
            .get(&normalize_repo_url(repo_url))
            .copied()
            .unwrap_or(0);
        Epoch(repo.max(self.everything.load(Ordering::SeqCst)))
    }

    fn advance_repository(&self, repo_url: &str) {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.repositories
            .lock()
            .insert(normalize_repo_url(repo_url), stamp);
    }

    fn advance_everything(&self) {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.everything.store(stamp, Ordering::SeqCst);
    }
}

/// In-memory cache of generation outcomes keyed by [`Fingerprint`].
pub struct ResultCache {
    cache: Cache<Fingerprint, CacheEntry>,
    config: CacheConfig,
    epochs: Epochs,
}

impl ResultCache {
    /// Create a new result cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .build();
        Self {
            cache,
            config: config.clone(),
            epochs: Epochs::default(),
        }
    }

    /// Current invalidation epoch for `repo_url`.
    pub fn epoch(&self, repo_url: &str) -> Epoch {
        self.epochs.current(repo_url)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up the outcome for a fingerprint.
    ///
    /// Returns `None` on a miss or when the stored entry has outlived its TTL.
    /// Never waits on generation. Emits cache hit/miss metrics.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        match self.cache.get(fingerprint).await {
            Some(entry) if entry.is_expired(Instant::now()) => {
                self.cache.invalidate(fingerprint).await;
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
            Some(entry) => {
                let outcome = if entry.is_failure() { "failure" } else { "success" };
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "outcome" => outcome).increment(1);
                Some(entry)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Insert an entry, replacing any previous one for the same fingerprint.
    ///
    /// Entries with a zero TTL are dropped instead of stored.
    pub async fn put(&self, fingerprint: Fingerprint, entry: CacheEntry) {
        if entry.ttl.is_zero() {
            self.cache.invalidate(&fingerprint).await;
            return;
        }
        self.cache.insert(fingerprint, entry).await;
    }

    /// Store a successful render with the configured success TTL.
    pub async fn put_success(
        &self,
        fingerprint: Fingerprint,
        repo_url: &str,
        response: Arc<ManifestResponse>,
    ) {
        let entry = CacheEntry::success(repo_url, response, self.config.ttl);
        self.put(fingerprint, entry).await;
    }

    /// Store a failed render with the configured failure TTL.
    ///
    /// No-op when failure caching is disabled. Returns whether it was stored.
    pub async fn put_failure(
        &self,
        fingerprint: Fingerprint,
        repo_url: &str,
        error: ManifoldError,
    ) -> bool {
        if self.config.failure_ttl.is_zero() {
            return false;
        }
        let entry = CacheEntry::failure(repo_url, error, self.config.failure_ttl);
        self.put(fingerprint, entry).await;
        true
    }

    /// Store a successful render that started at `epoch`.
    ///
    /// Dropped when the repository was invalidated after `epoch` was taken.
    /// Returns whether the entry was kept.
    pub async fn put_success_at(
        &self,
        fingerprint: Fingerprint,
        repo_url: &str,
        response: Arc<ManifestResponse>,
        epoch: Epoch,
    ) -> bool {
        let entry = CacheEntry::success(repo_url, response, self.config.ttl);
        self.put_at(fingerprint, entry, epoch).await
    }

    /// Store a failed render that started at `epoch`. See
    /// [`put_success_at`](Self::put_success_at).
    pub async fn put_failure_at(
        &self,
        fingerprint: Fingerprint,
        repo_url: &str,
        error: ManifoldError,
        epoch: Epoch,
    ) -> bool {
        if self.config.failure_ttl.is_zero() {
            return false;
        }
        let entry = CacheEntry::failure(repo_url, error, self.config.failure_ttl);
        self.put_at(fingerprint, entry, epoch).await
    }

    async fn put_at(&self, fingerprint: Fingerprint, entry: CacheEntry, epoch: Epoch) -> bool {
        let repo_url = entry.repo_url.clone();
        if self.epoch(&repo_url) != epoch {
            debug!(fingerprint = %fingerprint.short(), "outcome predates invalidation, not cached");
            return false;
        }
        self.put(fingerprint, entry).await;
        // An invalidation advances the epoch before it scans, so either the
        // scan saw this entry or this check sees the new epoch.
        if self.epoch(&repo_url) != epoch {
            self.cache.invalidate(&fingerprint).await;
            return false;
        }
        true
    }

    /// Remove every entry matching `predicate`. Returns the number removed.
    pub async fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Fingerprint, &CacheEntry) -> bool,
    {
        let doomed: Vec<Fingerprint> = self
            .cache
            .iter()
            .filter(|(key, entry)| predicate(&**key, entry))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            self.cache.invalidate(key).await;
        }
        if !doomed.is_empty() {
            metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(doomed.len() as u64);
        }
        debug!(removed = doomed.len(), "result cache invalidated");
        doomed.len()
    }

    /// Remove every entry rendered from `repo_url`.
    ///
    /// URLs are compared after normalisation, so `https://host/org/repo.git`
    /// and `https://host/org/repo/` match.
    ///
    /// Renders of the repository that are still running will not be cached.
    pub async fn invalidate_repository(&self, repo_url: &str) -> usize {
        self.epochs.advance_repository(repo_url);
        let target = normalize_repo_url(repo_url);
        self.invalidate(|_, entry| normalize_repo_url(&entry.repo_url) == target)
            .await
    }

    /// Remove every entry and return the number removed.
    ///
    /// Renders that are still running will not be cached.
    pub async fn clear(&self) -> usize {
        self.epochs.advance_everything();
        self.invalidate(|_, _| true).await
    }

    /// Drop everything without counting.
    pub fn invalidate_all(&self) {
        self.epochs.advance_everything();
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries.
    ///
    /// moka updates this lazily; call [`sync`](Self::sync) first for an exact count.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush moka's pending maintenance (evictions, expirations, counters).
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Canonical form of a git URL for equality checks.
pub fn normalize_repo_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);
    url.to_ascii_lowercase()
}
