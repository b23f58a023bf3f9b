//! Caching subsystem.
//!
//! - [`fingerprint`]: stable SHA-256 keys derived from a
//!   [`GenerationRequest`](crate::GenerationRequest).
//! - [`ResultCache`]: bounded LRU + TTL store of generation outcomes keyed on
//!   those fingerprints, with predicate-based invalidation.
//! - [`RevisionMetadataCache`]: commit metadata per (repository, revision).
//!   Commits are immutable, so entries only leave on capacity pressure or
//!   invalidation.

pub mod fingerprint;
pub mod result;

pub use fingerprint::{Fingerprint, fingerprint};
pub use result::{CacheConfig, CacheEntry, Epoch, ResultCache, normalize_repo_url};

use crate::types::RevisionMetadata;

/// Default maximum number of entries in the revision metadata cache.
const DEFAULT_METADATA_CACHE_MAX: u64 = 1_000;

/// Thread-safe store of commit metadata.
///
/// Keyed on `(normalized repo url, revision)`. Uses a bounded LRU cache
/// (moka) to prevent unbounded growth in long-running processes.
pub struct RevisionMetadataCache {
    entries: moka::sync::Cache<(String, String), RevisionMetadata>,
}

impl RevisionMetadataCache {
    /// Create an empty cache with the default max capacity (1,000).
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_METADATA_CACHE_MAX)
    }

    /// Create a cache with a custom max capacity.
    pub fn with_max_entries(max: u64) -> Self {
        Self {
            entries: moka::sync::Cache::builder()
                .max_capacity(max)
                .eviction_policy(moka::policy::EvictionPolicy::lru())
                .build(),
        }
    }

    /// Look up cached metadata for a revision.
    pub fn get(&self, repo_url: &str, revision: &str) -> Option<RevisionMetadata> {
        self.entries
            .get(&(normalize_repo_url(repo_url), revision.to_string()))
    }

    /// Insert (or overwrite) metadata for a revision.
    pub fn insert(&self, repo_url: &str, revision: &str, metadata: RevisionMetadata) {
        self.entries.insert(
            (normalize_repo_url(repo_url), revision.to_string()),
            metadata,
        );
    }

    /// Drop every revision of one repository.
    pub fn invalidate_repository(&self, repo_url: &str) {
        let target = normalize_repo_url(repo_url);
        let doomed: Vec<_> = self
            .entries
            .iter()
            .filter(|(key, _)| key.0 == target)
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in doomed {
            self.entries.invalidate(&key);
        }
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for RevisionMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
