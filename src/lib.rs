//! Manifold - manifest generation engine for GitOps repository servers
//!
//! Rendering Kubernetes manifests from a Git revision is slow (tool
//! invocations, dependency fetches) and reconciliation loops ask for the same
//! output over and over. This crate sits in front of a rendering
//! collaborator and makes repeated, concurrent and failing requests cheap:
//!
//! - identical requests are answered from a TTL/LRU [result cache](cache)
//!   keyed by a stable request [`Fingerprint`];
//! - concurrent identical requests are coalesced into one render
//!   ([`SingleFlight`]);
//! - targets that keep failing are paused by a [circuit breaker](FailureTracker);
//! - the number of concurrent renders is bounded ([`ConcurrencyLimiter`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use manifold::{GenerationRequest, Manifold, RepoGateway};
//!
//! #[tokio::main]
//! async fn main() -> manifold::Result<()> {
//!     let gateway = Manifold::builder()
//!         .directory("/var/lib/manifold/repos")
//!         .parallelism_limit(4)
//!         .build()?;
//!
//!     let request = GenerationRequest::new("https://github.com/org/apps.git", "4f2c9e1")
//!         .path("guestbook")
//!         .namespace("default");
//!     let response = gateway.generate_manifest(&request).await?;
//!
//!     for manifest in &response.manifests {
//!         println!("{manifest}\n---");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `server`: gRPC service, TOML configuration and the `manifoldd` daemon.
//! - `client`: gRPC [`ServiceClient`](client::ServiceClient) and the
//!   `manifold` CLI.

pub mod cache;
#[cfg(feature = "client")]
pub mod client;
pub mod error;
pub mod gateway;
pub mod generation;
pub mod render;
#[cfg(any(feature = "server", feature = "client"))]
pub mod server;
pub mod telemetry;
pub mod traits;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use error::{ManifoldError, RenderErrorKind, Result};
pub use gateway::{EmbeddedGateway, Manifold, ManifoldBuilder, spawn_invalidation_listener};
pub use traits::RepoGateway;
pub use version::{BuildInfo, PKG_VERSION, build_info, version_string};

pub use cache::{CacheConfig, Fingerprint, ResultCache, RevisionMetadataCache, fingerprint};
pub use generation::{
    BreakerConfig, BreakerState, CancelPolicy, ConcurrencyLimiter, FailureScope, FailureTracker,
    GenerationConfig, LimiterConfig, Orchestrator, Permit, SingleFlight, TargetKey,
};
pub use render::{DirectoryRenderer, ManifestRenderer};

// Re-export all types
pub use types::{
    AppDetails, AppList, GenerationRequest, HelmOverrides, InvalidationSignal, KustomizeOverrides,
    ManifestResponse, PluginOverrides, RevisionMetadata, SourceType,
};
