//! Core RepoGateway trait

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    AppDetails, AppList, GenerationRequest, InvalidationSignal, ManifestResponse, ManifoldError,
    Result, RevisionMetadata,
};

/// The service surface every gateway implementation provides.
///
/// [`EmbeddedGateway`](crate::EmbeddedGateway) serves requests in-process;
/// the gRPC `ServiceClient` (feature `client`) forwards them to a remote
/// `manifoldd`. Callers program against this trait and stay agnostic of
/// which one they hold.
#[async_trait]
pub trait RepoGateway: Send + Sync {
    /// Generate (or fetch cached) manifests for an application source.
    async fn generate_manifest(&self, request: &GenerationRequest) -> Result<Arc<ManifestResponse>>;

    /// Drop cached state named by the signal. Returns the number of cached
    /// results removed.
    async fn invalidate(&self, signal: InvalidationSignal) -> Result<usize>;

    // ===== Optional: default stubs =====

    /// Applications discoverable in a repository at a revision.
    async fn list_apps(&self, _repo_url: &str, _revision: &str) -> Result<AppList> {
        Err(ManifoldError::NotImplemented("list_apps"))
    }

    /// Details of one application source.
    async fn app_details(&self, _request: &GenerationRequest) -> Result<AppDetails> {
        Err(ManifoldError::NotImplemented("app_details"))
    }

    /// Commit metadata for a revision.
    async fn revision_metadata(&self, _repo_url: &str, _revision: &str) -> Result<RevisionMetadata> {
        Err(ManifoldError::NotImplemented("revision_metadata"))
    }

    /// Liveness. Independent of cache and breaker state.
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
