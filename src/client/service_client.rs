//! gRPC [`RepoGateway`] implementation that connects to manifoldd.
//!
//! All proto ↔ native type conversions are centralized in [`crate::server::convert`].

use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;

use crate::server::convert::{app_list_from_proto, from_status};
use crate::server::proto;
use crate::server::proto::repo_server_client::RepoServerClient;
use crate::{
    AppDetails, AppList, GenerationRequest, InvalidationSignal, ManifestResponse, ManifoldError,
    RepoGateway, Result, RevisionMetadata,
};

/// A [`RepoGateway`] client that connects to a remote manifoldd server.
///
/// Errors raised by the server are rebuilt into the same [`ManifoldError`]
/// variants, so callers can match on them as if the gateway were local.
#[derive(Clone)]
pub struct ServiceClient {
    inner: RepoServerClient<Channel>,
}

impl ServiceClient {
    /// Connect to a manifoldd server at the given address.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = ServiceClient::connect("http://127.0.0.1:8081").await?;
    /// ```
    pub async fn connect(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let inner = RepoServerClient::connect(addr.clone())
            .await
            .map_err(|e| ManifoldError::Transport(format!("failed to connect to {addr}: {e}")))?;
        Ok(Self { inner })
    }

    /// Wrap an already established channel.
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            inner: RepoServerClient::new(channel),
        }
    }

    /// Server version string, as reported by the health RPC.
    pub async fn server_version(&self) -> Result<String> {
        let response = self
            .inner
            .clone()
            .health(proto::HealthRequest {})
            .await
            .map_err(|s| from_status(&s))?;
        Ok(response.into_inner().version)
    }
}

// =============================================================================
// RepoGateway implementation
// =============================================================================

#[async_trait]
impl RepoGateway for ServiceClient {
    async fn generate_manifest(&self, request: &GenerationRequest) -> Result<Arc<ManifestResponse>> {
        let response = self
            .inner
            .clone()
            .generate_manifest(proto::ManifestRequest::from(request))
            .await
            .map_err(|s| from_status(&s))?;
        Ok(Arc::new(response.into_inner().into()))
    }

    /// The server does not report how many entries were removed; always `Ok(0)`.
    async fn invalidate(&self, signal: InvalidationSignal) -> Result<usize> {
        self.inner
            .clone()
            .invalidate_cache(proto::InvalidateCacheRequest::from(signal))
            .await
            .map_err(|s| from_status(&s))?;
        Ok(0)
    }

    async fn list_apps(&self, repo_url: &str, revision: &str) -> Result<AppList> {
        let response = self
            .inner
            .clone()
            .list_apps(proto::ListAppsRequest {
                repo_url: repo_url.to_string(),
                revision: revision.to_string(),
            })
            .await
            .map_err(|s| from_status(&s))?;
        Ok(app_list_from_proto(response.into_inner()))
    }

    async fn app_details(&self, request: &GenerationRequest) -> Result<AppDetails> {
        let response = self
            .inner
            .clone()
            .get_app_details(proto::ManifestRequest::from(request))
            .await
            .map_err(|s| from_status(&s))?;
        Ok(response.into_inner().into())
    }

    async fn revision_metadata(&self, repo_url: &str, revision: &str) -> Result<RevisionMetadata> {
        let response = self
            .inner
            .clone()
            .get_revision_metadata(proto::RevisionMetadataRequest {
                repo_url: repo_url.to_string(),
                revision: revision.to_string(),
            })
            .await
            .map_err(|s| from_status(&s))?;
        Ok(response.into_inner().into())
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .inner
            .clone()
            .health(proto::HealthRequest {})
            .await
            .map_err(|s| from_status(&s))?;
        if response.into_inner().healthy {
            Ok(())
        } else {
            Err(ManifoldError::Transport("server reports unhealthy".into()))
        }
    }
}
