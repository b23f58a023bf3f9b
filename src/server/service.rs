//! gRPC service implementation.
//!
//! [`RepoService`] adapts any [`RepoGateway`] to the generated `RepoServer`
//! trait. A client that disconnects drops the handler future, which drops
//! its waiter on the shared generation; what happens to the render then is
//! decided by the orchestrator's cancel policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use super::convert::{app_list_to_proto, to_status};
use super::proto;
use super::proto::repo_server_server::RepoServer;
use crate::{GenerationRequest, InvalidationSignal, ManifoldError, RepoGateway, Result};

/// gRPC service that wraps a RepoGateway implementation.
pub struct RepoService<G: RepoGateway + ?Sized> {
    gateway: Arc<G>,
    request_timeout: Option<Duration>,
}

impl<G: RepoGateway + ?Sized> RepoService<G> {
    /// Create a new service wrapping the given gateway.
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            request_timeout: None,
        }
    }

    /// Fail RPCs that take longer than `timeout` with `DEADLINE_EXCEEDED`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn run<T, F>(&self, rpc: &'static str, call: F) -> std::result::Result<T, Status>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(rpc, ?timeout, "request timed out");
                    return Err(Status::deadline_exceeded(format!(
                        "{rpc} did not complete within {timeout:?}"
                    )));
                }
            },
            None => call.await,
        };
        outcome.map_err(|err| {
            debug!(rpc, kind = err.kind(), error = %err, "request failed");
            to_status(&err)
        })
    }
}

#[tonic::async_trait]
impl<G> RepoServer for RepoService<G>
where
    G: RepoGateway + ?Sized + 'static,
{
    async fn generate_manifest(
        &self,
        request: Request<proto::ManifestRequest>,
    ) -> std::result::Result<Response<proto::ManifestResponse>, Status> {
        let request: GenerationRequest = request.into_inner().into();
        let response = self
            .run("generate_manifest", self.gateway.generate_manifest(&request))
            .await?;
        Ok(Response::new(response.as_ref().into()))
    }

    async fn list_apps(
        &self,
        request: Request<proto::ListAppsRequest>,
    ) -> std::result::Result<Response<proto::ListAppsResponse>, Status> {
        let request = request.into_inner();
        let apps = self
            .run(
                "list_apps",
                self.gateway.list_apps(&request.repo_url, &request.revision),
            )
            .await?;
        Ok(Response::new(app_list_to_proto(apps)))
    }

    async fn get_app_details(
        &self,
        request: Request<proto::ManifestRequest>,
    ) -> std::result::Result<Response<proto::AppDetailsResponse>, Status> {
        let request: GenerationRequest = request.into_inner().into();
        let details = self
            .run("app_details", self.gateway.app_details(&request))
            .await?;
        Ok(Response::new(details.into()))
    }

    async fn get_revision_metadata(
        &self,
        request: Request<proto::RevisionMetadataRequest>,
    ) -> std::result::Result<Response<proto::RevisionMetadataResponse>, Status> {
        let request = request.into_inner();
        let metadata = self
            .run(
                "revision_metadata",
                self.gateway
                    .revision_metadata(&request.repo_url, &request.revision),
            )
            .await?;
        Ok(Response::new(metadata.into()))
    }

    async fn invalidate_cache(
        &self,
        request: Request<proto::InvalidateCacheRequest>,
    ) -> std::result::Result<Response<proto::InvalidateCacheResponse>, Status> {
        let signal = InvalidationSignal::try_from(request.into_inner())
            .map_err(|e: ManifoldError| to_status(&e))?;
        self.run("invalidate", self.gateway.invalidate(signal)).await?;
        Ok(Response::new(proto::InvalidateCacheResponse {}))
    }

    async fn health(
        &self,
        _request: Request<proto::HealthRequest>,
    ) -> std::result::Result<Response<proto::HealthResponse>, Status> {
        let healthy = self.gateway.health().await.is_ok();
        Ok(Response::new(proto::HealthResponse {
            healthy,
            version: crate::version_string(),
        }))
    }
}
