//! EmbeddedGateway - serves requests in-process through the orchestrator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::cache::RevisionMetadataCache;
use crate::generation::Orchestrator;
use crate::render::ManifestRenderer;
use crate::{
    AppDetails, AppList, GenerationRequest, InvalidationSignal, ManifestResponse, ManifoldError,
    RepoGateway, Result, RevisionMetadata,
};

/// Gateway that renders in the calling process.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct EmbeddedGateway {
    orchestrator: Arc<Orchestrator>,
    metadata: Arc<RevisionMetadataCache>,
}

impl EmbeddedGateway {
    pub fn new(orchestrator: Arc<Orchestrator>, metadata: Arc<RevisionMetadataCache>) -> Self {
        Self {
            orchestrator,
            metadata,
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn metadata_cache(&self) -> &RevisionMetadataCache {
        &self.metadata
    }

    fn renderer(&self) -> &Arc<dyn ManifestRenderer> {
        self.orchestrator.renderer()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ManifoldError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

#[async_trait]
impl RepoGateway for EmbeddedGateway {
    async fn generate_manifest(&self, request: &GenerationRequest) -> Result<Arc<ManifestResponse>> {
        self.orchestrator.generate(request).await
    }

    async fn invalidate(&self, signal: InvalidationSignal) -> Result<usize> {
        match &signal {
            InvalidationSignal::Repository(url) | InvalidationSignal::CredentialsChanged(url) => {
                self.metadata.invalidate_repository(url);
            }
            InvalidationSignal::All => self.metadata.clear(),
            // Signature verification only affects rendered output.
            InvalidationSignal::KeyringChanged => {}
        }
        Ok(self.orchestrator.invalidate(&signal).await)
    }

    #[instrument(name = "gateway.list_apps", skip(self))]
    async fn list_apps(&self, repo_url: &str, revision: &str) -> Result<AppList> {
        require("repo_url", repo_url)?;
        require("revision", revision)?;
        self.renderer().list_apps(repo_url, revision).await
    }

    #[instrument(name = "gateway.app_details", skip(self, request), fields(path = %request.path))]
    async fn app_details(&self, request: &GenerationRequest) -> Result<AppDetails> {
        request.validate()?;
        self.renderer().app_details(request).await
    }

    #[instrument(name = "gateway.revision_metadata", skip(self))]
    async fn revision_metadata(&self, repo_url: &str, revision: &str) -> Result<RevisionMetadata> {
        require("repo_url", repo_url)?;
        require("revision", revision)?;
        if let Some(hit) = self.metadata.get(repo_url, revision) {
            debug!("revision metadata cache hit");
            return Ok(hit);
        }
        let metadata = self.renderer().revision_metadata(repo_url, revision).await?;
        self.metadata.insert(repo_url, revision, metadata.clone());
        Ok(metadata)
    }
}
