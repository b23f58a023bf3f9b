//! Rendering collaborators.
//!
//! A [`ManifestRenderer`] turns a [`GenerationRequest`] into manifests. It is
//! the expensive, fallible part of the pipeline that everything in
//! [`generation`](crate::generation) exists to protect. Implementations do
//! not cache, coalesce or rate-limit; the orchestrator does that for them.
//!
//! # Errors
//!
//! Return [`ManifoldError::Render`](crate::ManifoldError::Render) with
//! [`RenderErrorKind::Transient`](crate::RenderErrorKind::Transient) for
//! failures that may heal on their own (network, timeouts) and
//! [`RenderErrorKind::Configuration`](crate::RenderErrorKind::Configuration)
//! for broken inputs. Every error counts toward the target's breaker.

mod directory;

pub use directory::DirectoryRenderer;

use async_trait::async_trait;

use crate::types::{AppDetails, AppList, GenerationRequest, ManifestResponse, RevisionMetadata};
use crate::{ManifoldError, Result};

#[async_trait]
pub trait ManifestRenderer: Send + Sync {
    /// Renderer name for logging/debugging.
    fn name(&self) -> &str;

    /// Render the manifests for a request.
    async fn render(&self, request: &GenerationRequest) -> Result<ManifestResponse>;

    /// Applications discovered at a revision, keyed by path.
    async fn list_apps(&self, _repo_url: &str, _revision: &str) -> Result<AppList> {
        Err(ManifoldError::NotImplemented("list_apps"))
    }

    /// Source type and manifest files of one application.
    async fn app_details(&self, _request: &GenerationRequest) -> Result<AppDetails> {
        Err(ManifoldError::NotImplemented("app_details"))
    }

    /// Commit metadata for a revision.
    async fn revision_metadata(&self, _repo_url: &str, _revision: &str) -> Result<RevisionMetadata> {
        Err(ManifoldError::NotImplemented("revision_metadata"))
    }
}
