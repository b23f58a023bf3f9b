//! Tests for the builder and [`EmbeddedGateway`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use manifold::{
    AppList, BreakerConfig, Fingerprint, GenerationRequest, InvalidationSignal, ManifestRenderer,
    ManifestResponse, Manifold, ManifoldError, RepoGateway, Result, RevisionMetadata, SourceType,
    TargetKey, spawn_invalidation_listener,
};

const REPO: &str = "https://git.example.com/platform/apps.git";

#[derive(Default)]
struct FakeRenderer {
    renders: AtomicUsize,
    metadata_lookups: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ManifestRenderer for FakeRenderer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn render(&self, request: &GenerationRequest) -> Result<ManifestResponse> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ManifoldError::configuration("values.yaml: mapping values are not allowed"));
        }
        Ok(ManifestResponse {
            manifests: vec![format!("kind: ConfigMap # {}", request.path)],
            revision: request.revision.clone(),
            ..Default::default()
        })
    }

    async fn list_apps(&self, _repo_url: &str, _revision: &str) -> Result<AppList> {
        Ok(AppList::from([
            ("guestbook".to_string(), SourceType::Directory),
            ("charts/redis".to_string(), SourceType::Helm),
        ]))
    }

    async fn revision_metadata(&self, _repo_url: &str, revision: &str) -> Result<RevisionMetadata> {
        self.metadata_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(RevisionMetadata {
            author: "alice <alice@example.com>".into(),
            date_unix: 1_700_000_000,
            tags: vec![],
            message: format!("commit {revision}"),
        })
    }
}

fn gateway(renderer: &Arc<FakeRenderer>) -> manifold::EmbeddedGateway {
    Manifold::builder()
        .renderer(renderer.clone())
        .build()
        .expect("failed to build test gateway")
}

#[test]
fn test_builder_no_renderer_error() {
    let result = Manifold::builder().build();
    assert!(matches!(result, Err(ManifoldError::Configuration(_))));
}

#[test]
fn test_builder_with_directory() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Manifold::builder().directory(dir.path()).build();
    assert!(gateway.is_ok());
    assert_eq!(gateway.unwrap().orchestrator().renderer().name(), "directory");
}

#[test]
fn test_builder_parallelism_limit() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = Manifold::builder()
        .renderer(renderer.clone())
        .parallelism_limit(4)
        .build()
        .unwrap();
    assert_eq!(gateway.orchestrator().limiter().limit(), Some(4));

    for unlimited in [0, -1] {
        let gateway = Manifold::builder()
            .renderer(renderer.clone())
            .parallelism_limit(unlimited)
            .build()
            .unwrap();
        assert_eq!(gateway.orchestrator().limiter().limit(), None);
    }
}

struct Everything;

impl TargetKey for Everything {
    fn target(&self, _request: &GenerationRequest, _fingerprint: &Fingerprint) -> String {
        "global".into()
    }
}

#[tokio::test]
async fn test_builder_custom_target_key() {
    let renderer = Arc::new(FakeRenderer {
        fail: true,
        ..Default::default()
    });
    let gateway = Manifold::builder()
        .renderer(renderer.clone())
        .breaker(BreakerConfig::new().failure_threshold(2))
        .target_key(Arc::new(Everything))
        .build()
        .unwrap();

    let a = GenerationRequest::new(REPO, "abc");
    let b = GenerationRequest::new("https://git.example.com/other/repo", "def");
    gateway.generate_manifest(&a).await.unwrap_err();
    gateway.generate_manifest(&b).await.unwrap_err();

    // Both requests share one breaker key.
    let err = gateway
        .generate_manifest(&GenerationRequest::new(REPO, "zzz"))
        .await
        .unwrap_err();
    assert!(err.is_breaker_open());
}

#[tokio::test]
async fn test_generate_rejects_invalid_request() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = gateway(&renderer);

    for request in [
        GenerationRequest::new("", "abc"),
        GenerationRequest::new(REPO, " "),
        GenerationRequest::new(REPO, "abc").path("../secrets"),
    ] {
        let err = gateway.generate_manifest(&request).await.unwrap_err();
        assert!(matches!(err, ManifoldError::InvalidInput(_)), "{err}");
    }
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_clones_share_state() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = gateway(&renderer);
    let clone = gateway.clone();
    let request = GenerationRequest::new(REPO, "abc").path("web");

    gateway.generate_manifest(&request).await.unwrap();
    clone.generate_manifest(&request).await.unwrap();
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_list_apps_delegates_to_renderer() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = gateway(&renderer);

    let apps = gateway.list_apps(REPO, "abc").await.unwrap();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps["charts/redis"], SourceType::Helm);

    let err = gateway.list_apps("", "abc").await.unwrap_err();
    assert!(matches!(err, ManifoldError::InvalidInput(_)));
}

#[tokio::test]
async fn test_app_details_not_implemented_by_renderer() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = gateway(&renderer);
    let err = gateway
        .app_details(&GenerationRequest::new(REPO, "abc"))
        .await
        .unwrap_err();
    assert!(matches!(err, ManifoldError::NotImplemented("app_details")));
}

#[tokio::test]
async fn test_revision_metadata_is_cached() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = gateway(&renderer);

    let first = gateway.revision_metadata(REPO, "abc").await.unwrap();
    let second = gateway
        .revision_metadata("https://git.example.com/platform/apps", "abc")
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(renderer.metadata_lookups.load(Ordering::SeqCst), 1);

    gateway.revision_metadata(REPO, "def").await.unwrap();
    assert_eq!(renderer.metadata_lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidation_scopes() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = gateway(&renderer);
    gateway.revision_metadata(REPO, "abc").await.unwrap();
    gateway
        .generate_manifest(&GenerationRequest::new(REPO, "abc"))
        .await
        .unwrap();

    // Keyring changes drop rendered output but keep commit metadata.
    let removed = gateway
        .invalidate(InvalidationSignal::KeyringChanged)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(gateway.metadata_cache().get(REPO, "abc").is_some());

    // Credential rotation drops both for the repository.
    gateway
        .invalidate(InvalidationSignal::CredentialsChanged(REPO.into()))
        .await
        .unwrap();
    assert!(gateway.metadata_cache().get(REPO, "abc").is_none());
}

#[tokio::test]
async fn test_invalidation_does_not_reset_breaker() {
    let renderer = Arc::new(FakeRenderer {
        fail: true,
        ..Default::default()
    });
    let gateway = gateway(&renderer);
    let request = GenerationRequest::new(REPO, "abc");
    for _ in 0..3 {
        gateway.generate_manifest(&request).await.unwrap_err();
    }

    gateway.invalidate(InvalidationSignal::All).await.unwrap();
    let err = gateway.generate_manifest(&request).await.unwrap_err();
    assert!(err.is_breaker_open());
}

#[tokio::test]
async fn test_invalidation_listener_applies_signals() {
    let renderer = Arc::new(FakeRenderer::default());
    let gateway = Arc::new(gateway(&renderer));
    let request = GenerationRequest::new(REPO, "abc").path("web");
    gateway.generate_manifest(&request).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    let listener = spawn_invalidation_listener(Arc::clone(&gateway), rx);
    tx.send(InvalidationSignal::Repository(REPO.into()))
        .await
        .unwrap();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener did not stop")
        .unwrap();

    gateway.generate_manifest(&request).await.unwrap();
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_health_defaults_to_ok() {
    let renderer = Arc::new(FakeRenderer::default());
    assert!(gateway(&renderer).health().await.is_ok());
}
