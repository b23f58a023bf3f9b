//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use manifold::telemetry;
use manifold::{
    GenerationConfig, GenerationRequest, LimiterConfig, ManifestRenderer, ManifestResponse,
    ManifoldError, Orchestrator, Result,
};

// ============================================================================
// Mock renderers
// ============================================================================

struct MockRenderer;

#[async_trait]
impl ManifestRenderer for MockRenderer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn render(&self, request: &GenerationRequest) -> Result<ManifestResponse> {
        Ok(ManifestResponse {
            manifests: vec!["kind: ConfigMap".into()],
            revision: request.revision.clone(),
            ..Default::default()
        })
    }
}

struct FailingRenderer;

#[async_trait]
impl ManifestRenderer for FailingRenderer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn render(&self, _request: &GenerationRequest) -> Result<ManifestResponse> {
        Err(ManifoldError::configuration("Chart.yaml: apiVersion is required"))
    }
}

struct SlowRenderer;

#[async_trait]
impl ManifestRenderer for SlowRenderer {
    fn name(&self) -> &str {
        "slow"
    }

    async fn render(&self, _request: &GenerationRequest) -> Result<ManifestResponse> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ManifestResponse::default())
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for a name whose labels include `label = value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Runs async code within a local recorder scope.
///
/// Generation happens in spawned tasks, so the runtime is current-thread and
/// owned by the closure: every task is polled on the thread that holds the
/// local recorder.
fn record<F, Fut, T>(recorder: &DebuggingRecorder, work: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    metrics::with_local_recorder(recorder, || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .expect("failed to build test runtime")
            .block_on(work())
    })
}

fn orchestrator(renderer: Arc<dyn ManifestRenderer>, config: GenerationConfig) -> Orchestrator {
    Orchestrator::new(renderer, &config)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn successful_generation_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, || async {
        let orchestrator = orchestrator(Arc::new(MockRenderer), GenerationConfig::default());
        let request = GenerationRequest::new("https://git.example.com/org/apps", "abc");
        orchestrator.generate(&request).await.unwrap();
        orchestrator.generate(&request).await.unwrap();
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::GENERATIONS_TOTAL, "status", "ok"),
        1
    );
    // Leader miss, leader double-check miss, then one hit.
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 2);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert!(
        has_histogram(&snapshot, telemetry::GENERATION_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[test]
fn failed_generation_records_error_and_breaker_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, || async {
        let orchestrator = orchestrator(Arc::new(FailingRenderer), GenerationConfig::default());
        let request = GenerationRequest::new("https://git.example.com/org/broken", "abc");
        for _ in 0..5 {
            let _ = orchestrator.generate(&request).await;
        }
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::GENERATIONS_TOTAL, "status", "error"),
        3
    );
    assert_eq!(counter_total(&snapshot, telemetry::BREAKER_OPENED_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::BREAKER_REJECTIONS_TOTAL), 2);
}

#[test]
fn coalesced_callers_record_joins() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, || async {
        let orchestrator = orchestrator(Arc::new(SlowRenderer), GenerationConfig::default());
        let request = GenerationRequest::new("https://git.example.com/org/apps", "abc");
        let results =
            futures_util::future::join_all((0..4).map(|_| orchestrator.generate(&request))).await;
        assert!(results.iter().all(|r| r.is_ok()));
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::SINGLEFLIGHT_JOINS_TOTAL), 3);
    assert_eq!(counter_total(&snapshot, telemetry::GENERATIONS_TOTAL), 1);
}

#[test]
fn permit_timeout_is_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, || async {
        let config = GenerationConfig::new().limiter(
            LimiterConfig::new()
                .max_concurrent(1)
                .acquire_timeout(Duration::from_secs(1)),
        );
        let orchestrator = orchestrator(Arc::new(SlowRenderer), config);
        let a = GenerationRequest::new("https://git.example.com/org/apps", "abc").path("a");
        let b = GenerationRequest::new("https://git.example.com/org/apps", "abc").path("b");
        let _ = tokio::join!(orchestrator.generate(&a), orchestrator.generate(&b));
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::PERMIT_TIMEOUTS_TOTAL), 1);
}

#[test]
fn invalidation_is_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    record(&recorder, || async {
        let orchestrator = orchestrator(Arc::new(MockRenderer), GenerationConfig::default());
        for path in ["a", "b", "c"] {
            let request = GenerationRequest::new("https://git.example.com/org/apps", "abc").path(path);
            orchestrator.generate(&request).await.unwrap();
        }
        orchestrator
            .invalidate(&manifold::InvalidationSignal::All)
            .await
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::CACHE_INVALIDATIONS_TOTAL), 3);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let orchestrator = orchestrator(Arc::new(MockRenderer), GenerationConfig::default());
    let request = GenerationRequest::new("https://git.example.com/org/apps", "abc");
    let _response = orchestrator.generate(&request).await.unwrap();
}
