//! Tests for [`FailureTracker`]: scopes, pause dimensions and state reporting.

use std::sync::Arc;
use std::time::Duration;

use manifold::{
    BreakerConfig, BreakerState, FailureScope, FailureTracker, Fingerprint, GenerationRequest,
    ManifoldError, TargetKey, fingerprint,
};

fn boom() -> ManifoldError {
    ManifoldError::transient("connection reset by git.example.com")
}

fn target(tracker: &FailureTracker, req: &GenerationRequest) -> String {
    tracker.target_for(req, &fingerprint(req))
}

#[test]
fn revision_scope_groups_paths_of_one_commit() {
    let tracker = FailureTracker::new(&BreakerConfig::default());
    let a = GenerationRequest::new("https://git.example.com/org/apps.git", "abc").path("web");
    let b = GenerationRequest::new("https://git.example.com/org/apps", "abc").path("api");
    let c = GenerationRequest::new("https://git.example.com/org/apps", "def").path("web");

    assert_eq!(target(&tracker, &a), target(&tracker, &b));
    assert_ne!(target(&tracker, &a), target(&tracker, &c));
}

#[test]
fn repository_scope_spans_revisions() {
    let tracker =
        FailureTracker::new(&BreakerConfig::new().scope(FailureScope::Repository));
    let a = GenerationRequest::new("https://git.example.com/org/apps", "abc");
    let b = GenerationRequest::new("https://git.example.com/org/apps", "def");
    assert_eq!(target(&tracker, &a), target(&tracker, &b));
}

#[test]
fn fingerprint_scope_isolates_paths() {
    let tracker =
        FailureTracker::new(&BreakerConfig::new().scope(FailureScope::Fingerprint));
    let a = GenerationRequest::new("https://git.example.com/org/apps", "abc").path("web");
    let b = GenerationRequest::new("https://git.example.com/org/apps", "abc").path("api");
    assert_ne!(target(&tracker, &a), target(&tracker, &b));
}

struct ByAppName;

impl TargetKey for ByAppName {
    fn target(&self, request: &GenerationRequest, _fingerprint: &Fingerprint) -> String {
        format!("app:{}", request.app_name)
    }
}

#[test]
fn custom_target_key() {
    let tracker = FailureTracker::with_target_key(&BreakerConfig::default(), Arc::new(ByAppName));
    let req = GenerationRequest::new("https://git.example.com/org/apps", "abc").app_name("guestbook");
    assert_eq!(target(&tracker, &req), "app:guestbook");
}

#[test]
fn state_snapshot_tracks_streak() {
    let tracker = FailureTracker::new(&BreakerConfig::default());
    assert!(tracker.state("t").is_none());

    tracker.record_failure("t", &boom());
    tracker.record_failure("t", &ManifoldError::configuration("bad values"));

    let state = tracker.state("t").unwrap();
    assert_eq!(state.consecutive_failures, 2);
    assert!(state.last_error.contains("bad values"));
    assert_eq!(state.state, BreakerState::Closed);
}

#[test]
fn targets_are_independent() {
    let tracker = FailureTracker::new(&BreakerConfig::default());
    for _ in 0..3 {
        tracker.record_failure("broken", &boom());
    }
    assert!(tracker.check("broken").is_err());
    assert!(tracker.check("healthy").is_ok());
}

#[test]
fn custom_threshold() {
    let tracker = FailureTracker::new(&BreakerConfig::new().failure_threshold(1));
    assert!(tracker.record_failure("t", &boom()));
    assert!(tracker.check("t").unwrap_err().is_breaker_open());
}

#[test]
fn zero_pause_dimensions_disable_breaker() {
    let config = BreakerConfig::new()
        .pause_duration(Duration::ZERO)
        .pause_requests(0);
    assert!(!config.is_enabled());

    let tracker = FailureTracker::new(&config);
    for _ in 0..10 {
        assert!(!tracker.record_failure("t", &boom()));
    }
    assert!(tracker.check("t").is_ok());
    assert_eq!(tracker.consecutive_failures("t"), 10);
}

#[test]
fn rejection_reports_remaining_budget() {
    let tracker = FailureTracker::new(
        &BreakerConfig::new()
            .pause_duration(Duration::ZERO)
            .pause_requests(3),
    );
    for _ in 0..3 {
        tracker.record_failure("t", &boom());
    }

    let remaining: Vec<_> = (0..3)
        .map(|_| match tracker.check("t") {
            Err(ManifoldError::BreakerOpen {
                remaining_requests,
                retry_in,
                ..
            }) => {
                assert!(retry_in.is_none());
                remaining_requests
            }
            other => panic!("expected pause, got {other:?}"),
        })
        .collect();
    assert_eq!(remaining, vec![Some(2), Some(1), Some(0)]);

    assert_eq!(tracker.breaker_state("t"), BreakerState::HalfOpen);
    assert!(tracker.check("t").is_ok());
}

#[tokio::test(start_paused = true)]
async fn whichever_dimension_ends_first_wins() {
    let tracker = FailureTracker::new(
        &BreakerConfig::new()
            .pause_duration(Duration::from_secs(60))
            .pause_requests(100),
    );
    for _ in 0..3 {
        tracker.record_failure("t", &boom());
    }
    assert!(tracker.check("t").is_err());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(tracker.breaker_state("t"), BreakerState::HalfOpen);
    assert!(tracker.check("t").is_ok());
}

#[tokio::test(start_paused = true)]
async fn half_open_success_closes() {
    let tracker = FailureTracker::new(&BreakerConfig::default());
    for _ in 0..3 {
        tracker.record_failure("t", &boom());
    }
    tokio::time::advance(Duration::from_secs(3601)).await;
    assert!(tracker.check("t").is_ok());
    assert_eq!(tracker.breaker_state("t"), BreakerState::HalfOpen);

    tracker.record_success("t");
    assert_eq!(tracker.breaker_state("t"), BreakerState::Closed);
    assert_eq!(tracker.consecutive_failures("t"), 0);
}

#[test]
fn reset_all_closes_every_target() {
    let tracker = FailureTracker::new(&BreakerConfig::default());
    for name in ["a", "b"] {
        for _ in 0..3 {
            tracker.record_failure(name, &boom());
        }
    }
    tracker.reset_all();
    assert!(tracker.check("a").is_ok());
    assert!(tracker.check("b").is_ok());
}

#[test]
fn oversized_pause_is_capped() {
    let tracker = FailureTracker::new(
        &BreakerConfig::new()
            .failure_threshold(1)
            .pause_duration(Duration::from_secs(u64::MAX)),
    );
    assert!(tracker.record_failure("t", &boom()));

    match tracker.check("t") {
        Err(ManifoldError::BreakerOpen { retry_in, .. }) => {
            let retry_in = retry_in.expect("time window should be set");
            assert!(retry_in <= manifold::generation::breaker::MAX_PAUSE);
            assert!(retry_in > Duration::from_secs(365 * 24 * 3600));
        }
        other => panic!("expected BreakerOpen, got {other:?}"),
    }
}
