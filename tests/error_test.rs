use std::time::Duration;

use manifold::{ManifoldError, RenderErrorKind, Result};

#[test]
fn test_error_display() {
    let err = ManifoldError::NotFound("repository https://git.example.com/org/apps".to_string());
    assert!(err.to_string().contains("git.example.com/org/apps"));
}

#[test]
fn test_not_implemented() {
    let err = ManifoldError::NotImplemented("revision_metadata");
    assert!(err.to_string().contains("not implemented"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(ManifoldError::Cancelled)
    }
    assert!(returns_error().is_err());
}

#[test]
fn test_breaker_open_display() {
    let err = ManifoldError::BreakerOpen {
        target: "https://git.example.com/org/apps@abc".into(),
        failures: 3,
        retry_in: Some(Duration::from_secs(600)),
        remaining_requests: None,
        last_error: "kustomize build failed".into(),
    };
    let text = err.to_string();
    assert!(text.contains("paused"));
    assert!(text.contains("3 consecutive failures"));
    assert!(text.contains("kustomize build failed"));
}

// ============================================================================
// Transient error classification
// ============================================================================

#[test]
fn transient_errors() {
    let transient = [
        ManifoldError::transient("connection reset"),
        ManifoldError::ResourceExhausted("no slot".into()),
        ManifoldError::Cancelled,
        ManifoldError::Transport("h2 protocol error".into()),
        ManifoldError::BreakerOpen {
            target: "t".into(),
            failures: 3,
            retry_in: None,
            remaining_requests: Some(1),
            last_error: String::new(),
        },
    ];
    for err in transient {
        assert!(err.is_transient(), "{err} should be transient");
    }
}

#[test]
fn permanent_errors() {
    let permanent = [
        ManifoldError::configuration("invalid YAML"),
        ManifoldError::InvalidInput("empty revision".into()),
        ManifoldError::Configuration("no renderer".into()),
        ManifoldError::NotFound("app".into()),
        ManifoldError::NotImplemented("list_apps"),
        ManifoldError::Internal("panic".into()),
    ];
    for err in permanent {
        assert!(!err.is_transient(), "{err} should not be transient");
    }
}

#[test]
fn render_helpers_set_kind() {
    assert!(matches!(
        ManifoldError::transient("x"),
        ManifoldError::Render {
            kind: RenderErrorKind::Transient,
            ..
        }
    ));
    assert!(matches!(
        ManifoldError::configuration("x"),
        ManifoldError::Render {
            kind: RenderErrorKind::Configuration,
            ..
        }
    ));
}

#[test]
fn kinds_are_distinct() {
    let kinds = [
        ManifoldError::BreakerOpen {
            target: String::new(),
            failures: 0,
            retry_in: None,
            remaining_requests: None,
            last_error: String::new(),
        }
        .kind(),
        ManifoldError::ResourceExhausted(String::new()).kind(),
        ManifoldError::Cancelled.kind(),
        ManifoldError::transient("").kind(),
        ManifoldError::configuration("").kind(),
        ManifoldError::NotFound(String::new()).kind(),
        ManifoldError::InvalidInput(String::new()).kind(),
        ManifoldError::Configuration(String::new()).kind(),
        ManifoldError::NotImplemented("").kind(),
        ManifoldError::Transport(String::new()).kind(),
        ManifoldError::Internal(String::new()).kind(),
    ];
    let unique: std::collections::HashSet<_> = kinds.iter().collect();
    assert_eq!(unique.len(), kinds.len());
}

// ============================================================================
// Conversions
// ============================================================================

#[test]
fn io_errors_are_classified() {
    let missing: ManifoldError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
    assert!(matches!(missing, ManifoldError::NotFound(_)));

    let timeout: ManifoldError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
    assert!(timeout.is_transient());

    let denied: ManifoldError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
    assert!(matches!(denied, ManifoldError::Internal(_)));
}

#[test]
fn json_errors_are_configuration_errors() {
    let err: ManifoldError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert_eq!(err.kind(), "render_configuration");
}

#[test]
fn errors_are_clone() {
    let err = ManifoldError::configuration("values.yaml: bad indent");
    let copy = err.clone();
    assert_eq!(err.to_string(), copy.to_string());
}
