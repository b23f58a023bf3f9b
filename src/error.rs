//! Manifold error types

use std::time::Duration;

/// How a rendering failure should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderErrorKind {
    /// The tool or repository may succeed on a later attempt
    /// (unreachable remote, timeouts, interrupted subprocess).
    Transient,
    /// The application source itself is broken (invalid manifests,
    /// missing path, bad overrides). Retrying the same revision won't help.
    Configuration,
}

/// Manifold error types
///
/// Errors are `Clone` so a single outcome can be handed to every caller
/// joined on the same in-flight generation, and replayed from the cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManifoldError {
    // Gating errors
    /// Generation for this target is paused after repeated failures.
    #[error(
        "manifest generation paused for {target} after {failures} consecutive failures: {last_error}"
    )]
    BreakerOpen {
        target: String,
        failures: u32,
        /// Wall-clock time left in the pause window, if that dimension is active.
        retry_in: Option<Duration>,
        /// Requests left to suppress, if that dimension is active.
        remaining_requests: Option<u32>,
        last_error: String,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("request cancelled")]
    Cancelled,

    // Collaborator errors
    #[error("render failed ({kind:?}): {message}")]
    Render {
        kind: RenderErrorKind,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    // Request / configuration errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),

    // Remote client errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ManifoldError {
    /// Shorthand for a transient render failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Render {
            kind: RenderErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a configuration render failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Render {
            kind: RenderErrorKind::Configuration,
            message: message.into(),
        }
    }

    /// Whether retrying the same request later may succeed.
    ///
    /// Breaker rejections are transient: the pause window ends on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Render { kind, .. } => *kind == RenderErrorKind::Transient,
            Self::BreakerOpen { .. }
            | Self::ResourceExhausted(_)
            | Self::Cancelled
            | Self::Transport(_) => true,
            _ => false,
        }
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. })
    }

    /// Stable machine-readable kind, used on the wire and as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BreakerOpen { .. } => "breaker_open",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Cancelled => "cancelled",
            Self::Render {
                kind: RenderErrorKind::Transient,
                ..
            } => "render_transient",
            Self::Render {
                kind: RenderErrorKind::Configuration,
                ..
            } => "render_configuration",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Configuration(_) => "configuration",
            Self::NotImplemented(_) => "not_implemented",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for ManifoldError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ManifoldError::NotFound(err.to_string()),
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused => ManifoldError::transient(err.to_string()),
            _ => ManifoldError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ManifoldError {
    fn from(err: serde_json::Error) -> Self {
        ManifoldError::configuration(format!("invalid JSON manifest: {err}"))
    }
}

/// Result type alias for Manifold operations
pub type Result<T> = std::result::Result<T, ManifoldError>;
