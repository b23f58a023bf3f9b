//! Conversions between manifold native types and protobuf types.
//!
//! Both directions live here: the server converts incoming requests proto →
//! native and responses native → proto, the client does the reverse.
//! Errors travel as `tonic::Status` plus metadata describing the
//! [`ManifoldError`] variant, so the client can rebuild the same variant.

use std::collections::HashMap;
use std::time::Duration;

use tonic::metadata::MetadataMap;

use crate::types::{
    AppDetails, AppList, GenerationRequest, HelmOverrides, InvalidationSignal,
    KustomizeOverrides, ManifestResponse, PluginOverrides, RevisionMetadata, SourceType,
};
use crate::{ManifoldError, RenderErrorKind};

use super::proto;
use super::proto::invalidate_cache_request::Signal;

/// Metadata key carrying [`ManifoldError::kind`].
pub const ERROR_KIND_KEY: &str = "x-manifold-error";
/// Breaker target of a paused request.
pub const BREAKER_TARGET_KEY: &str = "x-manifold-breaker-target";
/// Consecutive failures of a paused target.
pub const BREAKER_FAILURES_KEY: &str = "x-manifold-breaker-failures";
/// Seconds left in a pause window.
pub const RETRY_AFTER_KEY: &str = "x-manifold-retry-after-secs";
/// Requests left in a pause budget.
pub const REMAINING_REQUESTS_KEY: &str = "x-manifold-remaining-requests";

// =============================================================================
// Requests
// =============================================================================

impl From<proto::ManifestRequest> for GenerationRequest {
    fn from(p: proto::ManifestRequest) -> Self {
        GenerationRequest {
            repo_url: p.repo_url,
            revision: p.revision,
            path: p.path,
            recurse: p.recurse,
            app_name: p.app_name,
            namespace: p.namespace,
            helm: p.helm.map(Into::into),
            kustomize: p.kustomize.map(Into::into),
            plugin: p.plugin.map(Into::into),
            no_cache: p.no_cache,
        }
    }
}

impl From<&GenerationRequest> for proto::ManifestRequest {
    fn from(r: &GenerationRequest) -> Self {
        proto::ManifestRequest {
            repo_url: r.repo_url.clone(),
            revision: r.revision.clone(),
            path: r.path.clone(),
            recurse: r.recurse,
            app_name: r.app_name.clone(),
            namespace: r.namespace.clone(),
            no_cache: r.no_cache,
            helm: r.helm.clone().map(Into::into),
            kustomize: r.kustomize.clone().map(Into::into),
            plugin: r.plugin.clone().map(Into::into),
        }
    }
}

impl From<proto::HelmOverrides> for HelmOverrides {
    fn from(p: proto::HelmOverrides) -> Self {
        HelmOverrides {
            values_files: p.values_files,
            values: p.values,
            parameters: p.parameters,
            release_name: p.release_name,
        }
    }
}

impl From<HelmOverrides> for proto::HelmOverrides {
    fn from(h: HelmOverrides) -> Self {
        proto::HelmOverrides {
            values_files: h.values_files,
            values: h.values,
            parameters: h.parameters,
            release_name: h.release_name,
        }
    }
}

impl From<proto::KustomizeOverrides> for KustomizeOverrides {
    fn from(p: proto::KustomizeOverrides) -> Self {
        KustomizeOverrides {
            images: p.images,
            name_prefix: p.name_prefix,
            name_suffix: p.name_suffix,
            common_labels: p.common_labels,
        }
    }
}

impl From<KustomizeOverrides> for proto::KustomizeOverrides {
    fn from(k: KustomizeOverrides) -> Self {
        proto::KustomizeOverrides {
            images: k.images,
            name_prefix: k.name_prefix,
            name_suffix: k.name_suffix,
            common_labels: k.common_labels,
        }
    }
}

impl From<proto::PluginOverrides> for PluginOverrides {
    fn from(p: proto::PluginOverrides) -> Self {
        PluginOverrides {
            name: p.name,
            env: p.env,
        }
    }
}

impl From<PluginOverrides> for proto::PluginOverrides {
    fn from(p: PluginOverrides) -> Self {
        proto::PluginOverrides {
            name: p.name,
            env: p.env,
        }
    }
}

impl TryFrom<proto::InvalidateCacheRequest> for InvalidationSignal {
    type Error = ManifoldError;

    fn try_from(p: proto::InvalidateCacheRequest) -> Result<Self, Self::Error> {
        match p.signal {
            Some(Signal::Repository(url)) => Ok(InvalidationSignal::Repository(url)),
            Some(Signal::CredentialsChanged(url)) => Ok(InvalidationSignal::CredentialsChanged(url)),
            Some(Signal::KeyringChanged(true)) => Ok(InvalidationSignal::KeyringChanged),
            Some(Signal::All(true)) => Ok(InvalidationSignal::All),
            Some(Signal::KeyringChanged(false) | Signal::All(false)) | None => Err(
                ManifoldError::InvalidInput("invalidation request carries no signal".into()),
            ),
        }
    }
}

impl From<InvalidationSignal> for proto::InvalidateCacheRequest {
    fn from(signal: InvalidationSignal) -> Self {
        let signal = match signal {
            InvalidationSignal::Repository(url) => Signal::Repository(url),
            InvalidationSignal::CredentialsChanged(url) => Signal::CredentialsChanged(url),
            InvalidationSignal::KeyringChanged => Signal::KeyringChanged(true),
            InvalidationSignal::All => Signal::All(true),
        };
        proto::InvalidateCacheRequest {
            signal: Some(signal),
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

impl From<SourceType> for proto::SourceType {
    fn from(s: SourceType) -> Self {
        match s {
            SourceType::Directory => proto::SourceType::Directory,
            SourceType::Helm => proto::SourceType::Helm,
            SourceType::Kustomize => proto::SourceType::Kustomize,
            SourceType::Plugin => proto::SourceType::Plugin,
        }
    }
}

/// Decode a wire enum value; unknown values read as a plain directory.
pub fn source_type_from_i32(value: i32) -> SourceType {
    match proto::SourceType::try_from(value).unwrap_or(proto::SourceType::Unspecified) {
        proto::SourceType::Helm => SourceType::Helm,
        proto::SourceType::Kustomize => SourceType::Kustomize,
        proto::SourceType::Plugin => SourceType::Plugin,
        proto::SourceType::Directory | proto::SourceType::Unspecified => SourceType::Directory,
    }
}

impl From<&ManifestResponse> for proto::ManifestResponse {
    fn from(r: &ManifestResponse) -> Self {
        proto::ManifestResponse {
            manifests: r.manifests.clone(),
            revision: r.revision.clone(),
            source_type: proto::SourceType::from(r.source_type) as i32,
            namespace: r.namespace.clone(),
        }
    }
}

impl From<proto::ManifestResponse> for ManifestResponse {
    fn from(p: proto::ManifestResponse) -> Self {
        ManifestResponse {
            manifests: p.manifests,
            revision: p.revision,
            source_type: source_type_from_i32(p.source_type),
            namespace: p.namespace,
        }
    }
}

pub fn app_list_to_proto(apps: AppList) -> proto::ListAppsResponse {
    proto::ListAppsResponse {
        apps: apps
            .into_iter()
            .map(|(path, source_type)| (path, proto::SourceType::from(source_type) as i32))
            .collect::<HashMap<_, _>>(),
    }
}

pub fn app_list_from_proto(p: proto::ListAppsResponse) -> AppList {
    p.apps
        .into_iter()
        .map(|(path, source_type)| (path, source_type_from_i32(source_type)))
        .collect()
}

impl From<AppDetails> for proto::AppDetailsResponse {
    fn from(d: AppDetails) -> Self {
        proto::AppDetailsResponse {
            path: d.path,
            source_type: proto::SourceType::from(d.source_type) as i32,
            manifest_files: d.manifest_files,
        }
    }
}

impl From<proto::AppDetailsResponse> for AppDetails {
    fn from(p: proto::AppDetailsResponse) -> Self {
        AppDetails {
            path: p.path,
            source_type: source_type_from_i32(p.source_type),
            manifest_files: p.manifest_files,
        }
    }
}

impl From<RevisionMetadata> for proto::RevisionMetadataResponse {
    fn from(m: RevisionMetadata) -> Self {
        proto::RevisionMetadataResponse {
            author: m.author,
            date_unix: m.date_unix,
            tags: m.tags,
            message: m.message,
        }
    }
}

impl From<proto::RevisionMetadataResponse> for RevisionMetadata {
    fn from(p: proto::RevisionMetadataResponse) -> Self {
        RevisionMetadata {
            author: p.author,
            date_unix: p.date_unix,
            tags: p.tags,
            message: p.message,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// The variant payload without the `Display` prefix.
fn error_detail(err: &ManifoldError) -> String {
    match err {
        ManifoldError::BreakerOpen { last_error, .. } => last_error.clone(),
        ManifoldError::Render { message, .. } => message.clone(),
        ManifoldError::ResourceExhausted(m)
        | ManifoldError::NotFound(m)
        | ManifoldError::InvalidInput(m)
        | ManifoldError::Configuration(m)
        | ManifoldError::Transport(m)
        | ManifoldError::Internal(m) => m.clone(),
        ManifoldError::NotImplemented(op) => (*op).to_string(),
        ManifoldError::Cancelled => String::new(),
    }
}

fn insert_ascii(metadata: &mut MetadataMap, key: &'static str, value: impl ToString) {
    if let Ok(value) = value.to_string().parse() {
        metadata.insert(key, value);
    }
}

/// Convert a [`ManifoldError`] into a `tonic::Status`.
pub fn to_status(err: &ManifoldError) -> tonic::Status {
    let code = match err {
        ManifoldError::BreakerOpen { .. } => tonic::Code::Unavailable,
        ManifoldError::ResourceExhausted(_) => tonic::Code::ResourceExhausted,
        ManifoldError::Cancelled => tonic::Code::Cancelled,
        ManifoldError::Render {
            kind: RenderErrorKind::Transient,
            ..
        } => tonic::Code::Unavailable,
        ManifoldError::Render {
            kind: RenderErrorKind::Configuration,
            ..
        } => tonic::Code::FailedPrecondition,
        ManifoldError::NotFound(_) => tonic::Code::NotFound,
        ManifoldError::InvalidInput(_) => tonic::Code::InvalidArgument,
        ManifoldError::Configuration(_) => tonic::Code::FailedPrecondition,
        ManifoldError::NotImplemented(_) => tonic::Code::Unimplemented,
        ManifoldError::Transport(_) => tonic::Code::Unavailable,
        ManifoldError::Internal(_) => tonic::Code::Internal,
    };

    let mut status = tonic::Status::new(code, error_detail(err));
    let metadata = status.metadata_mut();
    insert_ascii(metadata, ERROR_KIND_KEY, err.kind());
    if let ManifoldError::BreakerOpen {
        target,
        failures,
        retry_in,
        remaining_requests,
        ..
    } = err
    {
        insert_ascii(metadata, BREAKER_TARGET_KEY, target);
        insert_ascii(metadata, BREAKER_FAILURES_KEY, failures);
        if let Some(retry_in) = retry_in {
            insert_ascii(metadata, RETRY_AFTER_KEY, retry_in.as_secs());
        }
        if let Some(remaining) = remaining_requests {
            insert_ascii(metadata, REMAINING_REQUESTS_KEY, remaining);
        }
    }
    status
}

fn metadata_str<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.to_str().ok())
}

fn metadata_num<T: std::str::FromStr>(metadata: &MetadataMap, key: &str) -> Option<T> {
    metadata_str(metadata, key).and_then(|v| v.parse().ok())
}

/// Convert a `tonic::Status` back into a [`ManifoldError`].
///
/// Statuses produced by [`to_status`] round-trip to the same variant; any
/// other status is classified by its code.
pub fn from_status(status: &tonic::Status) -> ManifoldError {
    let metadata = status.metadata();
    let message = status.message().to_string();

    match metadata_str(metadata, ERROR_KIND_KEY) {
        Some("breaker_open") => ManifoldError::BreakerOpen {
            target: metadata_str(metadata, BREAKER_TARGET_KEY)
                .unwrap_or_default()
                .to_string(),
            failures: metadata_num(metadata, BREAKER_FAILURES_KEY).unwrap_or_default(),
            retry_in: metadata_num(metadata, RETRY_AFTER_KEY).map(Duration::from_secs),
            remaining_requests: metadata_num(metadata, REMAINING_REQUESTS_KEY),
            last_error: message,
        },
        Some("resource_exhausted") => ManifoldError::ResourceExhausted(message),
        Some("cancelled") => ManifoldError::Cancelled,
        Some("render_transient") => ManifoldError::transient(message),
        Some("render_configuration") => ManifoldError::configuration(message),
        Some("not_found") => ManifoldError::NotFound(message),
        Some("invalid_input") => ManifoldError::InvalidInput(message),
        Some("configuration") => ManifoldError::Configuration(message),
        Some("not_implemented") => ManifoldError::NotImplemented(not_implemented_op(&message)),
        Some("transport") => ManifoldError::Transport(message),
        Some("internal") => ManifoldError::Internal(message),
        _ => match status.code() {
            tonic::Code::NotFound => ManifoldError::NotFound(message),
            tonic::Code::InvalidArgument => ManifoldError::InvalidInput(message),
            tonic::Code::ResourceExhausted => ManifoldError::ResourceExhausted(message),
            tonic::Code::Cancelled => ManifoldError::Cancelled,
            tonic::Code::Unimplemented => ManifoldError::NotImplemented(not_implemented_op(&message)),
            tonic::Code::Internal => ManifoldError::Internal(message),
            _ => ManifoldError::Transport(format!("{}: {message}", status.code())),
        },
    }
}

/// Map a remote operation name back onto a static string.
fn not_implemented_op(op: &str) -> &'static str {
    const KNOWN: &[&str] = &[
        "generate_manifest",
        "list_apps",
        "app_details",
        "revision_metadata",
        "invalidate",
    ];
    KNOWN
        .iter()
        .find(|known| **known == op)
        .copied()
        .unwrap_or("remote operation")
}
