//! Generation results and read-only application metadata

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The tool family that produced an application's manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Directory,
    Helm,
    Kustomize,
    Plugin,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Directory => "Directory",
            SourceType::Helm => "Helm",
            SourceType::Kustomize => "Kustomize",
            SourceType::Plugin => "Plugin",
        };
        f.write_str(name)
    }
}

/// Rendered manifests for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestResponse {
    /// Manifest documents in render order.
    pub manifests: Vec<String>,
    pub revision: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub namespace: String,
}

/// Discoverable applications at a revision, keyed by path.
pub type AppList = BTreeMap<String, SourceType>;

/// Details of a single application at a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetails {
    pub path: String,
    pub source_type: SourceType,
    /// Manifest files that make up the app, relative to `path`.
    #[serde(default)]
    pub manifest_files: Vec<String>,
}

/// Commit metadata for a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    pub author: String,
    /// Commit time, seconds since the Unix epoch.
    pub date_unix: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub message: String,
}

/// External event after which cached results can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationSignal {
    /// Drop everything rendered from this repository.
    Repository(String),
    /// Repository credentials were added, rotated or removed.
    CredentialsChanged(String),
    /// The GPG keyring changed; signature verification results may differ.
    KeyringChanged,
    /// Drop every cached result.
    All,
}

impl InvalidationSignal {
    /// The repository this signal is scoped to, or `None` for a global signal.
    pub fn repository(&self) -> Option<&str> {
        match self {
            InvalidationSignal::Repository(url) | InvalidationSignal::CredentialsChanged(url) => {
                Some(url)
            }
            InvalidationSignal::KeyringChanged | InvalidationSignal::All => None,
        }
    }
}
