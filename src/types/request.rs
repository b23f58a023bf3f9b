//! Generation request and tool override types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What to render: a path within a repository at a resolved revision,
/// plus tool-specific overrides.
///
/// Setters can be chained in any order; the resulting
/// [`Fingerprint`](crate::cache::Fingerprint) only depends on the final
/// field values.
///
/// ```rust
/// # use manifold::{GenerationRequest, HelmOverrides};
/// let request = GenerationRequest::new("https://git.example.com/org/apps.git", "a1b2c3d")
///     .path("guestbook")
///     .namespace("default")
///     .helm(HelmOverrides::default().parameter("replicaCount", "2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub repo_url: String,
    /// Resolved, commit-like revision. Symbolic refs must be resolved by the caller.
    pub revision: String,
    /// Path of the application inside the repository.
    #[serde(default)]
    pub path: String,
    /// Include manifests from sub-directories.
    #[serde(default)]
    pub recurse: bool,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<KustomizeOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginOverrides>,
    /// Skip the cache lookup and force a fresh render. Not part of the fingerprint.
    #[serde(default)]
    pub no_cache: bool,
}

impl GenerationRequest {
    pub fn new(repo_url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            revision: revision.into(),
            ..Self::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn helm(mut self, helm: HelmOverrides) -> Self {
        self.helm = Some(helm);
        self
    }

    pub fn kustomize(mut self, kustomize: KustomizeOverrides) -> Self {
        self.kustomize = Some(kustomize);
        self
    }

    pub fn plugin(mut self, plugin: PluginOverrides) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Reject requests that cannot possibly be rendered.
    pub fn validate(&self) -> crate::Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(crate::ManifoldError::InvalidInput(
                "repo_url must not be empty".into(),
            ));
        }
        if self.revision.trim().is_empty() {
            return Err(crate::ManifoldError::InvalidInput(
                "revision must not be empty".into(),
            ));
        }
        if self.path.split('/').any(|segment| segment == "..") {
            return Err(crate::ManifoldError::InvalidInput(format!(
                "path '{}' escapes the repository root",
                self.path
            )));
        }
        Ok(())
    }
}

/// Helm-specific overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmOverrides {
    /// Values files, applied in order.
    #[serde(default)]
    pub values_files: Vec<String>,
    /// Inline values document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    /// `--set` style parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
}

impl HelmOverrides {
    pub fn values_file(mut self, file: impl Into<String>) -> Self {
        self.values_files.push(file.into());
        self
    }

    pub fn values(mut self, values: impl Into<String>) -> Self {
        self.values = Some(values.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn release_name(mut self, name: impl Into<String>) -> Self {
        self.release_name = Some(name.into());
        self
    }
}

/// Kustomize-specific overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeOverrides {
    /// Image overrides (`name=registry/name:tag`), applied in order.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,
    #[serde(default)]
    pub common_labels: HashMap<String, String>,
}

impl KustomizeOverrides {
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.name_suffix = Some(suffix.into());
        self
    }

    pub fn common_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.common_labels.insert(key.into(), value.into());
        self
    }
}

/// Config-management plugin overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginOverrides {
    pub name: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl PluginOverrides {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: HashMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
