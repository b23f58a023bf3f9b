//! Plain-manifest renderer over checked-out repositories on disk.
//!
//! Layout:
//!
//! ```text
//! <root>/<host>/<org>/<repo>/[<revision>/]<path>/*.{yaml,yml,json}
//! ```
//!
//! When a directory named after the requested revision exists under the
//! repository directory it is used as the worktree; otherwise the
//! repository directory itself is.
//!
//! Directories holding a `Chart.yaml` or a kustomization file are detected
//! and reported by [`list_apps`](ManifestRenderer::list_apps), but rendering
//! them needs the corresponding tool and fails with a configuration error.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ManifestRenderer;
use crate::cache::normalize_repo_url;
use crate::types::{AppDetails, AppList, GenerationRequest, ManifestResponse, SourceType};
use crate::{ManifoldError, Result};

const KUSTOMIZATION_FILES: &[&str] = &["kustomization.yaml", "kustomization.yml", "Kustomization"];

/// Renders YAML and JSON files found under a local directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryRenderer {
    root: PathBuf,
}

impl DirectoryRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a repository, derived from its URL.
    ///
    /// `https://github.com/org/repo.git` and `git@github.com:org/repo` both
    /// map to `<root>/github.com/org/repo`.
    pub fn repo_dir(&self, repo_url: &str) -> Result<PathBuf> {
        let url = normalize_repo_url(repo_url);
        let url = url
            .split_once("://")
            .map_or(url.as_str(), |(_, rest)| rest);
        let url = url.rsplit_once('@').map_or(url, |(_, rest)| rest);

        let mut dir = self.root.clone();
        let mut segments = 0;
        for segment in url.split(['/', ':']).filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(ManifoldError::InvalidInput(format!(
                    "repository url {repo_url:?} escapes the repository root"
                )));
            }
            dir.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(ManifoldError::InvalidInput(format!(
                "repository url {repo_url:?} has no path"
            )));
        }
        Ok(dir)
    }

    async fn worktree(&self, repo_url: &str, revision: &str) -> Result<PathBuf> {
        let repo = self.repo_dir(repo_url)?;
        if !is_dir(&repo).await {
            return Err(ManifoldError::NotFound(format!(
                "repository {repo_url} is not checked out"
            )));
        }
        if !revision.is_empty() && !revision.contains(['/', '\\']) && revision != ".." {
            let pinned = repo.join(revision);
            if is_dir(&pinned).await {
                return Ok(pinned);
            }
        }
        Ok(repo)
    }

    async fn app_dir(&self, request: &GenerationRequest) -> Result<PathBuf> {
        let worktree = self.worktree(&request.repo_url, &request.revision).await?;
        let relative = safe_relative(&request.path)?;
        let dir = worktree.join(&relative);
        if !is_dir(&dir).await {
            return Err(ManifoldError::configuration(format!(
                "app path {:?} does not exist at revision {}",
                request.path, request.revision
            )));
        }
        Ok(dir)
    }
}

#[async_trait]
impl ManifestRenderer for DirectoryRenderer {
    fn name(&self) -> &str {
        "directory"
    }

    async fn render(&self, request: &GenerationRequest) -> Result<ManifestResponse> {
        let dir = self.app_dir(request).await?;

        let source_type = if request.plugin.is_some() {
            SourceType::Plugin
        } else {
            detect_source_type(&dir).await
        };
        if source_type != SourceType::Directory {
            return Err(ManifoldError::configuration(format!(
                "{} source at {:?} cannot be rendered by the directory renderer",
                source_type, request.path
            )));
        }

        let files = manifest_files(&dir, request.recurse).await?;
        let mut manifests = Vec::new();
        for file in &files {
            let text = tokio::fs::read_to_string(file).await?;
            let relative = file.strip_prefix(&dir).unwrap_or(file);
            manifests.extend(split_manifests(relative, &text)?);
        }
        debug!(
            path = %dir.display(),
            files = files.len(),
            manifests = manifests.len(),
            "rendered directory"
        );

        Ok(ManifestResponse {
            manifests,
            revision: request.revision.clone(),
            source_type,
            namespace: request.namespace.clone(),
        })
    }

    async fn list_apps(&self, repo_url: &str, revision: &str) -> Result<AppList> {
        let worktree = self.worktree(repo_url, revision).await?;
        let mut apps = AppList::new();
        let mut pending = vec![worktree.clone()];

        while let Some(dir) = pending.pop() {
            let source_type = detect_source_type(&dir).await;
            let key = relative_key(&worktree, &dir);
            if source_type != SourceType::Directory {
                // Charts and kustomizations own their whole subtree.
                apps.insert(key, source_type);
                continue;
            }
            if !manifest_files(&dir, false).await?.is_empty() {
                apps.insert(key, SourceType::Directory);
            }
            let mut subdirs = subdirectories(&dir).await?;
            // Revision worktrees are not applications of the root.
            if dir == worktree {
                subdirs.retain(|d| d.file_name().is_none_or(|n| n != revision));
            }
            pending.extend(subdirs);
        }
        Ok(apps)
    }

    async fn app_details(&self, request: &GenerationRequest) -> Result<AppDetails> {
        let dir = self.app_dir(request).await?;
        let source_type = detect_source_type(&dir).await;
        let manifest_files = manifest_files(&dir, request.recurse)
            .await?
            .iter()
            .map(|file| relative_key(&dir, file))
            .collect();
        Ok(AppDetails {
            path: request.path.clone(),
            source_type,
            manifest_files,
        })
    }
}

/// Reject absolute paths and `..` so requests stay inside the worktree.
fn safe_relative(path: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ManifoldError::InvalidInput(format!(
                    "app path {path:?} must be relative to the repository root"
                )));
            }
        }
    }
    Ok(out)
}

fn relative_key(base: &Path, path: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn detect_source_type(dir: &Path) -> SourceType {
    if is_file(&dir.join("Chart.yaml")).await {
        return SourceType::Helm;
    }
    for name in KUSTOMIZATION_FILES {
        if is_file(&dir.join(name)).await {
            return SourceType::Kustomize;
        }
    }
    SourceType::Directory
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

async fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_hidden(&path) && entry.file_type().await?.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Manifest files under `dir`, sorted by path so output order is stable.
async fn manifest_files(dir: &Path, recurse: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if recurse {
                    pending.push(path);
                }
            } else if is_manifest(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Split one file into individual manifest documents.
fn split_manifests(file: &Path, text: &str) -> Result<Vec<String>> {
    if file.extension().and_then(|e| e.to_str()) == Some("json") {
        let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            ManifoldError::configuration(format!("{}: invalid JSON: {e}", file.display()))
        })?;
        return Ok(match value {
            serde_json::Value::Array(items) => items.iter().map(|v| v.to_string()).collect(),
            serde_json::Value::Null => Vec::new(),
            other => vec![other.to_string()],
        });
    }

    let mut docs = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_end() == "---" {
            push_document(&mut docs, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_document(&mut docs, &mut current);
    Ok(docs)
}

/// Keep a YAML document unless it is blank or comments only.
fn push_document(docs: &mut Vec<String>, current: &mut String) {
    let doc = std::mem::take(current);
    let has_content = doc.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#')
    });
    if has_content {
        docs.push(doc.trim_end().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_dir_from_https_and_scp_urls() {
        let renderer = DirectoryRenderer::new("/srv/repos");
        assert_eq!(
            renderer.repo_dir("https://github.com/Org/Repo.git").unwrap(),
            PathBuf::from("/srv/repos/github.com/org/repo")
        );
        assert_eq!(
            renderer.repo_dir("git@github.com:org/repo").unwrap(),
            PathBuf::from("/srv/repos/github.com/org/repo")
        );
    }

    #[test]
    fn repo_dir_rejects_traversal() {
        let renderer = DirectoryRenderer::new("/srv/repos");
        assert!(renderer.repo_dir("https://host/../../etc").is_err());
        assert!(renderer.repo_dir("  ").is_err());
    }

    #[test]
    fn safe_relative_rejects_escapes() {
        assert!(safe_relative("/etc").is_err());
        assert!(safe_relative("apps/../../x").is_err());
        assert_eq!(safe_relative("./apps/web").unwrap(), PathBuf::from("apps/web"));
    }

    #[test]
    fn yaml_split_drops_empty_documents() {
        let text = "---\n# header\n---\nkind: A\n---\n\n---\nkind: B\n";
        let docs = split_manifests(Path::new("x.yaml"), text).unwrap();
        assert_eq!(docs, vec!["kind: A".to_string(), "kind: B".to_string()]);
    }

    #[test]
    fn json_array_yields_each_item() {
        let docs = split_manifests(Path::new("x.json"), r#"[{"kind":"A"},{"kind":"B"}]"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("\"A\""));
    }

    #[test]
    fn invalid_json_is_configuration_error() {
        let err = split_manifests(Path::new("x.json"), "{ nope").unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.kind(), "render_configuration");
    }
}
