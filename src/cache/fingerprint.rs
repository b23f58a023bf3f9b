//! Stable fingerprints for generation requests.
//!
//! A [`Fingerprint`] is a SHA-256 digest over every field of a
//! [`GenerationRequest`] that can change the rendered output. Unlike the
//! in-process `DefaultHasher`, the digest is identical across restarts and
//! hosts, so it can double as a shared-cache key.
//!
//! Each field is written as `tag || len || bytes`, which keeps adjacent
//! fields from bleeding into each other (`("ab", "c")` vs `("a", "bc")`).
//! Map-valued overrides are sorted by key before hashing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::types::GenerationRequest;

/// Bumped whenever the encoding below changes.
const FINGERPRINT_VERSION: &[u8] = b"manifold.fingerprint.v1";

/// Deterministic digest of a request's rendering-affecting inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// A key derived from this one and `salt`. Salt zero returns `self`.
    pub fn salted(&self, salt: u64) -> Fingerprint {
        if salt == 0 {
            return *self;
        }
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        hasher.update(salt.to_be_bytes());
        Fingerprint(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Compute the fingerprint of a generation request.
///
/// `no_cache` is excluded: it changes how a request is served,
/// not what it renders.
pub fn fingerprint(request: &GenerationRequest) -> Fingerprint {
    let mut hasher = FieldHasher::new();
    hasher.text("repo_url", &request.repo_url);
    hasher.text("revision", &request.revision);
    hasher.text("path", normalize_path(&request.path));
    hasher.flag("recurse", request.recurse);
    hasher.text("app_name", &request.app_name);
    hasher.text("namespace", &request.namespace);

    match &request.helm {
        Some(helm) => {
            hasher.present("helm");
            hasher.list("helm.values_files", &helm.values_files);
            hasher.opt("helm.values", helm.values.as_deref());
            hasher.map("helm.parameters", &helm.parameters);
            hasher.opt("helm.release_name", helm.release_name.as_deref());
        }
        None => hasher.absent("helm"),
    }

    match &request.kustomize {
        Some(kustomize) => {
            hasher.present("kustomize");
            hasher.list("kustomize.images", &kustomize.images);
            hasher.opt("kustomize.name_prefix", kustomize.name_prefix.as_deref());
            hasher.opt("kustomize.name_suffix", kustomize.name_suffix.as_deref());
            hasher.map("kustomize.common_labels", &kustomize.common_labels);
        }
        None => hasher.absent("kustomize"),
    }

    match &request.plugin {
        Some(plugin) => {
            hasher.present("plugin");
            hasher.text("plugin.name", &plugin.name);
            hasher.map("plugin.env", &plugin.env);
        }
        None => hasher.absent("plugin"),
    }

    hasher.finish()
}

/// `apps/guestbook/`, `./apps/guestbook` and `apps/guestbook` render the same tree.
fn normalize_path(path: &str) -> &str {
    let path = path.trim_start_matches("./").trim_matches('/');
    if path == "." { "" } else { path }
}

struct FieldHasher {
    inner: Sha256,
}

impl FieldHasher {
    fn new() -> Self {
        let mut inner = Sha256::new();
        inner.update(FINGERPRINT_VERSION);
        Self { inner }
    }

    fn bytes(&mut self, tag: &str, value: &[u8]) {
        self.inner.update((tag.len() as u64).to_le_bytes());
        self.inner.update(tag.as_bytes());
        self.inner.update((value.len() as u64).to_le_bytes());
        self.inner.update(value);
    }

    fn text(&mut self, tag: &str, value: &str) {
        self.bytes(tag, value.as_bytes());
    }

    fn flag(&mut self, tag: &str, value: bool) {
        self.bytes(tag, &[u8::from(value)]);
    }

    fn present(&mut self, tag: &str) {
        self.bytes(tag, &[1]);
    }

    fn absent(&mut self, tag: &str) {
        self.bytes(tag, &[0]);
    }

    fn opt(&mut self, tag: &str, value: Option<&str>) {
        match value {
            Some(v) => {
                self.present(tag);
                self.text(tag, v);
            }
            None => self.absent(tag),
        }
    }

    // Ordered lists: order is semantic (values files and image overrides layer).
    fn list(&mut self, tag: &str, values: &[String]) {
        self.bytes(tag, &(values.len() as u64).to_le_bytes());
        for value in values {
            self.text(tag, value);
        }
    }

    fn map(&mut self, tag: &str, values: &HashMap<String, String>) {
        let sorted: BTreeMap<&str, &str> = values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.bytes(tag, &(sorted.len() as u64).to_le_bytes());
        for (key, value) in sorted {
            self.text(tag, key);
            self.text(tag, value);
        }
    }

    fn finish(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}
