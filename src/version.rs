//! Build identity reported by `Health` and logged by manifoldd at startup.
//!
//! Git details come from vergen at build time. Builds outside a git checkout
//! (crates.io tarballs, vendored sources) report the bare package version.

use std::fmt;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const SHORT_SHA_LEN: usize = 7;

/// Where this binary was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub branch: Option<&'static str>,
    pub commit: Option<&'static str>,
    pub dirty: bool,
}

impl BuildInfo {
    /// Abbreviated commit hash, if known.
    pub fn short_commit(&self) -> Option<&'static str> {
        self.commit
            .map(|sha| sha.get(..SHORT_SHA_LEN).unwrap_or(sha))
    }
}

/// Renders as `{version}`, `{version}+{branch}.{sha}` or
/// `{version}+{branch}.{sha}.dirty`, e.g. `0.1.0+main.4f2c9e1`.
impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version)?;
        let Some(sha) = self.short_commit() else {
            return Ok(());
        };
        write!(f, "+{}.{sha}", self.branch.unwrap_or("detached"))?;
        if self.dirty {
            f.write_str(".dirty")?;
        }
        Ok(())
    }
}

/// Build identity of the running binary.
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: PKG_VERSION,
        branch: option_env!("VERGEN_GIT_BRANCH"),
        commit: option_env!("VERGEN_GIT_SHA"),
        dirty: option_env!("VERGEN_GIT_DIRTY") == Some("true"),
    }
}

/// [`build_info`] as a string.
pub fn version_string() -> String {
    build_info().to_string()
}
