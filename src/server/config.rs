//! Configuration loading for manifoldd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.manifold/config.toml` (user)
//! 3. `/etc/manifold/config.toml` (system)
//!
//! If none of these exist the daemon runs with built-in defaults.
//!
//! After the file is read, environment variables override the pause policy
//! and parallelism limit (see [`Config::apply_env`]). Command-line flags are
//! applied last by the binary.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::cache::CacheConfig;
use crate::generation::{BreakerConfig, FailureScope, GenerationConfig, LimiterConfig};
use crate::{ManifoldError, Result};

/// Consecutive failures before generation is paused.
pub const ENV_PAUSE_AFTER_FAILED_ATTEMPTS: &str = "MANIFOLD_PAUSE_GEN_AFTER_FAILED_ATTEMPTS";
/// Minutes a paused target stays paused.
pub const ENV_PAUSE_MINUTES: &str = "MANIFOLD_PAUSE_GEN_MINUTES";
/// Requests a paused target rejects.
pub const ENV_PAUSE_REQUESTS: &str = "MANIFOLD_PAUSE_GEN_REQUESTS";
/// Maximum concurrent renders (below 1 = unbounded).
pub const ENV_PARALLELISM_LIMIT: &str = "MANIFOLD_PARALLELISM_LIMIT";

/// Upper bound for `pause_for_minutes`, shared by the file and env paths.
pub const MAX_PAUSE_MINUTES: u64 = i32::MAX as u64;

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8081).
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            limits: LimitsConfig::default(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8081".to_string()
}

/// Resource limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent renders; below 1 means unbounded (default: 0).
    #[serde(default)]
    pub parallelism_limit: i64,
    /// Seconds to wait for a render slot; 0 waits indefinitely (default: 0).
    #[serde(default)]
    pub acquire_timeout_secs: u64,
    /// Per-RPC timeout in seconds (default: 60).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            parallelism_limit: 0,
            acquire_timeout_secs: 0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// Result cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Seconds to cache failed renders; 0 disables failure caching.
    #[serde(default)]
    pub failure_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
            failure_ttl_secs: 0,
        }
    }
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

/// Generation pause policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_pause_after")]
    pub pause_after_failed_attempts: u32,
    #[serde(default = "default_pause_minutes")]
    pub pause_for_minutes: u64,
    #[serde(default)]
    pub pause_for_requests: u32,
    #[serde(default)]
    pub scope: FailureScope,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            pause_after_failed_attempts: default_pause_after(),
            pause_for_minutes: default_pause_minutes(),
            pause_for_requests: 0,
            scope: FailureScope::default(),
        }
    }
}

fn default_pause_after() -> u32 {
    3
}

fn default_pause_minutes() -> u64 {
    60
}

/// Where checked-out repositories live.
#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_renderer_root")]
    pub root: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            root: default_renderer_root(),
        }
    }
}

fn default_renderer_root() -> PathBuf {
    PathBuf::from("/var/lib/manifold/repos")
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `manifold=debug` (default: info).
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// An explicit path must exist. Without one, the first existing standard
    /// location is used, or defaults when there is none.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse one config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ManifoldError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ManifoldError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path, `None` when no file is present.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(ManifoldError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".manifold").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/manifold/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Values that do not parse, or fall outside the accepted range, are
    /// ignored with a warning and the configured value is kept.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = env_number(&lookup, ENV_PAUSE_AFTER_FAILED_ATTEMPTS, 0, i64::from(i32::MAX)) {
            self.breaker.pause_after_failed_attempts = n as u32;
        }
        if let Some(n) = env_number(&lookup, ENV_PAUSE_MINUTES, 0, MAX_PAUSE_MINUTES as i64) {
            self.breaker.pause_for_minutes = n as u64;
        }
        if let Some(n) = env_number(&lookup, ENV_PAUSE_REQUESTS, 0, i64::from(i32::MAX)) {
            self.breaker.pause_for_requests = n as u32;
        }
        if let Some(n) = env_number(&lookup, ENV_PARALLELISM_LIMIT, i64::MIN, i64::MAX) {
            self.server.limits.parallelism_limit = n;
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.cache.max_entries)
            .ttl(Duration::from_secs(self.cache.ttl_secs))
            .failure_ttl(Duration::from_secs(self.cache.failure_ttl_secs))
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        let mut minutes = self.breaker.pause_for_minutes;
        if minutes > MAX_PAUSE_MINUTES {
            warn!(
                pause_for_minutes = minutes,
                max = MAX_PAUSE_MINUTES,
                "pause_for_minutes too large, clamping"
            );
            minutes = MAX_PAUSE_MINUTES;
        }
        BreakerConfig::new()
            .failure_threshold(self.breaker.pause_after_failed_attempts)
            .pause_duration(Duration::from_secs(minutes * 60))
            .pause_requests(self.breaker.pause_for_requests)
            .scope(self.breaker.scope)
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        let limiter = LimiterConfig::from_signed_limit(self.server.limits.parallelism_limit);
        match self.server.limits.acquire_timeout_secs {
            0 => limiter,
            secs => limiter.acquire_timeout(Duration::from_secs(secs)),
        }
    }

    /// Everything the orchestrator needs, derived from this config.
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig::new()
            .cache(self.cache_config())
            .breaker(self.breaker_config())
            .limiter(self.limiter_config())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.server.limits.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn env_number<F>(lookup: &F, name: &str, min: i64, max: i64) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<i64>() {
        Ok(n) if (min..=max).contains(&n) => Some(n),
        Ok(n) => {
            warn!(variable = name, value = n, min, max, "value out of range, ignoring");
            None
        }
        Err(e) => {
            warn!(variable = name, value = %raw, error = %e, "invalid number, ignoring");
            None
        }
    }
}
