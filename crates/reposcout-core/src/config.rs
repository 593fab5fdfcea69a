//! Configuration for the reposcout service.
//!
//! Settings are layered, later layers winning:
//!
//! 1. **Built-in defaults** ([`Config::default`])
//! 2. **TOML file**: an explicit path, or `config.toml` in the platform config
//!    directory if it exists
//! 3. **Environment**: `REPOSCOUT_GITHUB_TOKEN`, then `GITHUB_TOKEN`, fill in
//!    the upstream token when the file did not set one
//! 4. **Command-line flags**, applied by the server binary
//!
//! ## Example Configuration File
//!
//! ```toml
//! [server]
//! listen = ["127.0.0.1:8080", "[::1]:8080"]
//! workers = 64
//! queue_depth = 1024
//! stats_interval_secs = 60
//!
//! [cache]
//! capacity = 50
//!
//! [upstream]
//! base_url = "https://api.github.com"
//! per_page = 10
//! timeout_secs = 30
//! ```
//!
//! Every section and key is optional.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variables consulted for the upstream token, in order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["REPOSCOUT_GITHUB_TOKEN", "GITHUB_TOKEN"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
}

/// Listener and pipeline sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket addresses to listen on. At least one is required.
    pub listen: Vec<String>,

    /// Maximum number of requests resolved concurrently.
    ///
    /// Each in-flight request holds one permit from validation until its
    /// response is written, including the time spent waiting on upstream.
    pub workers: usize,

    /// Capacity of the queue between the listener and the pipeline.
    ///
    /// When the queue is full the listener waits, which applies backpressure
    /// to new connections instead of buffering without bound.
    pub queue_depth: usize,

    /// Seconds between diagnostics log lines. `0` disables them.
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: vec!["127.0.0.1:8080".to_string()],
            workers: 64,
            queue_depth: 1024,
            stats_interval_secs: 60,
        }
    }
}

/// Result cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of topics kept. Must be at least 1.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

/// Upstream search service settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API root, e.g. `https://api.github.com` or a GitHub Enterprise
    /// `https://ghe.example.com/api/v3`.
    pub base_url: String,

    /// Personal access token. Unauthenticated calls get a much lower rate limit.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Results requested per search (GitHub allows 1..=100). Only the first
    /// page is ever fetched.
    pub per_page: u8,

    /// Whole-request timeout for one upstream call, in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: None,
            per_page: 10,
            timeout_secs: 30,
        }
    }
}

// Keep the token out of logs and panic messages.
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("per_page", &self.per_page)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit `path` must exist. Without one, the platform config
    /// directory is consulted and defaults are used if no file is there.
    /// Environment overrides are applied afterwards; validation is left to
    /// the caller so command-line overrides can be applied first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// `config.toml` in the platform config directory, if one can be determined:
    /// - Linux: `~/.config/reposcout/config.toml`
    /// - macOS: `~/Library/Application Support/dev.reposcout.reposcout/config.toml`
    /// - Windows: `%APPDATA%\reposcout\reposcout\config\config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "reposcout", "reposcout")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Fill the upstream token from the environment when it is not set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.upstream.token.is_some() {
            return;
        }
        self.upstream.token = TOKEN_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()));
    }

    /// Check every setting the service depends on at startup.
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(Error::InvalidCapacity(self.cache.capacity));
        }
        if !(1..=100).contains(&self.upstream.per_page) {
            return Err(Error::Config(format!(
                "upstream.per_page must be between 1 and 100, got {}",
                self.upstream.per_page
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(Error::Config(
                "upstream.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.server.workers == 0 {
            return Err(Error::Config("server.workers must be at least 1".to_string()));
        }
        if self.server.queue_depth == 0 {
            return Err(Error::Config(
                "server.queue_depth must be at least 1".to_string(),
            ));
        }
        self.listen_addrs().map(|_| ())
    }

    /// Parsed listen addresses.
    pub fn listen_addrs(&self) -> Result<Vec<SocketAddr>> {
        if self.server.listen.is_empty() {
            return Err(Error::Config(
                "server.listen must name at least one address".to_string(),
            ));
        }
        self.server
            .listen
            .iter()
            .map(|addr| {
                addr.parse().map_err(|e| {
                    Error::Config(format!("Invalid listen address '{addr}': {e}"))
                })
            })
            .collect()
    }
}
