//! Command-line interface for the `reposcout` binary.
//!
//! Flags are the last configuration layer and override both the config file
//! and the environment:
//!
//! ```bash
//! # Defaults, or ~/.config/reposcout/config.toml if present
//! reposcout
//!
//! # Two listeners, smaller cache, JSON logs
//! reposcout --listen 127.0.0.1:8080 --listen [::1]:8080 --cache-capacity 10 --log-format json
//!
//! # Explicit config file
//! reposcout --config ./reposcout.toml -v
//! ```

use clap::{Parser, ValueEnum};
use reposcout_core::Config;
use std::path::PathBuf;

/// Log line format.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Top-level arguments for `reposcout`
#[derive(Parser, Clone, Debug)]
#[command(name = "reposcout")]
#[command(version)]
#[command(about = "Serve GitHub repositories by topic, with an LRU cache in front", long_about = None)]
pub struct Cli {
    /// Path to a TOML config file (defaults to the platform config directory)
    #[arg(short = 'c', long, env = "REPOSCOUT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on; repeat to listen on several
    #[arg(short = 'l', long = "listen", value_name = "ADDR")]
    pub listen: Vec<String>,

    /// Number of topics kept in the cache
    #[arg(long, value_name = "N")]
    pub cache_capacity: Option<usize>,

    /// Repositories requested per upstream search (1-100)
    #[arg(long, value_name = "N")]
    pub per_page: Option<u8>,

    /// Maximum number of requests resolved concurrently
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Capacity of the intake queue
    #[arg(long, value_name = "N")]
    pub queue_depth: Option<usize>,

    /// GitHub token (prefer `REPOSCOUT_GITHUB_TOKEN` or `GITHUB_TOKEN`)
    #[arg(long, value_name = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Load the configuration file and environment, then apply flags on top.
    pub fn resolve_config(&self) -> reposcout_core::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Overwrite every setting that was given on the command line.
    pub fn apply_overrides(&self, config: &mut Config) {
        if !self.listen.is_empty() {
            config.server.listen.clone_from(&self.listen);
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache.capacity = capacity;
        }
        if let Some(per_page) = self.per_page {
            config.upstream.per_page = per_page;
        }
        if let Some(workers) = self.workers {
            config.server.workers = workers;
        }
        if let Some(depth) = self.queue_depth {
            config.server.queue_depth = depth;
        }
        if let Some(token) = &self.token {
            config.upstream.token = Some(token.clone());
        }
    }
}
