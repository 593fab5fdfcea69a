//! Error types and handling for reposcout-core operations.
//!
//! Errors fall into three groups:
//!
//! - **Upstream errors**: the repository-search service failed (network, HTTP
//!   status, rate limiting, timeouts, undecodable payloads). These resolve a
//!   single request with an error response and never take down the pipeline.
//! - **Internal errors**: misuse at construction time, such as a cache with no
//!   capacity or an invalid configuration. These are fatal at startup.
//! - **Validation errors** are not represented here. They are handled entirely
//!   by [`crate::validator`] and never propagate.
//!
//! ```rust
//! use reposcout_core::Error;
//!
//! let err = Error::RateLimited { reset_at: Some(1_700_000_000) };
//! assert!(err.is_recoverable());
//! assert_eq!(err.category(), "rate_limited");
//! ```

use thiserror::Error;

/// The main error type for reposcout-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure talking to the upstream search service.
    ///
    /// Connection and timeout failures are recoverable; TLS and malformed
    /// request failures are not.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The upstream service answered with a non-success status.
    #[error("Upstream returned {status}: {message}")]
    Upstream {
        /// HTTP status code returned by the service.
        status: u16,
        /// Message extracted from the response body, if any.
        message: String,
    },

    /// The upstream service refused the call because the rate limit is spent.
    #[error("Upstream rate limit exhausted (resets at {})", describe_reset(.reset_at.as_ref()))]
    RateLimited {
        /// Unix timestamp at which the limit resets, when reported.
        reset_at: Option<u64>,
    },

    /// Operation exceeded its configured timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cache was constructed without room for a single entry.
    #[error("Invalid cache capacity {0}: capacity must be at least 1")]
    InvalidCapacity(usize),
}

fn describe_reset(reset_at: Option<&u64>) -> String {
    reset_at.map_or_else(|| "unknown".to_string(), ToString::to_string)
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might clear up if the same request is retried later.
    ///
    /// Timeouts, connection failures, rate limiting and 5xx answers from the
    /// upstream service are considered transient. Everything else is not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Upstream { status, .. } => *status >= 500,
            Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::Serialization(_) | Self::Config(_) | Self::InvalidCapacity(_) => false,
        }
    }

    /// Get the error category as a string identifier for log fields.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Upstream { .. } => "upstream",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::InvalidCapacity(_) => "invalid_capacity",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
