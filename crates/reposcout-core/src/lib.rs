//! # reposcout-core
//!
//! Core of reposcout: a small HTTP front end that answers `GET /?topic=<t>`
//! with the repositories tagged with that topic, as JSON, backed by a bounded
//! LRU cache in front of the GitHub search API.
//!
//! This crate holds everything except the socket listener, so the whole request
//! path can be driven in-process.
//!
//! ## Architecture
//!
//! - **Request handles**: one write-once handle per HTTP exchange
//! - **Validation**: method, query and `topic` checks with fixed 4xx bodies
//! - **Dispatch**: cache lookup, upstream search on a miss, cache write
//! - **Cache**: recency-ordered, fixed-capacity, shared across tasks
//! - **Pipeline**: bounded intake queue, worker limit and shutdown drain
//! - **Error Handling**: categorised errors mapped to gateway responses
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reposcout_core::{
//!     Config, Dispatcher, GithubClient, Pipeline, RequestHandle, Termination, TopicCache,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> reposcout_core::Result<()> {
//! let config = Config::load(None)?;
//! config.validate()?;
//!
//! let cache = Arc::new(TopicCache::new(config.cache.capacity)?);
//! let search = Arc::new(GithubClient::new(&config.upstream)?);
//! let dispatcher = Arc::new(Dispatcher::new(cache, search));
//! let termination = Termination::new();
//! let pipeline = Pipeline::spawn(dispatcher, termination.clone(), 8, 64);
//!
//! let (handle, pending) = RequestHandle::new(http::Method::GET, "/?topic=rust");
//! if pipeline.intake().submit(handle).await.is_ok() {
//!     if let Some(reply) = pending.wait().await {
//!         println!("{} ({} bytes)", reply.status, reply.content_length());
//!     }
//! }
//!
//! termination.raise();
//! pipeline.finished().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Upstream failures never escape as errors: the dispatcher turns them into a
//! 502, or a 503 when the rate limit is exhausted. [`Error`] is what the fallible
//! setup calls return.
//!
//! ```rust
//! use reposcout_core::{Config, Error};
//!
//! let mut config = Config::default();
//! config.cache.capacity = 0;
//! match config.validate() {
//!     Err(Error::InvalidCapacity(0)) => {},
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

/// Recency-ordered bounded cache
pub mod cache;
/// Layered configuration: defaults, TOML file, environment
pub mod config;
/// Error types and result aliases
pub mod error;
/// Intake queue, dispatcher and worker loop
pub mod pipeline;
/// Write-once handle on one HTTP exchange
pub mod request;
/// Response writers for every outcome
pub mod responder;
/// Shutdown broadcast
pub mod termination;
/// Repository data as served to clients and as received from upstream
pub mod types;
/// Upstream search trait and GitHub client
pub mod upstream;
/// Request validation and topic extraction
pub mod validator;

// Re-export commonly used types
pub use cache::{CacheStatsSummary, LruCache, SharedLruCache, TopicCache};
pub use config::{CacheConfig, Config, ServerConfig, UpstreamConfig};
pub use error::{Error, Result};
pub use pipeline::{Dispatcher, Intake, Outcome, Pipeline, ResultEnvelope, RunSummary};
pub use request::{Delivery, PendingReply, Reply, RequestHandle};
pub use termination::Termination;
pub use types::*;
pub use upstream::{GithubClient, RepoSearch};
pub use validator::{BadRequestReason, Rejected, Rejection, WorkItem, validate};
