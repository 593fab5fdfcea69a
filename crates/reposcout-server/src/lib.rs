//! # reposcout-server
//!
//! Socket listener, command line and process wiring for reposcout. The request
//! path itself lives in `reposcout-core`.

/// Service startup, listeners and shutdown
pub mod app;
/// Command-line arguments and config overrides
pub mod cli;
/// Axum front door feeding the pipeline
pub mod listener;
/// Tracing subscriber setup
pub mod logging;

pub use app::{App, run};
pub use cli::{Cli, LogFormat};
