//! The registration batch runner.
//!
//! - [`config`] - CLI and environment configuration.
//! - [`registration`] - The [`Registration`](registration::Registration)
//!   work item and its stand-in user store.
//! - [`dispatch`] - Feeds input records into the pool and writes outcomes.
//! - [`telemetry`] - Logging, tracing, and metrics setup.

pub mod config;
pub mod dispatch;
pub mod registration;
pub mod telemetry;
