//! The worker pool and its moving parts.
//!
//! - [`manager`] - [`WorkerPool`]: lifecycle, submission, shutdown.
//! - [`worker`] - The per-worker claim/execute/publish loop.
//! - [`results`] - [`Results`]: the consuming end of the output queue.
//! - [`state`] - [`PoolState`]: the lifecycle state machine.

pub mod manager;
pub mod results;
pub mod state;
mod worker;

pub use manager::WorkerPool;
pub use results::Results;
pub use state::PoolState;
