use crate::error::{Error, Result};
use core::time::Duration;
use tokio::sync::Semaphore;

/// Sizing and shutdown behavior of a [`WorkerPool`](crate::WorkerPool).
///
/// All values are fixed once the pool is constructed: the number of workers
/// and the capacity of both queues never change for the lifetime of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks spawned by `start`.
    pub num_workers: usize,
    /// Maximum number of submitted items waiting to be claimed.
    pub intake_capacity: usize,
    /// Maximum number of outcomes waiting to be consumed.
    pub output_capacity: usize,
    /// Upper bound on how long `stop`/`drain` wait for workers to exit before
    /// aborting them. `None` waits indefinitely.
    pub shutdown_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Creates a configuration without a shutdown timeout.
    pub const fn new(num_workers: usize, intake_capacity: usize, output_capacity: usize) -> Self {
        Self {
            num_workers,
            intake_capacity,
            output_capacity,
            shutdown_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Checks that the configuration can back a pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if:
    /// - `num_workers` is zero.
    /// - Either capacity is zero or exceeds [`Semaphore::MAX_PERMITS`]. A
    ///   zero-capacity queue could never hold an item and would deadlock the
    ///   first submission.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "num_workers must be greater than 0".to_string(),
            });
        }

        validate_capacity("intake_capacity", self.intake_capacity)?;
        validate_capacity("output_capacity", self.output_capacity)?;

        Ok(())
    }
}

fn validate_capacity(name: &str, capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(Error::InvalidConfig {
            reason: format!("{name} must be greater than 0"),
        });
    }

    if capacity > Semaphore::MAX_PERMITS {
        return Err(Error::InvalidConfig {
            reason: format!(
                "{name} ({capacity}) exceeds the maximum queue capacity ({})",
                Semaphore::MAX_PERMITS
            ),
        });
    }

    Ok(())
}
