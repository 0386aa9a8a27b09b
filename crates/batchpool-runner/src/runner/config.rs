use anyhow::bail;
use batchpool::PoolConfig;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `batchpool-runner` binary.
///
/// These settings control the size of the worker pool, the depth of its
/// queues, and how submissions react to backpressure. All values are parsed
/// from CLI arguments or environment variables (a `.env` file is honored),
/// with defaults matching a small batch deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "batchpool-runner",
    version,
    about = "Runs newline-delimited registration records through a bounded worker pool"
)]
pub struct CliArgs {
    /// Number of workers executing registrations concurrently.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 5)]
    pub num_workers: usize,

    /// Capacity of the intake queue between the input reader and the workers.
    ///
    /// When the queue is full the reader waits (or rejects, see
    /// `--submit-timeout-ms`), bounding how many records are held in memory.
    ///
    /// Environment variable: `INTAKE_CAPACITY`
    #[arg(long, env = "INTAKE_CAPACITY", default_value_t = 100)]
    pub intake_capacity: usize,

    /// Capacity of the output queue between the workers and the writer.
    ///
    /// Environment variable: `OUTPUT_CAPACITY`
    #[arg(long, env = "OUTPUT_CAPACITY", default_value_t = 100)]
    pub output_capacity: usize,

    /// Seconds to wait for workers to exit on shutdown before aborting them.
    /// `0` waits indefinitely.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// How long a record may wait for room in the intake queue before it is
    /// rejected. `0` rejects immediately when the queue is full. When unset,
    /// the reader waits as long as it takes.
    ///
    /// Rejected records are reported and counted, never retried.
    ///
    /// Environment variable: `SUBMIT_TIMEOUT_MS`
    #[arg(long, env = "SUBMIT_TIMEOUT_MS")]
    pub submit_timeout_ms: Option<u64>,

    /// Newline-delimited JSON file of `{"name", "email"}` records. Reads stdin
    /// when omitted.
    ///
    /// Environment variable: `INPUT`
    #[arg(short, long, env = "INPUT")]
    pub input: Option<PathBuf>,
}

/// How the reader hands records to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Wait for room in the intake queue.
    Blocking,
    /// Reject at once if the intake queue is full.
    NonBlocking,
    /// Wait at most this long for room.
    Timed(Duration),
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub pool: PoolConfig,
    pub submit_mode: SubmitMode,
    pub input: Option<PathBuf>,
}

impl TryFrom<CliArgs> for RunnerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let mut pool = PoolConfig::new(
            args.num_workers,
            args.intake_capacity,
            args.output_capacity,
        );
        if args.shutdown_timeout_secs > 0 {
            pool = pool.with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout_secs));
        }

        if let Err(e) = pool.validate() {
            bail!("{e}");
        }

        let submit_mode = match args.submit_timeout_ms {
            None => SubmitMode::Blocking,
            Some(0) => SubmitMode::NonBlocking,
            Some(ms) => SubmitMode::Timed(Duration::from_millis(ms)),
        };

        if let Some(path) = &args.input {
            if path.as_os_str().is_empty() {
                bail!("INPUT must not be an empty path");
            }
        }

        Ok(Self {
            pool,
            submit_mode,
            input: args.input,
        })
    }
}
