//! Asynchronous worker pool with bounded intake and output queues.
//!
//! This module defines the [`WorkerPool`] struct, which owns a bounded intake
//! queue, a fixed number of worker tasks, and a bounded output queue. Workers
//! claim items straight from the shared intake queue, so whichever worker is
//! idle first takes the next item in submission order.
//!
//! Backpressure applies on both sides: `submit` suspends while the intake
//! queue is full, and a worker suspends while the output queue is full.
//! Shutdown is coordinated through a shared [`CancellationToken`].

use super::{
    results::Results,
    state::{AtomicPoolState, PoolState},
    worker::{SharedIntake, worker_loop},
};
use crate::{
    config::PoolConfig,
    error::{Error, Rejected, Result},
    item::WorkItem,
    outcome::Outcome,
};
use core::time::Duration;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::mpsc::{
        self,
        error::{SendTimeoutError, TrySendError},
    },
    task::JoinSet,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// A fixed-size pool of asynchronous workers that execute [`WorkItem`]s.
///
/// Lifecycle:
///
/// 1. [`WorkerPool::new`] validates the sizing and allocates both queues.
/// 2. [`start`](WorkerPool::start) spawns exactly `num_workers` Tokio tasks.
/// 3. [`submit`](WorkerPool::submit) (and its non-blocking/timed variants)
///    enqueue work while [`results`](WorkerPool::results) is drained
///    concurrently.
/// 4. [`stop`](WorkerPool::stop) abandons queued work, or
///    [`drain`](WorkerPool::drain) finishes it, and both join the workers.
///
/// The pool is `Sync`; share it behind an [`Arc`] to submit from several
/// producers. Dropping a pool aborts any workers that are still running.
pub struct WorkerPool<W: WorkItem> {
    config: PoolConfig,
    state: AtomicPoolState,
    /// `None` once the intake is closed. Dropping the last sender is what
    /// lets draining workers observe the end of the queue.
    intake_tx: RwLock<Option<mpsc::Sender<W>>>,
    intake_rx: SharedIntake<W>,
    /// Handed to the workers by `start`; the pool keeps no sender afterwards
    /// so the output queue closes once the last worker exits.
    output_tx: Mutex<Option<mpsc::Sender<Outcome<W::Output>>>>,
    output_rx: Mutex<Option<mpsc::Receiver<Outcome<W::Output>>>>,
    /// Held for the whole join so concurrent `stop`/`drain` calls wait for the
    /// same workers instead of returning early.
    workers: tokio::sync::Mutex<JoinSet<()>>,
    shutdown_token: CancellationToken,
}

impl<W: WorkItem> WorkerPool<W> {
    /// Creates a pool with `num_workers` workers and the given queue
    /// capacities. No worker runs until [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `num_workers` is zero or either
    /// capacity is zero or too large.
    pub fn new(num_workers: usize, intake_capacity: usize, output_capacity: usize) -> Result<Self> {
        Self::with_config(PoolConfig::new(
            num_workers,
            intake_capacity,
            output_capacity,
        ))
    }

    /// Creates a pool from a full [`PoolConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not
    /// validate.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);
        let (output_tx, output_rx) = mpsc::channel(config.output_capacity);

        Ok(Self {
            config,
            state: AtomicPoolState::new(PoolState::Created),
            intake_tx: RwLock::new(Some(intake_tx)),
            intake_rx: Arc::new(tokio::sync::Mutex::new(intake_rx)),
            output_tx: Mutex::new(Some(output_tx)),
            output_rx: Mutex::new(Some(output_rx)),
            workers: tokio::sync::Mutex::new(JoinSet::new()),
            shutdown_token: CancellationToken::new(),
        })
    }

    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub const fn worker_count(&self) -> usize {
        self.config.num_workers
    }

    pub const fn intake_capacity(&self) -> usize {
        self.config.intake_capacity
    }

    pub const fn output_capacity(&self) -> usize {
        self.config.output_capacity
    }

    pub fn state(&self) -> PoolState {
        self.state.load()
    }

    /// Number of submitted items still waiting to be claimed.
    pub fn queued(&self) -> usize {
        self.intake_tx
            .read()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Spawns the workers onto the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if:
    /// - The pool was already started, drained, or stopped.
    /// - The call is not made from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| Error::IllegalState {
            context: "start() must be called from within a Tokio runtime".to_string(),
        })?;

        // Only a joiner can hold this lock, and joiners only exist once the
        // pool has left `Created`.
        let mut workers = self.workers.try_lock().map_err(|_| Error::IllegalState {
            context: "start() called while the pool is shutting down".to_string(),
        })?;

        if let Err(state) = self.state.transition(PoolState::Created, PoolState::Running) {
            return Err(Error::IllegalState {
                context: format!("start() called on a pool that is {state:?}"),
            });
        }

        let output_tx = self.output_tx.lock().take().ok_or_else(|| Error::IllegalState {
            context: "output queue is already closed".to_string(),
        })?;

        for worker_id in 0..self.config.num_workers {
            workers.spawn_on(
                worker_loop(
                    worker_id,
                    Arc::clone(&self.intake_rx),
                    output_tx.clone(),
                    self.shutdown_token.clone(),
                ),
                &handle,
            );
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Worker pool started with {} workers (intake capacity {}, output capacity {})",
            self.config.num_workers,
            self.config.intake_capacity,
            self.config.output_capacity
        );

        Ok(())
    }

    /// Enqueues `item`, waiting for room if the intake queue is full.
    ///
    /// # Errors
    ///
    /// The item is handed back inside [`Rejected`] with:
    /// - [`Error::IllegalState`] if the pool has not been started.
    /// - [`Error::Closed`] if the pool was stopped or drained, including while
    ///   this call was waiting for room.
    pub async fn submit(&self, item: W) -> core::result::Result<(), Rejected<W>> {
        let sender = match self.intake_sender() {
            Ok(sender) => sender,
            Err(e) => return Err(Rejected::new(item, e)),
        };

        sender
            .send(item)
            .await
            .map_err(|mpsc::error::SendError(item)| Rejected::new(item, Error::Closed))
    }

    /// Enqueues `item` only if the intake queue has room right now.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit), plus [`Error::QueueFull`] when the
    /// queue is at capacity.
    pub fn try_submit(&self, item: W) -> core::result::Result<(), Rejected<W>> {
        let sender = match self.intake_sender() {
            Ok(sender) => sender,
            Err(e) => return Err(Rejected::new(item, e)),
        };

        sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => Rejected::new(item, Error::QueueFull),
            TrySendError::Closed(item) => Rejected::new(item, Error::Closed),
        })
    }

    /// Enqueues `item`, waiting at most `wait` for room.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit), plus [`Error::QueueFull`] when no
    /// room frees up before `wait` elapses.
    pub async fn submit_timeout(
        &self,
        item: W,
        wait: Duration,
    ) -> core::result::Result<(), Rejected<W>> {
        let sender = match self.intake_sender() {
            Ok(sender) => sender,
            Err(e) => return Err(Rejected::new(item, e)),
        };

        sender.send_timeout(item, wait).await.map_err(|e| match e {
            SendTimeoutError::Timeout(item) => Rejected::new(item, Error::QueueFull),
            SendTimeoutError::Closed(item) => Rejected::new(item, Error::Closed),
        })
    }

    fn intake_sender(&self) -> Result<mpsc::Sender<W>> {
        match self.state.load() {
            PoolState::Created => Err(Error::IllegalState {
                context: "submit() called before start()".to_string(),
            }),
            PoolState::Running => self.intake_tx.read().clone().ok_or(Error::Closed),
            PoolState::Draining | PoolState::Stopped => Err(Error::Closed),
        }
    }

    /// Takes the consuming end of the output queue.
    ///
    /// There is a single consumer per pool. It may be taken at any point in
    /// the lifecycle, including after `stop` to collect what was published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalState`] if the results were already taken.
    pub fn results(&self) -> Result<Results<W::Output>> {
        self.output_rx
            .lock()
            .take()
            .map(Results::new)
            .ok_or_else(|| Error::IllegalState {
                context: "results() was already taken".to_string(),
            })
    }

    /// Stops the pool.
    ///
    /// - Closes the intake so every later `submit` fails with
    ///   [`Error::Closed`].
    /// - Cancels the shared [`CancellationToken`]: idle workers exit at once,
    ///   busy workers finish and publish their current item, then exit.
    /// - Waits for every worker to exit (bounded by the configured shutdown
    ///   timeout, if any).
    /// - Discards items that were queued but never claimed.
    ///
    /// Calling `stop` on a stopped pool does no further work. A call that
    /// overlaps a `stop` already in progress still waits until every worker
    /// has exited. Stopping a pool that was never started just closes its
    /// queues.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if workers were still running when
    /// the shutdown timeout elapsed; they are aborted before this returns.
    pub async fn stop(&self) -> Result<()> {
        match self.state.swap(PoolState::Stopped) {
            // Another caller is (or was) stopping the pool; wait for the
            // same workers to exit.
            PoolState::Stopped => return self.join_workers().await,
            PoolState::Created => {
                self.close_queues().await;
                return Ok(());
            }
            PoolState::Running | PoolState::Draining => {}
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Stopping worker pool");

        self.intake_tx.write().take();
        self.shutdown_token.cancel();

        let joined = self.join_workers().await;
        self.close_queues().await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool stopped");

        joined
    }

    /// Closes the intake and lets the workers finish every queued item
    /// before they exit.
    ///
    /// Later submissions fail with [`Error::Closed`]. Once this returns the
    /// pool is [`PoolState::Stopped`] and the results stream ends after its
    /// buffered outcomes. Calling `drain` on a stopped pool only waits for its
    /// workers to exit.
    ///
    /// The output queue must keep being consumed while draining, otherwise
    /// workers block on publishing and the drain only ends through the
    /// shutdown timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::IllegalState`] if the pool was never started.
    /// - [`Error::ShutdownTimeout`] as for [`stop`](Self::stop).
    pub async fn drain(&self) -> Result<()> {
        match self.state.transition(PoolState::Running, PoolState::Draining) {
            Ok(()) | Err(PoolState::Running | PoolState::Draining) => {}
            Err(PoolState::Created) => {
                return Err(Error::IllegalState {
                    context: "drain() called before start()".to_string(),
                });
            }
            Err(PoolState::Stopped) => return self.join_workers().await,
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Draining worker pool ({} item(s) queued)", self.queued());

        // Once the last sender is gone, `recv` yields the remaining items and
        // then `None`, which ends each worker loop.
        self.intake_tx.write().take();

        let joined = self.join_workers().await;
        self.state.swap(PoolState::Stopped);
        self.close_queues().await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool drained");

        joined
    }

    async fn join_workers(&self) -> Result<()> {
        let mut workers = self.workers.lock().await;

        let Some(limit) = self.config.shutdown_timeout else {
            reap(&mut workers).await;
            return Ok(());
        };

        if timeout(limit, reap(&mut workers)).await.is_ok() {
            return Ok(());
        }

        let remaining = workers.len();

        #[cfg(feature = "tracing")]
        tracing::warn!("Shutdown timed out after {limit:?}, aborting {remaining} worker(s)");

        workers.abort_all();
        reap(&mut workers).await;

        Err(Error::ShutdownTimeout { remaining })
    }

    async fn close_queues(&self) {
        self.intake_tx.write().take();
        self.output_tx.lock().take();

        let mut intake = self.intake_rx.lock().await;
        intake.close();

        let mut discarded = 0_usize;
        while intake.try_recv().is_ok() {
            discarded += 1;
        }

        if discarded > 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!("Discarded {discarded} queued item(s) that were never claimed");
        }
    }
}

async fn reap(workers: &mut JoinSet<()>) {
    while let Some(res) = workers.join_next().await {
        if let Err(_e) = res {
            #[cfg(feature = "tracing")]
            {
                if !_e.is_cancelled() {
                    tracing::error!("Worker task failed: {_e}");
                }
            }
        }
    }
}
