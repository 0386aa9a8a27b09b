use core::{fmt, future::Future};
use futures::future::BoxFuture;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A unit of work that can be submitted to a [`WorkerPool`](crate::WorkerPool).
///
/// Ownership moves into the pool on submission and into the claiming worker
/// for the duration of [`execute`](WorkItem::execute). Items carry no worker
/// affinity: any idle worker may claim any item.
///
/// Returning `Err` (or panicking) does not harm the worker that ran the item.
/// The failure is captured into the item's [`Outcome`](crate::Outcome) and the
/// worker moves on to the next claim.
pub trait WorkItem: Send + 'static {
    /// Success payload delivered to the result consumer.
    type Output: Send + 'static;

    /// Failure description. Only its `Display` form reaches the consumer.
    type Error: fmt::Display + Send;

    /// Runs the item to completion.
    ///
    /// Implementations must not block indefinitely: a timeout policy, if any,
    /// belongs to the item. Long-running items may watch
    /// [`WorkContext::cancelled`] to finish early when the pool is stopped.
    fn execute(
        self,
        ctx: WorkContext,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Per-execution context handed to [`WorkItem::execute`].
#[derive(Debug, Clone)]
pub struct WorkContext {
    worker_id: usize,
    shutdown: CancellationToken,
}

impl WorkContext {
    pub(crate) const fn new(worker_id: usize, shutdown: CancellationToken) -> Self {
        Self {
            worker_id,
            shutdown,
        }
    }

    /// Index (`0..num_workers`) of the worker executing the item.
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Returns `true` once the pool has been asked to stop.
    ///
    /// The pool never interrupts an item. This is a hint for items that can
    /// cut their work short.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the pool has been asked to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }
}

/// A type-erased work item built from an async closure.
///
/// `Job` lets a single pool run heterogeneous work as long as every job
/// agrees on the success and error types.
///
/// ```
/// use batchpool::{Job, WorkContext};
///
/// let job: Job<u64, String> = Job::new(|ctx: WorkContext| async move {
///     Ok(ctx.worker_id() as u64)
/// });
/// # drop(job);
/// ```
pub struct Job<T, E> {
    run: Box<dyn FnOnce(WorkContext) -> BoxFuture<'static, Result<T, E>> + Send>,
}

impl<T, E> Job<T, E> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(WorkContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            run: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

impl<T, E> fmt::Debug for Job<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").finish_non_exhaustive()
    }
}

impl<T, E> WorkItem for Job<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    type Output = T;
    type Error = E;

    fn execute(self, ctx: WorkContext) -> impl Future<Output = Result<T, E>> + Send {
        (self.run)(ctx)
    }
}
