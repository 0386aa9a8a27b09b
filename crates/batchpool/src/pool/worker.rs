use crate::{
    item::{WorkContext, WorkItem},
    outcome::{JobFailure, Outcome},
};
use core::any::Any;
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Intake receiver shared by every worker of a pool.
///
/// Holding the lock is what makes a worker the next claimant: the tokio mutex
/// is fair, so idle workers queue up on it in FIFO order and exactly one of
/// them is waiting on `recv` at any time.
pub(crate) type SharedIntake<W> = Arc<Mutex<mpsc::Receiver<W>>>;

/// Worker task: claims items from the shared intake queue, executes them, and
/// publishes each [`Outcome`] to the output queue.
///
/// This function is spawned once per worker and loops until either:
/// - the shutdown token is cancelled (`stop`), or
/// - the intake channel is closed and empty (`drain`).
///
/// A cancelled token never interrupts an item already claimed: the item runs
/// to completion and its outcome is published before the worker re-checks
/// the token.
///
/// # Arguments
///
/// - `worker_id`: Index of this worker (used for logs and [`WorkContext`]).
/// - `intake`: Shared receiving half of the intake queue.
/// - `output`: Sending half of the output queue.
/// - `shutdown_token`: Cancelled by the pool when it is stopped.
pub(crate) async fn worker_loop<W: WorkItem>(
    worker_id: usize,
    intake: SharedIntake<W>,
    output: mpsc::Sender<Outcome<W::Output>>,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(item) = claim(&intake, &shutdown_token).await {
        let outcome = run_item(worker_id, item, &shutdown_token).await;

        #[cfg(feature = "tracing")]
        {
            if let Err(failure) = &outcome.result {
                tracing::debug!("Worker {worker_id} captured a failed item: {failure}");
            }
        }

        // Suspends while the output queue is full.
        if let Err(_e) = output.send(outcome).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {worker_id} could not publish outcome: results receiver dropped");
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

/// Takes the next item off the intake queue.
///
/// Returns `None` once shutdown was signalled or the intake channel is closed
/// and empty. Both the lock and `recv` are cancel-safe, so losing the race
/// against the shutdown token never consumes an item.
async fn claim<W>(
    intake: &Mutex<mpsc::Receiver<W>>,
    shutdown_token: &CancellationToken,
) -> Option<W> {
    if shutdown_token.is_cancelled() {
        return None;
    }

    let mut rx = tokio::select! {
        biased;
        () = shutdown_token.cancelled() => return None,
        rx = intake.lock() => rx,
    };

    tokio::select! {
        biased;
        () = shutdown_token.cancelled() => None,
        item = rx.recv() => item,
    }
}

/// Executes a single item, converting errors and panics into a failed
/// [`Outcome`].
async fn run_item<W: WorkItem>(
    worker_id: usize,
    item: W,
    shutdown_token: &CancellationToken,
) -> Outcome<W::Output> {
    let ctx = WorkContext::new(worker_id, shutdown_token.clone());
    let start = Instant::now();

    // `execute` itself is called inside the guarded future so that a panic
    // raised before the item's future is built is caught as well.
    let result = match AssertUnwindSafe(async move { item.execute(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(JobFailure::Failed {
            message: e.to_string(),
        }),
        Err(payload) => Err(JobFailure::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };

    Outcome {
        worker_id,
        elapsed: start.elapsed(),
        result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Job;

    type TestJob = Job<u32, String>;

    fn explode() -> Result<u32, String> {
        panic!("boom")
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }

    #[tokio::test]
    async fn run_item_captures_success_error_and_panic() {
        let token = CancellationToken::new();

        let ok = run_item(3, TestJob::new(|_| async { Ok(1) }), &token).await;
        assert_eq!(ok.worker_id, 3);
        assert_eq!(ok.result, Ok(1));

        let failed = run_item(
            0,
            TestJob::new(|_| async { Err("email cannot be empty".to_string()) }),
            &token,
        )
        .await;
        assert_eq!(
            failed.result,
            Err(JobFailure::Failed {
                message: "email cannot be empty".to_string()
            })
        );

        let panicked = run_item(0, TestJob::new(|_| async { explode() }), &token).await;
        assert_eq!(
            panicked.result,
            Err(JobFailure::Panicked {
                message: "boom".to_string()
            })
        );
    }

    #[tokio::test]
    async fn claim_returns_none_after_cancellation() {
        let (tx, rx) = mpsc::channel::<u32>(4);
        let intake = Mutex::new(rx);
        let token = CancellationToken::new();

        tx.send(7).await.unwrap();
        assert_eq!(claim(&intake, &token).await, Some(7));

        tx.send(8).await.unwrap();
        token.cancel();
        assert_eq!(claim(&intake, &token).await, None);

        // The unclaimed item is still queued.
        assert_eq!(intake.lock().await.try_recv().ok(), Some(8));
    }

    #[tokio::test]
    async fn worker_loop_exits_when_intake_closes() {
        let (tx, rx) = mpsc::channel::<TestJob>(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        tx.send(TestJob::new(|ctx| async move { Ok(ctx.worker_id() as u32) }))
            .await
            .unwrap();
        drop(tx);

        worker_loop(5, Arc::new(Mutex::new(rx)), out_tx, token).await;

        let outcome = out_rx.recv().await.unwrap();
        assert_eq!(outcome.result, Ok(5));
        assert!(out_rx.recv().await.is_none());
    }
}
