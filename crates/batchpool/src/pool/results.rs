use crate::outcome::Outcome;
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Consuming view over a pool's output queue.
///
/// Outcomes are yielded in the order workers published them, which in general
/// differs from submission order. The stream stays open while the pool runs
/// and ends once the pool is stopped (or drained) and every buffered outcome
/// has been consumed.
#[derive(Debug)]
pub struct Results<T> {
    inner: ReceiverStream<Outcome<T>>,
}

impl<T> Results<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Outcome<T>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Waits for the next outcome. Returns `None` once the pool has stopped
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<Outcome<T>> {
        self.inner.as_mut().recv().await
    }

    /// Takes an outcome if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<Outcome<T>> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl<T> Stream for Results<T> {
    type Item = Outcome<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
