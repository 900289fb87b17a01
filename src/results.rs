use crate::queue::QueueConsumer;
use crate::task::TaskResult;

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};

/// The stream of results produced by a [`WorkerPool`](crate::WorkerPool).
///
/// Yields results in the order workers publish them, which is not the
/// submission order once more than one worker is running. The stream ends
/// after the pool has been closed and every result has been received.
pub struct ResultStream<U: Send + 'static> {
  inner: BoxStream<'static, TaskResult<U>>,
  received: usize,
}

impl<U: Send + 'static> ResultStream<U> {
  pub(crate) fn new(consumer: QueueConsumer<TaskResult<U>>) -> Self {
    let inner = stream::unfold(consumer, |consumer| async move {
      consumer.recv().await.map(|result| (result, consumer))
    })
    .boxed();
    Self { inner, received: 0 }
  }

  /// Waits for the next result. Returns `None` once the pool is closed and
  /// drained.
  pub async fn next_result(&mut self) -> Option<TaskResult<U>> {
    self.next().await
  }

  /// Collects every remaining result. Only completes once the pool is closed.
  pub async fn collect_all(self) -> Vec<TaskResult<U>> {
    self.collect().await
  }

  /// Number of results received through this stream so far.
  pub fn received(&self) -> usize {
    self.received
  }
}

impl<U: Send + 'static> Stream for ResultStream<U> {
  type Item = TaskResult<U>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let polled = self.inner.poll_next_unpin(cx);
    if let Poll::Ready(Some(_)) = &polled {
      self.received += 1;
    }
    polled
  }
}

impl<U: Send + 'static> fmt::Debug for ResultStream<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultStream")
      .field("received", &self.received)
      .finish_non_exhaustive()
  }
}
