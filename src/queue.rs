use crate::error::PoolError;

use std::fmt;

use async_channel::{Receiver, Sender};

/// A bounded, multi-producer, multi-consumer FIFO queue.
///
/// Used both as the pool's job queue and as its result sink. Sending waits
/// while the queue is at capacity, which is how backpressure reaches the
/// submitter. Closing is explicit and one-shot: receivers drain whatever is
/// still buffered and then observe the end of the queue.
#[derive(Debug)]
pub(crate) struct BoundedQueue<T> {
  tx: Sender<T>,
  rx: Receiver<T>,
}

impl<T> BoundedQueue<T> {
  /// Creates a new `BoundedQueue` with a specified capacity.
  pub(crate) fn new(capacity: usize) -> Result<Self, PoolError> {
    if capacity == 0 {
      return Err(PoolError::InvalidConfig("queue capacity must be at least 1".to_string()));
    }
    let (tx, rx) = async_channel::bounded(capacity);
    Ok(Self { tx, rx })
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer<T>, QueueConsumer<T>) {
    (QueueProducer { tx: self.tx }, QueueConsumer { rx: self.rx })
  }
}

/// The producer handle. Clones feed the same queue.
pub(crate) struct QueueProducer<T> {
  tx: Sender<T>,
}

/// The consumer handle. Clones compete for items; each item is received once.
pub(crate) struct QueueConsumer<T> {
  rx: Receiver<T>,
}

impl<T> Clone for QueueProducer<T> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<T> Clone for QueueConsumer<T> {
  fn clone(&self) -> Self {
    Self { rx: self.rx.clone() }
  }
}

impl<T> fmt::Debug for QueueProducer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("len", &self.len())
      .field("capacity", &self.capacity())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl<T> fmt::Debug for QueueConsumer<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueConsumer")
      .field("len", &self.rx.len())
      .field("closed", &self.rx.is_closed())
      .finish()
  }
}

impl<T> QueueProducer<T> {
  /// Sends an item into the queue, waiting while the queue is full.
  ///
  /// Fails with `QueueClosed` if the queue is closed before the item could be
  /// enqueued, including while this call was waiting for space.
  pub(crate) async fn send(&self, item: T) -> Result<(), PoolError> {
    self.tx.send(item).await.map_err(|_| PoolError::QueueClosed)
  }

  /// Closes the queue. Closing twice is a lifecycle violation.
  pub(crate) fn close(&self) -> Result<(), PoolError> {
    if self.tx.close() {
      Ok(())
    } else {
      Err(PoolError::QueueAlreadyClosed)
    }
  }

  /// Returns `true` once the queue is closed, either explicitly or because
  /// every consumer was dropped.
  pub(crate) fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  /// Returns the number of buffered items.
  pub(crate) fn len(&self) -> usize {
    self.tx.len()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.tx.capacity().unwrap_or(usize::MAX)
  }
}

impl<T> QueueConsumer<T> {
  /// Receives the next item in FIFO order.
  ///
  /// Returns `None` once the queue is closed and every buffered item has been
  /// received.
  pub(crate) async fn recv(&self) -> Option<T> {
    self.rx.recv().await.ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[test]
  fn zero_capacity_is_rejected() {
    assert!(matches!(BoundedQueue::<u8>::new(0), Err(PoolError::InvalidConfig(_))));
  }

  #[tokio::test]
  async fn test_queue_send_recv_fifo() {
    let (producer, consumer) = BoundedQueue::new(5).unwrap().split();

    for i in 0..5 {
      producer.send(i).await.unwrap();
    }
    assert_eq!(producer.len(), 5);
    assert_eq!(producer.capacity(), 5);

    for expected in 0..5 {
      assert_eq!(consumer.recv().await, Some(expected));
    }
    assert_eq!(producer.len(), 0);
  }

  #[tokio::test]
  async fn test_queue_capacity_blocks_send() {
    let (producer, consumer) = BoundedQueue::new(1).unwrap().split();

    producer.send(1).await.unwrap();

    let send_future = producer.send(2);
    tokio::pin!(send_future);

    tokio::select! {
        _ = &mut send_future => {
            panic!("Send should have blocked because the queue is full.");
        },
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    assert_eq!(consumer.recv().await, Some(1));

    tokio::time::timeout(Duration::from_millis(50), send_future)
      .await
      .expect("Send did not complete after queue was drained.")
      .unwrap();
    assert_eq!(consumer.recv().await, Some(2));
  }

  #[tokio::test]
  async fn test_recv_blocks_while_empty_and_open() {
    let (_producer, consumer) = BoundedQueue::<u8>::new(2).unwrap().split();
    let waited = tokio::time::timeout(Duration::from_millis(50), consumer.recv()).await;
    assert!(waited.is_err(), "recv on an open, empty queue should keep waiting");
  }

  #[tokio::test]
  async fn test_close_drains_then_ends() {
    let (producer, consumer) = BoundedQueue::new(3).unwrap().split();

    producer.send("a").await.unwrap();
    producer.send("b").await.unwrap();
    producer.close().unwrap();
    assert!(producer.is_closed());

    assert_eq!(consumer.recv().await, Some("a"));
    assert_eq!(consumer.recv().await, Some("b"));
    assert_eq!(consumer.recv().await, None);
    assert_eq!(consumer.recv().await, None);
  }

  #[tokio::test]
  async fn test_send_after_close_fails() {
    let (producer, _consumer) = BoundedQueue::new(2).unwrap().split();
    producer.close().unwrap();
    assert_eq!(producer.send(1).await, Err(PoolError::QueueClosed));
  }

  #[tokio::test]
  async fn test_double_close_fails() {
    let (producer, _consumer) = BoundedQueue::<u8>::new(2).unwrap().split();
    producer.close().unwrap();
    assert_eq!(producer.close(), Err(PoolError::QueueAlreadyClosed));
  }

  #[tokio::test]
  async fn test_close_wakes_blocked_sender() {
    let (producer, _consumer) = BoundedQueue::new(1).unwrap().split();
    producer.send(1).await.unwrap();

    let blocked = {
      let producer = producer.clone();
      tokio::spawn(async move { producer.send(2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    producer.close().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(200), blocked)
      .await
      .expect("blocked sender was not woken by close")
      .unwrap();
    assert_eq!(outcome, Err(PoolError::QueueClosed));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_queue_concurrent_consumers_receive_each_item_once() {
    let (producer, consumer) = BoundedQueue::new(4).unwrap().split();
    let num_items: usize = 200;
    let received_sum = Arc::new(AtomicUsize::new(0));
    let received_count = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..4)
      .map(|_| {
        let consumer = consumer.clone();
        let received_sum = received_sum.clone();
        let received_count = received_count.clone();
        tokio::spawn(async move {
          while let Some(item) = consumer.recv().await {
            received_sum.fetch_add(item, Ordering::SeqCst);
            received_count.fetch_add(1, Ordering::SeqCst);
          }
        })
      })
      .collect();

    for i in 0..num_items {
      producer.send(i).await.unwrap();
    }
    producer.close().unwrap();

    for handle in consumers {
      handle.await.unwrap();
    }

    assert_eq!(received_count.load(Ordering::SeqCst), num_items);
    assert_eq!(received_sum.load(Ordering::SeqCst), (0..num_items).sum::<usize>());
  }
}
