use crate::pool::{PoolState, PoolSummary};
use crate::task::TaskId;

use thiserror::Error;

/// Errors that can occur within the `bounded_pool` pool.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("Invalid pool configuration: {0}")]
  InvalidConfig(String),

  #[error("No Tokio runtime available to spawn pool workers: {0}")]
  NoRuntime(String),

  #[error("Pool is draining or closed, cannot accept task {task_id}")]
  SubmitAfterClose { task_id: TaskId },

  #[error("Pool close was already requested (current state: {0})")]
  AlreadyClosed(PoolState),

  #[error("Queue is closed, cannot enqueue")]
  QueueClosed,

  #[error("Queue was already closed")]
  QueueAlreadyClosed,

  #[error("Result stream already taken")]
  ResultsAlreadyTaken,

  /// `partial` holds the totals of the workers that did join.
  #[error("Pool worker terminated abnormally: {reason}")]
  WorkerPanicked { reason: String, partial: Box<PoolSummary> },
}

impl PoolError {
  /// Returns `true` for errors caused by using the pool outside its lifecycle,
  /// as opposed to configuration or runtime problems.
  pub fn is_lifecycle_violation(&self) -> bool {
    matches!(
      self,
      PoolError::SubmitAfterClose { .. }
        | PoolError::AlreadyClosed(_)
        | PoolError::QueueClosed
        | PoolError::QueueAlreadyClosed
        | PoolError::ResultsAlreadyTaken
    )
  }
}
