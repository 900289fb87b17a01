use crate::config::ExecutionMode;
use crate::queue::{QueueConsumer, QueueProducer};
use crate::task::{Task, TaskFailure, TaskId, TaskResult, Transform, WorkerId};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, trace, warn};

/// Counters reported by a worker when its loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  pub worker_id: WorkerId,
  pub processed: u64,
  pub failed: u64,
  /// Results dropped because nobody was reading the result sink anymore.
  pub discarded: u64,
}

/// Keeps the pool's active worker count accurate even if the worker future is
/// dropped early.
struct ActiveWorkerGuard(Arc<AtomicUsize>);

impl ActiveWorkerGuard {
  fn enter(counter: Arc<AtomicUsize>) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(counter)
  }
}

impl Drop for ActiveWorkerGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

pub(crate) struct Worker<T: Send + 'static, U: Send + 'static> {
  pub(crate) worker_id: WorkerId,
  pub(crate) pool_name: Arc<String>,
  pub(crate) jobs: QueueConsumer<Task<T>>,
  pub(crate) results: QueueProducer<TaskResult<U>>,
  pub(crate) transform: Transform<T, U>,
  pub(crate) execution: ExecutionMode,
  pub(crate) in_flight: Arc<DashMap<TaskId, WorkerId>>,
  pub(crate) active_workers: Arc<AtomicUsize>,
}

impl<T: Send + 'static, U: Send + 'static> Worker<T, U> {
  /// Processes tasks until the job queue is closed and empty.
  ///
  /// Every dequeued task yields exactly one result, whatever the transform does.
  pub(crate) async fn run(self) -> WorkerStats {
    let _active = ActiveWorkerGuard::enter(self.active_workers.clone());
    let mut stats = WorkerStats {
      worker_id: self.worker_id,
      ..WorkerStats::default()
    };
    info!(pool_name = %*self.pool_name, worker_id = self.worker_id, "Worker started.");

    while let Some(task) = self.jobs.recv().await {
      let (task_id, input) = task.into_parts();
      trace!(pool_name = %*self.pool_name, worker_id = self.worker_id, %task_id, "Dequeued task.");

      self.in_flight.insert(task_id, self.worker_id);
      let outcome = self.execute(input).await;
      self.in_flight.remove(&task_id);

      stats.processed += 1;
      if let Err(failure) = &outcome {
        stats.failed += 1;
        warn!(pool_name = %*self.pool_name, worker_id = self.worker_id, %task_id, %failure, "Task failed.");
      } else {
        debug!(pool_name = %*self.pool_name, worker_id = self.worker_id, %task_id, "Task completed.");
      }

      let result = TaskResult {
        id: task_id,
        worker_id: self.worker_id,
        outcome,
      };
      if self.results.send(result).await.is_err() {
        stats.discarded += 1;
        warn!(
          pool_name = %*self.pool_name,
          worker_id = self.worker_id,
          %task_id,
          "Result sink closed (consumer gone). Result discarded, continuing to drain the job queue."
        );
      }
    }

    info!(
      pool_name = %*self.pool_name,
      worker_id = self.worker_id,
      processed = stats.processed,
      failed = stats.failed,
      "Job queue closed and empty. Worker stopped."
    );
    stats
  }

  async fn execute(&self, input: T) -> Result<U, TaskFailure> {
    match self.execution {
      ExecutionMode::Inline => run_guarded(&self.transform, input),
      ExecutionMode::Blocking => {
        let transform = self.transform.clone();
        match tokio::task::spawn_blocking(move || run_guarded(&transform, input)).await {
          Ok(outcome) => outcome,
          Err(join_error) if join_error.is_panic() => {
            Err(TaskFailure::Panicked(panic_message(join_error.into_panic().as_ref())))
          }
          Err(join_error) => Err(TaskFailure::Aborted(join_error.to_string())),
        }
      }
    }
  }
}

/// Runs the transform, turning a panic into a failed outcome.
fn run_guarded<T, U>(transform: &Transform<T, U>, input: T) -> Result<U, TaskFailure> {
  match panic::catch_unwind(AssertUnwindSafe(|| transform(input))) {
    Ok(outcome) => outcome,
    Err(payload) => Err(TaskFailure::Panicked(panic_message(payload.as_ref()))),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
