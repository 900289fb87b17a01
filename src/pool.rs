use crate::config::{available_parallelism, ExecutionMode, PoolConfig};
use crate::error::PoolError;
use crate::queue::{BoundedQueue, QueueConsumer, QueueProducer};
use crate::results::ResultStream;
use crate::task::{into_transform, Task, TaskId, TaskResult, Transform, WorkerId};
use crate::worker::{Worker, WorkerStats};

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Lifecycle of a [`WorkerPool`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
  /// Constructed, workers not yet spawned.
  Idle,
  /// Workers spawned, accepting tasks.
  Running,
  /// Job queue closed; workers finishing buffered tasks.
  Draining,
  /// Every worker exited and the result sink is closed.
  Closed,
}

impl fmt::Display for PoolState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PoolState::Idle => "idle",
      PoolState::Running => "running",
      PoolState::Draining => "draining",
      PoolState::Closed => "closed",
    };
    f.write_str(name)
  }
}

/// Totals reported by [`WorkerPool::close`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
  pub submitted: u64,
  pub processed: u64,
  pub succeeded: u64,
  pub failed: u64,
  pub discarded: u64,
  pub workers: Vec<WorkerStats>,
}

impl PoolSummary {
  fn absorb(&mut self, stats: WorkerStats) {
    self.processed += stats.processed;
    self.failed += stats.failed;
    self.succeeded += stats.processed - stats.failed;
    self.discarded += stats.discarded;
    self.workers.push(stats);
  }
}

/// A fixed-size pool of workers draining a bounded job queue into a bounded
/// result sink.
///
/// Results are consumed through [`WorkerPool::results`]. Both queues are
/// bounded, so with more outstanding tasks than the two capacities can hold,
/// results must be consumed concurrently with `submit` and `close`.
pub struct WorkerPool<T: Send + 'static, U: Send + 'static> {
  pool_name: Arc<String>,
  config: PoolConfig,
  tokio_handle: TokioHandle,
  state: Arc<Mutex<PoolState>>,
  jobs: QueueProducer<Task<T>>,
  results_tx: QueueProducer<TaskResult<U>>,
  results_rx: Mutex<Option<QueueConsumer<TaskResult<U>>>>,
  worker_handles: Mutex<Vec<JoinHandle<WorkerStats>>>,
  // Owned by the pool so the wind-down outlives a cancelled `close()` call.
  wind_down: tokio::sync::Mutex<Option<JoinHandle<Result<PoolSummary, PoolError>>>>,
  in_flight: Arc<DashMap<TaskId, WorkerId>>,
  active_workers: Arc<AtomicUsize>,
  submitted: Arc<AtomicU64>,
}

impl<T: Send + 'static, U: Send + 'static> WorkerPool<T, U> {
  /// Starts a pool on the current Tokio runtime.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidConfig` if `worker_count` or `queue_capacity` is zero.
  /// Returns `PoolError::NoRuntime` if called outside a Tokio runtime.
  pub fn new<E, F>(worker_count: usize, queue_capacity: usize, transform: F) -> Result<Self, PoolError>
  where
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    E: fmt::Display,
  {
    let tokio_handle = TokioHandle::try_current().map_err(|e| PoolError::NoRuntime(e.to_string()))?;
    Self::with_config(PoolConfig::new(worker_count, queue_capacity), tokio_handle, transform)
  }

  /// Starts a pool from an explicit configuration, spawning its workers on `tokio_handle`.
  pub fn with_config<E, F>(config: PoolConfig, tokio_handle: TokioHandle, transform: F) -> Result<Self, PoolError>
  where
    F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    E: fmt::Display,
  {
    config.validate()?;
    let (jobs, jobs_rx) = BoundedQueue::new(config.queue_capacity)?.split();
    let (results_tx, results_rx) = BoundedQueue::new(config.result_capacity)?.split();

    let pool = Self {
      pool_name: Arc::new(config.name.clone()),
      config,
      tokio_handle: tokio_handle.clone(),
      state: Arc::new(Mutex::new(PoolState::Idle)),
      jobs,
      results_tx,
      results_rx: Mutex::new(Some(results_rx)),
      worker_handles: Mutex::new(Vec::new()),
      wind_down: tokio::sync::Mutex::new(None),
      in_flight: Arc::new(DashMap::new()),
      active_workers: Arc::new(AtomicUsize::new(0)),
      submitted: Arc::new(AtomicU64::new(0)),
    };
    pool.spawn_workers(&tokio_handle, jobs_rx, into_transform(transform));
    Ok(pool)
  }

  fn spawn_workers(&self, tokio_handle: &TokioHandle, jobs_rx: QueueConsumer<Task<T>>, transform: Transform<T, U>) {
    let worker_count = self.config.worker_count;
    if self.config.execution == ExecutionMode::Inline && worker_count > available_parallelism() {
      warn!(
        pool_name = %*self.pool_name,
        worker_count,
        available_parallelism = available_parallelism(),
        "Inline workers exceed available parallelism; extra workers only add contention."
      );
    }

    let mut handles = self.worker_handles.lock();
    for worker_id in 0..worker_count {
      let worker = Worker {
        worker_id,
        pool_name: self.pool_name.clone(),
        jobs: jobs_rx.clone(),
        results: self.results_tx.clone(),
        transform: transform.clone(),
        execution: self.config.execution,
        in_flight: self.in_flight.clone(),
        active_workers: self.active_workers.clone(),
      };
      handles.push(tokio_handle.spawn(
        worker
          .run()
          .instrument(info_span!("pool_worker", pool_name = %*self.pool_name, worker_id)),
      ));
    }
    *self.state.lock() = PoolState::Running;
    info!(
      pool_name = %*self.pool_name,
      worker_count,
      queue_capacity = self.config.queue_capacity,
      result_capacity = self.config.result_capacity,
      execution = ?self.config.execution,
      "Pool running."
    );
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  pub fn state(&self) -> PoolState {
    *self.state.lock()
  }

  pub fn worker_count(&self) -> usize {
    self.config.worker_count
  }

  /// Number of workers whose loop has not yet ended.
  pub fn active_workers(&self) -> usize {
    self.active_workers.load(AtomicOrdering::SeqCst)
  }

  /// Returns the current number of tasks waiting in the job queue.
  pub fn queued_task_count(&self) -> usize {
    self.jobs.len()
  }

  /// Returns the number of tasks a worker is executing right now.
  pub fn in_flight_count(&self) -> usize {
    self.in_flight.len()
  }

  pub fn submitted_count(&self) -> u64 {
    self.submitted.load(AtomicOrdering::SeqCst)
  }

  /// Enqueues a task, waiting while the job queue is full.
  ///
  /// # Errors
  /// Returns `PoolError::SubmitAfterClose` if `close` has begun, including when
  /// it begins while this call is waiting for queue space.
  pub async fn submit(&self, task: Task<T>) -> Result<(), PoolError> {
    let task_id = task.id();
    let state = self.state();
    if state != PoolState::Running {
      error!(pool_name = %*self.pool_name, %task_id, %state, "Submit: Attempted to submit task to a pool that is draining or closed.");
      return Err(PoolError::SubmitAfterClose { task_id });
    }

    debug!(pool_name = %*self.pool_name, %task_id, "Submitting task to queue.");
    match self.jobs.send(task).await {
      Ok(()) => {
        self.submitted.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
      }
      Err(send_error) => {
        error!(
          pool_name = %*self.pool_name,
          %task_id,
          "Submit: Job queue closed while enqueuing task: {}",
          send_error
        );
        Err(PoolError::SubmitAfterClose { task_id })
      }
    }
  }

  /// Submits every task in order, stopping at the first failure.
  /// Returns the number of tasks submitted.
  pub async fn submit_all(&self, tasks: impl IntoIterator<Item = Task<T>>) -> Result<usize, PoolError> {
    let mut count = 0;
    for task in tasks {
      self.submit(task).await?;
      count += 1;
    }
    Ok(count)
  }

  /// Takes the pool's result stream. It can be taken once.
  pub fn results(&self) -> Result<ResultStream<U>, PoolError> {
    match self.results_rx.lock().take() {
      Some(consumer) => Ok(ResultStream::new(consumer)),
      None => {
        warn!(pool_name = %*self.pool_name, "Result stream requested again after it was already taken.");
        Err(PoolError::ResultsAlreadyTaken)
      }
    }
  }

  /// Stops accepting tasks, waits for every worker to drain the job queue and
  /// exit, then closes the result sink.
  ///
  /// The wind-down runs as a task owned by the pool: if this future is dropped
  /// before it completes, the pool still reaches `Closed` and a later `close()`
  /// picks up the outcome.
  ///
  /// # Errors
  /// Returns `PoolError::AlreadyClosed` if a previous `close()` already returned.
  /// Returns `PoolError::WorkerPanicked` if a worker task terminated abnormally;
  /// the pool is still closed in that case.
  pub async fn close(&self) -> Result<PoolSummary, PoolError> {
    let mut wind_down = self.wind_down.lock().await;
    if let Some(handle) = self.begin_draining() {
      *wind_down = Some(handle);
    }

    let Some(handle) = wind_down.as_mut() else {
      let state = self.state();
      error!(pool_name = %*self.pool_name, %state, "Close: Pool close was already requested.");
      return Err(PoolError::AlreadyClosed(state));
    };

    let outcome = match handle.await {
      Ok(outcome) => outcome,
      Err(join_error) => {
        error!(pool_name = %*self.pool_name, "Pool wind-down task failed: {:?}", join_error);
        Err(PoolError::WorkerPanicked {
          reason: join_error.to_string(),
          partial: Box::default(),
        })
      }
    };
    *wind_down = None;
    outcome
  }

  /// Moves Running to Draining, closes the job queue and spawns the wind-down.
  /// Returns `None` if the pool is no longer running.
  fn begin_draining(&self) -> Option<JoinHandle<Result<PoolSummary, PoolError>>> {
    {
      let mut state = self.state.lock();
      if *state != PoolState::Running {
        return None;
      }
      *state = PoolState::Draining;
    }

    info!(pool_name = %*self.pool_name, "Closing job queue. Draining.");
    if let Err(e) = self.jobs.close() {
      warn!(pool_name = %*self.pool_name, "Job queue was already closed: {}", e);
    }

    let handles = std::mem::take(&mut *self.worker_handles.lock());
    Some(self.tokio_handle.spawn(
      run_wind_down(
        self.pool_name.clone(),
        handles,
        self.results_tx.clone(),
        self.state.clone(),
        self.submitted.clone(),
      )
      .instrument(info_span!("pool_wind_down", pool_name = %*self.pool_name)),
    ))
  }
}

/// Joins every worker, then closes the result sink and marks the pool Closed.
async fn run_wind_down<U: Send + 'static>(
  pool_name: Arc<String>,
  handles: Vec<JoinHandle<WorkerStats>>,
  results_tx: QueueProducer<TaskResult<U>>,
  state: Arc<Mutex<PoolState>>,
  submitted: Arc<AtomicU64>,
) -> Result<PoolSummary, PoolError> {
  let mut outcome = join_workers(&pool_name, handles).await;

  // Closing happens-after every worker's last send. The sink is already
  // closed when the result stream was dropped.
  if results_tx.close().is_err() {
    debug!(pool_name = %*pool_name, "Result sink was already closed; the result stream was dropped before close.");
  }
  *state.lock() = PoolState::Closed;

  let submitted = submitted.load(AtomicOrdering::SeqCst);
  match &mut outcome {
    Ok(summary) => summary.submitted = submitted,
    Err(PoolError::WorkerPanicked { partial, .. }) => partial.submitted = submitted,
    Err(_) => {}
  }
  info!(pool_name = %*pool_name, "Pool closed.");
  outcome
}

/// Awaits every worker handle. A failed join does not stop the others from
/// being awaited; the totals gathered so far travel with the error.
async fn join_workers(
  pool_name: &str,
  handles: Vec<JoinHandle<WorkerStats>>,
) -> Result<PoolSummary, PoolError> {
  let mut summary = PoolSummary::default();
  let mut failure = None;

  info!(pool_name, workers = handles.len(), "Waiting for workers to join.");
  for handle in handles {
    match handle.await {
      Ok(stats) => {
        trace!(pool_name, worker_id = stats.worker_id, "Worker joined.");
        summary.absorb(stats);
      }
      Err(join_error) => {
        error!(pool_name, "Error joining worker during close: {:?}", join_error);
        failure.get_or_insert(join_error.to_string());
      }
    }
  }

  match failure {
    None => Ok(summary),
    Some(reason) => {
      error!(
        pool_name,
        processed = summary.processed,
        failed = summary.failed,
        joined = summary.workers.len(),
        "Pool closed with a failed worker."
      );
      Err(PoolError::WorkerPanicked {
        reason,
        partial: Box::new(summary),
      })
    }
  }
}

impl<T: Send + 'static, U: Send + 'static> fmt::Debug for WorkerPool<T, U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("name", &self.pool_name)
      .field("state", &self.state())
      .field("worker_count", &self.config.worker_count)
      .field("active_workers", &self.active_workers())
      .field("jobs", &self.jobs)
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static, U: Send + 'static> Drop for WorkerPool<T, U> {
  fn drop(&mut self) {
    let state = *self.state.lock();
    if state == PoolState::Running {
      // Workers drain what is queued and exit; the result sink closes once the
      // last worker drops its producer.
      info!(
        pool_name = %*self.pool_name,
        "WorkerPool dropped while running. Closing job queue without waiting for workers."
      );
      let _ = self.jobs.close();
    } else {
      trace!(pool_name = %*self.pool_name, %state, "Drop: Pool already closing or closed.");
    }
  }
}
