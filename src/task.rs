use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Identifier of a submitted task, chosen by the caller.
pub type TaskId = u64;

/// Index of a worker within its pool, `0..worker_count`.
pub type WorkerId = usize;

/// The transform every worker applies to task inputs.
/// Failures are already converted to [`TaskFailure`].
pub type Transform<T, U> = Arc<dyn Fn(T) -> Result<U, TaskFailure> + Send + Sync + 'static>;

/// An immutable unit of work.
///
/// Tasks are moved into the pool by value. Once submitted, the input is owned
/// by the job queue and then by exactly one worker, so a worker never observes
/// state that the submitting code may still mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task<T> {
  id: TaskId,
  input: T,
}

impl<T> Task<T> {
  pub fn new(id: TaskId, input: T) -> Self {
    Self { id, input }
  }

  /// Numbers `inputs` with consecutive ids starting at zero.
  pub fn sequence(inputs: impl IntoIterator<Item = T>) -> impl Iterator<Item = Task<T>> {
    inputs
      .into_iter()
      .enumerate()
      .map(|(index, input)| Task::new(index as TaskId, input))
  }

  pub fn id(&self) -> TaskId {
    self.id
  }

  pub fn input(&self) -> &T {
    &self.input
  }

  pub(crate) fn into_parts(self) -> (TaskId, T) {
    (self.id, self.input)
  }
}

/// Why a task did not produce an output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
  #[error("transform returned an error: {0}")]
  Error(String),

  #[error("transform panicked: {0}")]
  Panicked(String),

  #[error("transform did not run to completion: {0}")]
  Aborted(String),
}

/// The outcome of processing one [`Task`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult<U> {
  pub id: TaskId,
  pub worker_id: WorkerId,
  pub outcome: Result<U, TaskFailure>,
}

impl<U> TaskResult<U> {
  pub fn is_ok(&self) -> bool {
    self.outcome.is_ok()
  }

  pub fn output(&self) -> Option<&U> {
    self.outcome.as_ref().ok()
  }

  /// Human readable failure description, `None` for successful tasks.
  pub fn error_info(&self) -> Option<String> {
    self.outcome.as_ref().err().map(ToString::to_string)
  }

  pub fn into_outcome(self) -> Result<U, TaskFailure> {
    self.outcome
  }
}

/// Wraps a caller supplied fallible function into a [`Transform`].
pub(crate) fn into_transform<T, U, E, F>(f: F) -> Transform<T, U>
where
  F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
  E: fmt::Display,
{
  Arc::new(move |input| f(input).map_err(|e| TaskFailure::Error(e.to_string())))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sequence_numbers_from_zero() {
    let tasks: Vec<Task<char>> = Task::sequence(['a', 'b', 'c']).collect();
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0], Task::new(0, 'a'));
    assert_eq!(tasks[2].id(), 2);
    assert_eq!(*tasks[2].input(), 'c');
  }

  #[test]
  fn transform_errors_become_task_failures() {
    let transform = into_transform(|x: i32| if x < 0 { Err("negative input") } else { Ok(x * 2) });
    assert_eq!(transform(4), Ok(8));
    assert_eq!(transform(-1), Err(TaskFailure::Error("negative input".to_string())));
  }

  #[test]
  fn result_accessors() {
    let ok = TaskResult { id: 1, worker_id: 0, outcome: Ok(10) };
    assert!(ok.is_ok());
    assert_eq!(ok.output(), Some(&10));
    assert_eq!(ok.error_info(), None);

    let failed: TaskResult<i32> = TaskResult {
      id: 2,
      worker_id: 1,
      outcome: Err(TaskFailure::Panicked("boom".into())),
    };
    assert!(!failed.is_ok());
    assert_eq!(failed.output(), None);
    assert_eq!(failed.error_info().as_deref(), Some("transform panicked: boom"));
  }
}
