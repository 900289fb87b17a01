//! Pool configuration.
//!
//! A `PoolConfig` is built and validated before any worker starts. The only
//! process-wide value is the parallelism hint, computed once and never mutated.

use crate::error::PoolError;

use std::num::NonZeroUsize;
use std::str::FromStr;

lazy_static::lazy_static! {
  static ref AVAILABLE_PARALLELISM: usize = std::thread::available_parallelism()
    .map(NonZeroUsize::get)
    .unwrap_or(1);
}

pub const ENV_WORKERS: &str = "BOUNDED_POOL_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "BOUNDED_POOL_QUEUE_CAPACITY";
pub const ENV_RESULT_CAPACITY: &str = "BOUNDED_POOL_RESULT_CAPACITY";
pub const ENV_EXECUTION: &str = "BOUNDED_POOL_EXECUTION";

/// Number of hardware execution contexts, used as the default worker count.
pub fn available_parallelism() -> usize {
  *AVAILABLE_PARALLELISM
}

/// Where a worker runs the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
  /// On Tokio's blocking thread pool. Suits transforms that block or burn CPU;
  /// workers run truly in parallel regardless of the runtime flavor.
  #[default]
  Blocking,
  /// Directly on the worker task. Only for cheap, non-blocking transforms.
  Inline,
}

impl FromStr for ExecutionMode {
  type Err = PoolError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value.trim().to_ascii_lowercase().as_str() {
      "blocking" => Ok(ExecutionMode::Blocking),
      "inline" => Ok(ExecutionMode::Inline),
      other => Err(PoolError::InvalidConfig(format!(
        "unknown execution mode '{}', expected 'blocking' or 'inline'",
        other
      ))),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub name: String,
  pub worker_count: usize,
  /// Capacity of the job queue.
  pub queue_capacity: usize,
  /// Capacity of the result sink.
  pub result_capacity: usize,
  pub execution: ExecutionMode,
}

impl Default for PoolConfig {
  fn default() -> Self {
    let worker_count = available_parallelism();
    Self {
      name: "pool".to_string(),
      worker_count,
      queue_capacity: worker_count,
      result_capacity: worker_count,
      execution: ExecutionMode::default(),
    }
  }
}

impl PoolConfig {
  /// A config with explicit sizes; the result sink gets the job queue's capacity.
  pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
    Self {
      worker_count,
      queue_capacity,
      result_capacity: queue_capacity,
      ..Self::default()
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_worker_count(mut self, worker_count: usize) -> Self {
    self.worker_count = worker_count;
    self
  }

  pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
    self.queue_capacity = queue_capacity;
    self
  }

  pub fn with_result_capacity(mut self, result_capacity: usize) -> Self {
    self.result_capacity = result_capacity;
    self
  }

  pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
    self.execution = execution;
    self
  }

  pub fn validate(&self) -> Result<(), PoolError> {
    if self.worker_count == 0 {
      return Err(PoolError::InvalidConfig("worker_count must be at least 1".to_string()));
    }
    if self.queue_capacity == 0 {
      return Err(PoolError::InvalidConfig("queue_capacity must be at least 1".to_string()));
    }
    if self.result_capacity == 0 {
      return Err(PoolError::InvalidConfig("result_capacity must be at least 1".to_string()));
    }
    Ok(())
  }

  /// Defaults overridden by the `BOUNDED_POOL_*` environment variables.
  pub fn from_env() -> Result<Self, PoolError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PoolError> {
    let mut config = Self::default();
    if let Some(workers) = parse_var(&lookup, ENV_WORKERS)? {
      config.worker_count = workers;
      config.queue_capacity = workers;
      config.result_capacity = workers;
    }
    if let Some(capacity) = parse_var(&lookup, ENV_QUEUE_CAPACITY)? {
      config.queue_capacity = capacity;
      config.result_capacity = capacity;
    }
    if let Some(capacity) = parse_var(&lookup, ENV_RESULT_CAPACITY)? {
      config.result_capacity = capacity;
    }
    if let Some(execution) = parse_var(&lookup, ENV_EXECUTION)? {
      config.execution = execution;
    }
    config.validate()?;
    Ok(config)
  }
}

fn parse_var<V>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<V>, PoolError>
where
  V: FromStr,
  V::Err: std::fmt::Display,
{
  match lookup(key) {
    None => Ok(None),
    Some(raw) => raw
      .trim()
      .parse::<V>()
      .map(Some)
      .map_err(|e| PoolError::InvalidConfig(format!("{}='{}': {}", key, raw, e))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| vars.get(key).cloned()
  }

  #[test]
  fn default_follows_parallelism_hint() {
    let config = PoolConfig::default();
    assert!(available_parallelism() >= 1);
    assert_eq!(config.worker_count, available_parallelism());
    assert_eq!(config.queue_capacity, config.worker_count);
    assert_eq!(config.execution, ExecutionMode::Blocking);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn validate_rejects_zero_sizes() {
    assert!(matches!(PoolConfig::new(0, 4).validate(), Err(PoolError::InvalidConfig(_))));
    assert!(matches!(PoolConfig::new(4, 0).validate(), Err(PoolError::InvalidConfig(_))));
    assert!(matches!(
      PoolConfig::new(4, 4).with_result_capacity(0).validate(),
      Err(PoolError::InvalidConfig(_))
    ));
  }

  #[test]
  fn builder_overrides() {
    let config = PoolConfig::new(3, 5)
      .with_name("images")
      .with_result_capacity(9)
      .with_execution(ExecutionMode::Inline);
    assert_eq!(config.name, "images");
    assert_eq!(config.worker_count, 3);
    assert_eq!(config.queue_capacity, 5);
    assert_eq!(config.result_capacity, 9);
    assert_eq!(config.execution, ExecutionMode::Inline);
  }

  #[test]
  fn env_lookup_overrides_defaults() {
    let config = PoolConfig::from_lookup(lookup_from(&[
      (ENV_WORKERS, "6"),
      (ENV_QUEUE_CAPACITY, "12"),
      (ENV_EXECUTION, "Inline"),
    ]))
    .unwrap();
    assert_eq!(config.worker_count, 6);
    assert_eq!(config.queue_capacity, 12);
    assert_eq!(config.result_capacity, 12);
    assert_eq!(config.execution, ExecutionMode::Inline);
  }

  #[test]
  fn env_lookup_rejects_malformed_values() {
    let err = PoolConfig::from_lookup(lookup_from(&[(ENV_WORKERS, "many")])).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(msg) if msg.contains(ENV_WORKERS)));

    let err = PoolConfig::from_lookup(lookup_from(&[(ENV_EXECUTION, "threads")])).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));

    let err = PoolConfig::from_lookup(lookup_from(&[(ENV_RESULT_CAPACITY, "0")])).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
  }
}
