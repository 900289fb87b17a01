//! A Tokio-based bounded worker pool.
//!
//! A fixed set of workers pulls [`Task`]s from a shared bounded job queue,
//! applies one transform to each and publishes a [`TaskResult`] to a bounded
//! result sink. Closing the pool drains the job queue, joins every worker and
//! only then ends the result stream.

mod config;
mod error;
mod pool;
mod queue;
mod results;
mod task;
mod worker;

pub use config::{available_parallelism, ExecutionMode, PoolConfig};
pub use error::PoolError;
pub use pool::{PoolState, PoolSummary, WorkerPool};
pub use results::ResultStream;
pub use task::{Task, TaskFailure, TaskId, TaskResult, WorkerId};
pub use worker::WorkerStats;
