use bounded_pool::{Task, TaskFailure, WorkerPool};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let pool = WorkerPool::new(
    2,  // Workers
    10, // Queue capacity
    |x: u32| {
      std::thread::sleep(Duration::from_millis(50));
      if x == 7 {
        panic!("This task is designed to panic!");
      }
      Ok::<_, String>(x * x)
    },
  )
  .expect("Failed to start pool");
  let mut results = pool.results().expect("Result stream already taken");

  pool
    .submit_all(Task::sequence(5..10))
    .await
    .expect("Failed to submit tasks");
  pool.close().await.expect("Pool close failed");

  while let Some(result) = results.next_result().await {
    match result.outcome {
      Ok(square) => info!("Task {} completed with {}", result.id, square),
      Err(TaskFailure::Panicked(message)) => {
        info!("Task {} correctly reported a panic: {}", result.id, message);
      }
      Err(other) => info!("Task {} resulted in unexpected failure: {}", result.id, other),
    }
  }
  info!("--- Task Panic Example End ---");
}
