use bounded_pool::{Task, WorkerPool};
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Doubling Example ---");

  let pool = WorkerPool::new(
    3, // Workers
    5, // Queue capacity
    |x: i64| Ok::<_, String>(x * 2),
  )
  .expect("Failed to start pool");

  let results = pool.results().expect("Result stream already taken");
  let collector = tokio::spawn(results.collect_all());

  for input in [1, 2, 3, 4, 5] {
    // Each task owns its input; later iterations cannot change it.
    let task = Task::new(input as u64, input);
    if let Err(e) = pool.submit(task).await {
      tracing::error!("Failed to submit task {}: {}", input, e);
    }
  }

  info!("All tasks submitted. Closing pool.");
  let summary = pool.close().await.expect("Pool close failed");
  info!("Pool closed: {} processed, {} failed.", summary.processed, summary.failed);

  for result in collector.await.expect("Collector task failed") {
    match result.outcome {
      Ok(output) => info!("Task {} (worker {}) -> {}", result.id, result.worker_id, output),
      Err(failure) => info!("Task {} failed: {}", result.id, failure),
    }
  }
  info!("--- Doubling Example End ---");
}
