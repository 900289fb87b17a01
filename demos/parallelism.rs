use bounded_pool::{available_parallelism, Task, WorkerPool};
use std::time::Instant;
use tracing::info;

fn heavy_sum(limit: u64) -> Result<u64, String> {
  let mut sum = 0u64;
  for i in 0..limit {
    sum = sum.wrapping_add(std::hint::black_box(i));
  }
  Ok(sum)
}

async fn run(workers: usize, jobs: u64) -> std::time::Duration {
  let pool = WorkerPool::new(workers, workers, heavy_sum).expect("Failed to start pool");
  let collector = tokio::spawn(pool.results().expect("Result stream already taken").collect_all());

  let started = Instant::now();
  pool
    .submit_all(Task::sequence(std::iter::repeat(50_000_000).take(jobs as usize)))
    .await
    .expect("Failed to submit tasks");
  pool.close().await.expect("Pool close failed");
  let elapsed = started.elapsed();

  let results = collector.await.expect("Collector task failed");
  assert_eq!(results.len() as u64, jobs);
  elapsed
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  let cores = available_parallelism();
  let jobs = cores as u64 * 2;
  info!("--- Parallelism Example: {} jobs, {} cores ---", jobs, cores);

  let serial = run(1, jobs).await;
  info!("1 worker finished in {:?}", serial);

  let parallel = run(cores, jobs).await;
  info!("{} workers finished in {:?}", cores, parallel);
}
