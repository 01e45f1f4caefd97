use std::sync::Arc;
use std::time::Duration;

use logport_retry::RetryStrategy;
use logport_sink::AnalyticsSink;
use logport_stream::StreamQueue;
use tokio::sync::watch;

use crate::health::HealthRegistry;
use crate::retry_target::SinkRetryTarget;
use crate::worker::{Worker, WorkerConfig};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub instance_id: String,
    pub worker_count: usize,
    pub worker: WorkerConfig,
    pub heartbeat_interval: Duration,
    pub restart_base_delay: Duration,
    pub restart_max_delay: Duration,
    /// A worker run lasting at least this long resets its restart
    /// backoff back to `restart_base_delay`.
    pub restart_reset_after: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            instance_id: "logport".to_string(),
            worker_count: 4,
            worker: WorkerConfig::default(),
            heartbeat_interval: Duration::from_secs(5),
            restart_base_delay: Duration::from_millis(500),
            restart_max_delay: Duration::from_secs(30),
            restart_reset_after: Duration::from_secs(60),
        }
    }
}

/// Fixed-size pool of workers, each supervised independently: a crashed
/// or stalled worker is restarted with exponential backoff rather than
/// taking the whole pool down.
pub struct WorkerPool {
    queue: Arc<dyn StreamQueue>,
    sink: Arc<dyn AnalyticsSink>,
    retry: Arc<RetryStrategy<SinkRetryTarget>>,
    config: WorkerPoolConfig,
    health: Arc<HealthRegistry>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn StreamQueue>,
        sink: Arc<dyn AnalyticsSink>,
        retry: Arc<RetryStrategy<SinkRetryTarget>>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            retry,
            config,
            health: Arc::new(HealthRegistry::new()),
        }
    }

    pub fn health(&self) -> Arc<HealthRegistry> {
        Arc::clone(&self.health)
    }

    /// Run every worker's supervisor loop until `shutdown` fires.
    /// Returns once every worker has stopped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut supervisors = Vec::with_capacity(self.config.worker_count);
        for index in 0..self.config.worker_count {
            let consumer_id = format!("{}-{}", self.config.instance_id, index);
            supervisors.push(self.spawn_supervisor(consumer_id, shutdown.clone()));
        }
        for supervisor in supervisors {
            let _ = supervisor.await;
        }
    }

    fn spawn_supervisor(
        &self,
        consumer_id: String,
        shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let sink = Arc::clone(&self.sink);
        let retry = Arc::clone(&self.retry);
        let health = Arc::clone(&self.health);
        let mut worker_config = self.config.worker.clone();
        worker_config.consumer_id = consumer_id.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let restart_base_delay = self.config.restart_base_delay;
        let restart_max_delay = self.config.restart_max_delay;
        let restart_reset_after = self.config.restart_reset_after;

        tokio::spawn(async move {
            let mut consecutive_restarts: u32 = 0;

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let worker = Worker::new(
                    Arc::clone(&queue),
                    Arc::clone(&sink),
                    Arc::clone(&retry),
                    worker_config.clone(),
                    Arc::clone(&health),
                );

                let started_at = tokio::time::Instant::now();
                let mut handle = tokio::spawn(Arc::clone(&worker).run(shutdown.clone()));

                let crashed = loop {
                    tokio::select! {
                        result = &mut handle => {
                            break result.is_err();
                        }
                        _ = tokio::time::sleep(heartbeat_interval) => {
                            if *shutdown.borrow() {
                                handle.abort();
                                break false;
                            }
                            if health.is_stale(&consumer_id, heartbeat_interval) {
                                tracing::warn!(
                                    consumer_id = %consumer_id,
                                    "worker heartbeat stale, aborting"
                                );
                                handle.abort();
                                break true;
                            }
                        }
                    }
                };

                health.remove(&consumer_id);

                if *shutdown.borrow() {
                    break;
                }

                if started_at.elapsed() >= restart_reset_after {
                    consecutive_restarts = 0;
                }
                if crashed {
                    consecutive_restarts += 1;
                }

                let delay = backoff(restart_base_delay, restart_max_delay, consecutive_restarts);
                tracing::info!(
                    consumer_id = %consumer_id,
                    delay_ms = delay.as_millis() as u64,
                    consecutive_restarts,
                    "restarting worker"
                );
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        })
    }
}

fn backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}
