//! logport-server - Thin HTTP front door wiring every pipeline stage
//! together: `Coalescer<StreamProducer>` on the ingest path,
//! `WorkerPool` draining the stream queue into the `AnalyticsSink` with
//! `RetryStrategy` as the failure path.
//!
//! Structure mirrors `otlp2parquet-server`'s `lib.rs`: a `run()` entry
//! point, an `AppState` shared across handlers, and a graceful shutdown
//! signal shared by the HTTP listener and the background worker/retry
//! tasks.

mod auth;
mod handlers;
mod init;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use logport_coalescer::{Coalescer, CoalescerConfig};
use logport_config::{RetryPersistence, RuntimeConfig};
use logport_retry::{
    DropOnFailureRetryStore, InMemoryRetryStore, RetryPolicy, RetryStore, RetryStrategy,
    SqliteRetryStore,
};
use logport_sink::{AnalyticsSink, ParquetAnalyticsSink};
use logport_stream::{RedisStreamConfig, RedisStreamQueue, StreamProducer, StreamQueue};
use logport_worker::{SinkRetryTarget, WorkerConfig, WorkerPool, WorkerPoolConfig};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use state::AppState;

async fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, starting graceful shutdown"),
            _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
        }
        let _ = tx.send(true);
    });
    rx
}

/// Entry point: load configuration, wire the pipeline, serve until
/// shutdown.
pub async fn run() -> Result<()> {
    let config = logport_config::load_config().context("failed to load configuration")?;
    init::init_tracing(&config);

    info!("logport-server starting");
    run_with_config(config).await
}

pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    let shutdown_rx = shutdown_signal().await;

    let redis_client =
        redis::Client::open(config.stream.redis_url.clone()).context("invalid redis URL")?;
    let conn = redis_client
        .get_connection_manager()
        .await
        .context("failed to connect to redis")?;
    let stream_queue: Arc<dyn StreamQueue> = Arc::new(RedisStreamQueue::new(
        conn,
        RedisStreamConfig {
            stream_name: config.stream.stream_name.clone(),
            consumer_group: config.stream.consumer_group.clone(),
            max_len: config.stream.max_len,
        },
    ));
    stream_queue
        .initialize()
        .await
        .context("failed to initialize stream queue")?;

    let storage_operator = init::init_storage(&config)?;
    let sink: Arc<dyn AnalyticsSink> = Arc::new(ParquetAnalyticsSink::new(storage_operator));

    let retry_store: Arc<dyn RetryStore> = match config.retry.persistence {
        RetryPersistence::Memory => Arc::new(InMemoryRetryStore::new()),
        RetryPersistence::Sqlite => Arc::new(
            SqliteRetryStore::open(&config.retry.sqlite_path)
                .context("failed to open sqlite retry store")?,
        ),
        RetryPersistence::Drop => Arc::new(DropOnFailureRetryStore),
    };
    let retry_target = Arc::new(SinkRetryTarget::new(Arc::clone(&sink)));
    let retry_policy = RetryPolicy {
        max_attempts: config.retry.max_attempts,
        base_delay: Duration::from_millis(config.retry.base_delay_ms),
        max_delay: Duration::from_millis(config.retry.max_delay_ms),
    };
    let retry_strategy = Arc::new(RetryStrategy::new(retry_store, retry_target, retry_policy));

    let worker_pool = Arc::new(WorkerPool::new(
        Arc::clone(&stream_queue),
        Arc::clone(&sink),
        Arc::clone(&retry_strategy),
        WorkerPoolConfig {
            instance_id: config.worker.instance_id.clone(),
            worker_count: config.worker.worker_count,
            worker: WorkerConfig {
                consumer_id: String::new(),
                batch_size: config.worker.batch_size,
                max_batch_size: config.worker.max_batch_size,
                max_wait: Duration::from_millis(config.worker.max_wait_ms),
                read_block: Duration::from_millis(config.worker.read_block_ms),
                claim_min_idle: Duration::from_secs(config.worker.claim_min_idle_secs),
                claim_interval: Duration::from_secs(config.worker.claim_interval_secs),
                retry_queue_limit: if config.worker.retry_queue_limit == 0 {
                    None
                } else {
                    Some(config.worker.retry_queue_limit)
                },
            },
            heartbeat_interval: Duration::from_secs(config.worker.heartbeat_interval_secs),
            restart_base_delay: Duration::from_millis(500),
            restart_max_delay: Duration::from_secs(30),
            restart_reset_after: Duration::from_secs(60),
        },
    ));
    let health = worker_pool.health();

    let pool_shutdown = shutdown_rx.clone();
    let pool_handle = tokio::spawn(async move { worker_pool.run(pool_shutdown).await });

    let retry_shutdown = shutdown_rx.clone();
    let retry_handle = tokio::spawn(async move { retry_strategy.run(retry_shutdown).await });

    let producer = StreamProducer::new(stream_queue);
    let coalescer = Coalescer::new(
        producer,
        CoalescerConfig {
            max_batch_size: config.coalescer.max_batch_size,
            max_wait: Duration::from_millis(config.coalescer.max_wait_ms),
        },
    );

    let state = AppState {
        coalescer,
        health,
        max_payload_bytes: config.server.max_payload_bytes,
    };

    let app = Router::new()
        .route("/v1/entries", post(handlers::handle_entries))
        .route_layer(middleware::from_fn(auth::require_bearer_token))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::ready_check))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.bind_addr))?;

    info!(addr = %config.server.bind_addr, "logport-server listening");

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("server error")?;

    info!("http listener stopped, waiting for background tasks");
    let _ = pool_handle.await;
    let _ = retry_handle.await;
    info!("logport-server shutdown complete");

    Ok(())
}
