use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use genq_comfyui::ComfyUIApi;
use genq_db::PgJobQueue;
use genq_events::{EventBus, EventLogger};
use genq_pipeline::{FsTemplateStore, JobProcessor, Producer, RequeueSweeper, WorkerPool};
use genq_worker::{scheduler, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Timeout for a single HTTP call to the render backend.
const BACKEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "genq_worker=debug,genq_pipeline=debug,genq_events=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        comfyui_url = %config.comfyui_url,
        templates_dir = %config.templates_dir,
        concurrency = config.concurrency,
        poll_interval_secs = config.poll.interval.as_secs(),
        poll_max_attempts = config.poll.max_attempts,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = genq_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    genq_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    genq_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Collaborators ---
    let queue = Arc::new(PgJobQueue::new(pool));
    let http = reqwest::Client::builder()
        .timeout(BACKEND_REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let backend = Arc::new(ComfyUIApi::with_client(http, config.comfyui_url.clone()));
    let templates = Arc::new(FsTemplateStore::new(&config.templates_dir));

    let events = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(events.subscribe()));

    let processor = Arc::new(JobProcessor::new(
        queue.clone(),
        backend,
        templates,
        events.clone(),
        config.poll,
    ));

    let cancel = CancellationToken::new();

    // --- Worker pool ---
    let worker_pool =
        WorkerPool::new(processor, config.concurrency).with_idle_interval(config.idle_interval);
    let pool_cancel = cancel.clone();
    let pool_handle = tokio::spawn(async move { worker_pool.run(pool_cancel).await });

    // --- Requeue scheduler ---
    let scheduler_handle = match config.requeue_interval {
        Some(every) => {
            let producer = Arc::new(Producer::new(queue.clone(), events.clone()));
            let sweeper = Arc::new(RequeueSweeper::new(
                queue,
                producer,
                events.clone(),
                config.requeue.clone(),
            ));
            Some(tokio::spawn(scheduler::run(sweeper, every, cancel.clone())))
        }
        None => {
            tracing::info!("Periodic requeue disabled");
            None
        }
    };

    shutdown_signal().await;
    tracing::info!("Shutdown requested, waiting for in-flight jobs");
    cancel.cancel();

    if let Err(e) = pool_handle.await {
        tracing::error!(error = %e, "Worker pool task failed");
    }
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }

    // Dropping the last sender closes the channel and stops the logger.
    drop(events);
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
