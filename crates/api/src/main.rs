use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use genq_api::config::ServerConfig;
use genq_api::router::build_app_router;
use genq_api::state::AppState;
use genq_db::PgJobQueue;
use genq_events::{EventBus, EventLogger};
use genq_pipeline::{FsTemplateStore, Producer, RequeueSweeper};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "genq_api=debug,genq_pipeline=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!(host = %config.host, port = config.port, "Loaded server configuration");

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

    // --- Event bus ---
    let events = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(EventLogger::run(events.subscribe()));

    // --- Queue services ---
    let queue = Arc::new(PgJobQueue::new(pool));
    let mut producer = Producer::new(queue.clone(), events.clone());
    if let Some(dir) = &config.templates_dir {
        tracing::info!(templates_dir = %dir, "Rejecting jobs for unknown templates");
        producer = producer.with_template_check(Arc::new(FsTemplateStore::new(dir)));
    }
    let producer = Arc::new(producer);
    let sweeper = Arc::new(RequeueSweeper::new(
        queue,
        producer.clone(),
        events.clone(),
        config.requeue.clone(),
    ));

    let config = Arc::new(config);
    let state = AppState {
        producer,
        sweeper,
        config: config.clone(),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped accepting connections, cleaning up");
    drop(events);
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Graceful shutdown complete");
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

    tracing::info!("Shutdown signal received");
}
