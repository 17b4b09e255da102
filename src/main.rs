use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kontext_serve::app_state::AppState;
use kontext_serve::config::{AppConfig, ResultBackend};
use kontext_serve::routes::{self, metrics::MetricsState};
use kontext_serve::services::{
    inference::RemoteInferenceClient,
    queue::JobQueue,
    storage::{FsResultStore, MemoryResultStore, ResultStore, S3ResultStore},
    sweeper::Sweeper,
    worker::Worker,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        max_queue_size = config.max_queue_size,
        job_result_ttl = config.job_result_ttl,
        cleanup_interval = config.cleanup_interval,
        "Initializing image generation server"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    routes::metrics::describe_metrics();

    let store: Arc<dyn ResultStore> = match config.result_backend {
        ResultBackend::Fs => {
            let store = FsResultStore::new(&config.results_folder)
                .await
                .expect("Could not create results directory");
            tracing::info!(path = %store.root().display(), "Results will be saved on disk");
            Arc::new(store)
        }
        ResultBackend::S3 => {
            let s3 = config.s3_settings().expect("Incomplete S3 configuration");
            tracing::info!(bucket = s3.bucket, endpoint = s3.endpoint, "Using S3 result storage");
            Arc::new(
                S3ResultStore::new(s3.bucket, s3.region, s3.endpoint, s3.access_key, s3.secret_key)
                    .expect("Failed to initialize S3 client"),
            )
        }
        ResultBackend::Memory => {
            tracing::warn!("Results are kept in memory and lost on restart");
            Arc::new(MemoryResultStore::new())
        }
    };

    let executor = RemoteInferenceClient::new(&config.inference_url, config.inference_timeout())
        .expect("Failed to initialize inference client");
    if config.inference_timeout().is_none() {
        tracing::warn!(
            "No inference timeout configured; a hung backend stalls the worker until restart"
        );
    }

    let queue = Arc::new(JobQueue::new(config.max_queue_size));
    let shutdown = CancellationToken::new();

    // Exactly one worker per queue.
    let worker = Worker::new(queue.clone(), Arc::new(executor), store.clone());
    let mut worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let sweeper = Sweeper::new(
        queue.clone(),
        store.clone(),
        config.job_ttl(),
        config.sweep_interval(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: queue.clone(),
    };
    let app = routes::router(AppState::new(queue, store), config.max_upload_bytes()).merge(
        Router::new()
            .route("/metrics", get(routes::metrics::prometheus_metrics))
            .with_state(metrics_state),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server error");
            }
        }
        result = &mut worker_handle => {
            // Before shutdown the worker only exits if a job invariant was violated.
            tracing::error!(error = ?result.err(), "Image generation worker died, shutting down");
            std::process::exit(1);
        }
    }

    // An in-flight job is abandoned; its record is lost with the process.
    shutdown.cancel();
    worker_handle.abort();
    let _ = sweeper_handle.await;
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
