mod app_state;
mod config;
mod models;
mod routes;
mod services;
mod store;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::detector::HttpDetectionEngine;
use services::dispatcher::{Dispatcher, ProcessingBackend, RemoteBackend, WorkerBackend};
use services::processor::{self, FfmpegOpener, Processor};
use services::storage::{BlobStore, MemoryBlobStore, R2Client};
use store::{postgres, JobStore, MemoryJobStore, PgJobStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing roadeye server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "detection_processing_seconds",
        "Time to process one video detection job"
    );
    metrics::describe_counter!("detection_jobs_submitted", "Total detection jobs submitted");
    metrics::describe_counter!("detection_jobs_completed", "Total detection jobs completed");
    metrics::describe_counter!("detection_jobs_failed", "Total detection jobs that failed");
    metrics::describe_gauge!(
        "detection_queue_depth",
        "Current number of queued detection jobs"
    );

    // Job store: PostgreSQL when configured, in-process otherwise
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL job store");
            let pool = postgres::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            postgres::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-process job store");
            Arc::new(MemoryJobStore::new())
        }
    };

    // Blob store: R2 when configured, in-process otherwise
    let blobs: Arc<dyn BlobStore> = match (
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    ) {
        (Some(bucket), Some(endpoint), Some(access_key), Some(secret_key)) => {
            tracing::info!("Initializing R2 blob store");
            Arc::new(
                R2Client::new(bucket, endpoint, access_key, secret_key)
                    .expect("Failed to initialize R2 client"),
            )
        }
        _ => {
            tracing::warn!("R2 not configured, using in-process blob store");
            Arc::new(MemoryBlobStore::new())
        }
    };

    // Processing backend behind the dispatcher
    let backend: Arc<dyn ProcessingBackend> = match config.dispatch_mode.as_str() {
        "remote" => {
            let endpoint_url = config
                .remote_endpoint_url
                .clone()
                .expect("REMOTE_ENDPOINT_URL required for remote dispatch");
            let api_key = config
                .remote_api_key
                .clone()
                .expect("REMOTE_API_KEY required for remote dispatch");
            tracing::info!(endpoint = %endpoint_url, "Using remote processing backend");
            Arc::new(RemoteBackend::new(endpoint_url, api_key).expect("Failed to build HTTP client"))
        }
        _ => {
            tracing::info!("Using local worker backend");
            Arc::new(WorkerBackend)
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(store.clone(), backend));
    let state = AppState::new(
        store.clone(),
        blobs.clone(),
        dispatcher,
        config.presign_expires_secs,
    );

    // Single-process mode: with in-process stores there is no separate
    // worker to share them with, so the poll loop runs here.
    if config.database_url.is_none() && config.dispatch_mode == "worker" {
        match &config.inference_url {
            Some(inference_url) => {
                let engine = HttpDetectionEngine::new(
                    inference_url.clone(),
                    config.inference_token.clone(),
                    config.model.clone(),
                )
                .expect("Failed to initialize detection engine");

                let processor = Arc::new(Processor::new(
                    store.clone(),
                    blobs.clone(),
                    Arc::new(engine),
                    Arc::new(FfmpegOpener),
                    config.sampling_settings(),
                ));
                tokio::spawn(processor::run_loop(
                    processor,
                    Duration::from_millis(config.worker_poll_ms),
                ));
                tracing::info!("In-process worker loop started");
            }
            None => {
                tracing::warn!(
                    "INFERENCE_URL not set; queued jobs will not be processed in this process"
                );
            }
        }
    }

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/jobs", post(routes::jobs::create_job))
        .route("/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/jobs/{job_id}/upload-url", post(routes::jobs::upload_url))
        .route(
            "/jobs/{job_id}/upload-complete",
            post(routes::jobs::upload_complete),
        )
        .route("/jobs/{job_id}/upload", post(routes::jobs::upload_video))
        .route("/jobs/{job_id}/submit", post(routes::jobs::submit_job))
        // Legacy alias for submit
        .route("/jobs/{job_id}/process", post(routes::jobs::submit_job))
        .route("/jobs/{job_id}/results", get(routes::jobs::get_results))
        .route("/jobs/{job_id}/video", get(routes::jobs::get_video))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(512 * 1024 * 1024)); // 512 MB for fallback video uploads

    tracing::info!("Starting roadeye on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
