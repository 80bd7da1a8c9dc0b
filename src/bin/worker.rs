use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use roadeye::config::AppConfig;
use roadeye::services::detector::HttpDetectionEngine;
use roadeye::services::processor::{self, FfmpegOpener, Processor};
use roadeye::services::storage::R2Client;
use roadeye::store::{postgres, PgJobStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // A freestanding worker only makes sense against shared stores:
    // the API's in-process backends are invisible from here.
    let database_url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL required: the worker needs the shared job store");

    tracing::info!("Connecting to PostgreSQL job store");
    let pool = postgres::init_pool(database_url)
        .await
        .expect("Failed to connect to database");
    postgres::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    let store = Arc::new(PgJobStore::new(pool));

    tracing::info!("Initializing R2 blob store");
    let blobs = Arc::new(
        R2Client::new(
            config
                .r2_bucket
                .as_deref()
                .expect("R2_BUCKET required for the worker"),
            config
                .r2_endpoint
                .as_deref()
                .expect("R2_ENDPOINT required for the worker"),
            config
                .r2_access_key
                .as_deref()
                .expect("R2_ACCESS_KEY required for the worker"),
            config
                .r2_secret_key
                .as_deref()
                .expect("R2_SECRET_KEY required for the worker"),
        )
        .expect("Failed to initialize R2 client"),
    );

    tracing::info!("Initializing detection engine client");
    let engine = Arc::new(
        HttpDetectionEngine::new(
            config
                .inference_url
                .clone()
                .expect("INFERENCE_URL required for the worker"),
            config.inference_token.clone(),
            config.model.clone(),
        )
        .expect("Failed to initialize detection engine"),
    );

    let settings = config.sampling_settings();
    tracing::info!(
        sample_fps = settings.sample_fps,
        max_frames = settings.max_frames,
        model = %config.model,
        conf = settings.conf,
        iou = settings.iou,
        max_det = settings.max_det,
        "Worker ready, starting job processing loop"
    );

    let processor = Arc::new(Processor::new(
        store,
        blobs,
        engine,
        Arc::new(FfmpegOpener),
        settings,
    ));

    processor::run_loop(processor, Duration::from_millis(config.worker_poll_ms)).await;
}
