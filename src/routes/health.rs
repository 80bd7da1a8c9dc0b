use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: ComponentHealth,
    pub blob_store: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health — health check with dependency status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Job store connectivity; also refreshes the queue depth gauge.
    let store_start = std::time::Instant::now();
    let store_check = match state.store.count_queued().await {
        Ok(depth) => {
            metrics::gauge!("detection_queue_depth").set(depth as f64);
            ComponentHealth {
                status: "ok".to_string(),
                latency_ms: Some(store_start.elapsed().as_millis() as u64),
            }
        }
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    // Blob store: URL signing exercises credentials without a network
    // round trip.
    let blob_start = std::time::Instant::now();
    let blob_check = match state.blobs.presign_get("health/probe", 60).await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(blob_start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
        },
    };

    let all_healthy = store_check.status == "ok" && blob_check.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            job_store: store_check,
            blob_store: blob_check,
        },
    };

    (status_code, Json(response))
}
