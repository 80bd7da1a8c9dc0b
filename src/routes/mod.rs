use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::services::dispatcher::DispatchError;
use crate::services::storage::StorageError;
use crate::store::StoreError;

pub mod health;
pub mod jobs;
pub mod metrics;

/// API-level error taxonomy: validation and precondition failures are
/// the client's problem, corruption and backend failures are ours, and
/// both map to explicit status codes instead of crashing a handler.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Precondition(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Validation(m) | ApiError::Precondition(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("job not found".to_string()),
            StoreError::WriteOnce(field) => {
                ApiError::Validation(format!("{field} is already set and cannot change"))
            }
            StoreError::Corrupt(m) => ApiError::Internal(format!("job store corrupt: {m}")),
            StoreError::Database(e) => ApiError::Internal(format!("database error: {e}")),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => ApiError::NotFound(format!("object not found: {key}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound => ApiError::NotFound("job not found".to_string()),
            DispatchError::Precondition(m) => ApiError::Precondition(m),
            DispatchError::Backend(m) => ApiError::Internal(m),
            DispatchError::Store(e) => e.into(),
        }
    }
}
