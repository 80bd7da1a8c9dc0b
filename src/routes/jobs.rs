use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::detection::ResultsDocument;
use crate::models::job::{Job, JobPatch, JobStatus};
use crate::services::storage::{self, get_json};

use super::ApiError;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    /// Requested detection categories. "assets" is the legacy name.
    #[serde(alias = "assets")]
    #[garde(length(min = 1))]
    pub asset_types: Vec<String>,

    #[garde(skip)]
    pub filename: Option<String>,
}

#[derive(Serialize)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
}

/// POST /jobs — create a job in `created` state.
pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    payload
        .validate()
        .map_err(|e| ApiError::Validation(format!("asset_types must be a non-empty list: {e}")))?;

    let job = state
        .store
        .create(payload.asset_types, payload.filename)
        .await?;

    tracing::info!(job_id = %job.job_id, "job created");
    Ok(Json(CreateJobResponse { job_id: job.job_id }))
}

/// GET /jobs/{job_id} — full job document.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = fetch_job(&state, job_id).await?;
    Ok(Json(job))
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadUrlRequest {
    pub filename: Option<String>,
}

#[derive(Serialize)]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub video_key: String,
}

/// POST /jobs/{job_id}/upload-url — presigned PUT for direct upload.
pub async fn upload_url(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(payload): Json<UploadUrlRequest>,
) -> Result<Json<UploadUrlResponse>, ApiError> {
    let job = fetch_job(&state, job_id).await?;

    let filename = payload
        .filename
        .or(job.filename_hint)
        .unwrap_or_else(|| "upload.mp4".to_string());

    let video_key = storage::video_key(job_id, &filename);
    let upload_url = state
        .blobs
        .presign_put(&video_key, state.presign_expires_secs)
        .await?;

    Ok(Json(UploadUrlResponse {
        upload_url,
        video_key,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UploadCompleteRequest {
    pub video_key: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// POST /jobs/{job_id}/upload-complete — attach the uploaded video and
/// move the job to `uploaded`.
pub async fn upload_complete(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(payload): Json<UploadCompleteRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let video_key = payload
        .video_key
        .ok_or_else(|| ApiError::Validation("video_key is required".to_string()))?;

    // Once the job leaves `created` its video is fixed: a replayed
    // confirmation for the same key answers with the current state, and
    // nothing here may pull a submitted or finished job back.
    let job = fetch_job(&state, job_id).await?;
    if job.status != JobStatus::Created {
        if job.video_ref.as_deref() == Some(video_key.as_str()) {
            return Ok(Json(StatusResponse {
                job_id,
                status: job.status,
            }));
        }
        return Err(ApiError::Precondition(
            "video can only be attached before submission".to_string(),
        ));
    }

    let job = state
        .store
        .update(
            job_id,
            JobPatch {
                status: Some(JobStatus::Uploaded),
                video_ref: Some(video_key),
                error: Some(None),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(StatusResponse {
        job_id,
        status: job.status,
    }))
}

/// POST /jobs/{job_id}/upload — fallback upload through the API: the
/// video travels in a multipart field ("file" or "video") and the
/// server writes it to the blob store itself.
pub async fn upload_video(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<StatusResponse>, ApiError> {
    let job = fetch_job(&state, job_id).await?;
    if job.status != JobStatus::Created {
        return Err(ApiError::Precondition(
            "video can only be attached before submission".to_string(),
        ));
    }

    let mut upload: Option<(String, String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        if !matches!(field.name(), Some("file") | Some("video")) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_owned)
            .or_else(|| job.filename_hint.clone())
            .unwrap_or_else(|| "upload.mp4".to_string());
        let content_type = field
            .content_type()
            .map(str::to_owned)
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;

        upload = Some((filename, content_type, data.to_vec()));
        break;
    }

    let (filename, content_type, data) = upload
        .ok_or_else(|| ApiError::Validation("missing upload field: file (or video)".to_string()))?;

    let video_key = storage::video_key(job_id, &filename);
    state.blobs.put(&video_key, &data, &content_type).await?;

    let job = state
        .store
        .update(
            job_id,
            JobPatch {
                status: Some(JobStatus::Uploaded),
                video_ref: Some(video_key),
                error: Some(None),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(StatusResponse {
        job_id,
        status: job.status,
    }))
}

/// POST /jobs/{job_id}/submit — hand the job to the dispatcher.
/// Idempotent for jobs already queued, running, or completed.
pub async fn submit_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.dispatcher.submit(job_id).await?;
    Ok(Json(StatusResponse { job_id, status }))
}

#[derive(Serialize)]
pub struct ResultsResponse {
    pub job_id: Uuid,
    pub results: ResultsDocument,
}

/// GET /jobs/{job_id}/results — the results document once terminal.
///
/// Before a terminal state this answers 202 with the current status; a
/// failed job surfaces its stored error; a corrupt stored document is
/// an explicit error, never "no results".
pub async fn get_results(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = fetch_job(&state, job_id).await?;

    let key = job
        .results_ref
        .clone()
        .unwrap_or_else(|| storage::results_key(job_id));
    let document: Option<ResultsDocument> = get_json(state.blobs.as_ref(), &key)
        .await
        .map_err(ApiError::from)?;

    match document {
        Some(results) => Ok(Json(ResultsResponse { job_id, results }).into_response()),
        None if !job.status.is_terminal() => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "job_id": job_id,
                "status": job.status,
                "message": "Results not ready yet",
            })),
        )
            .into_response()),
        None if job.status == JobStatus::Failed => Err(ApiError::Internal(
            job.error.unwrap_or_else(|| "job failed".to_string()),
        )),
        None => Err(ApiError::NotFound("results not found".to_string())),
    }
}

#[derive(Serialize)]
pub struct VideoUrlResponse {
    pub job_id: Uuid,
    pub video_url: String,
}

/// GET /jobs/{job_id}/video — presigned GET for the uploaded video.
pub async fn get_video(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<VideoUrlResponse>, ApiError> {
    let job = fetch_job(&state, job_id).await?;
    let video_key = job
        .video_ref
        .ok_or_else(|| ApiError::NotFound("video not uploaded".to_string()))?;

    let video_url = state
        .blobs
        .presign_get(&video_key, state.presign_expires_secs)
        .await?;

    Ok(Json(VideoUrlResponse { job_id, video_url }))
}

async fn fetch_job(state: &AppState, job_id: Uuid) -> Result<Job, ApiError> {
    state
        .store
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("job not found".to_string()))
}
