use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::models::job::{JobPatch, JobStatus};
use crate::store::{JobStore, StoreError};

/// How long a remote invocation may take at the network level. This is
/// independent of processing duration; the remote side works against
/// the job store after accepting the call.
const REMOTE_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A processing backend accepts `(job_id, video_ref)` and is
/// responsible for the job eventually reaching a terminal status. The
/// local poll-worker and the remote invocation are interchangeable
/// behind this trait.
#[async_trait]
pub trait ProcessingBackend: Send + Sync {
    async fn dispatch(&self, job_id: Uuid, video_ref: &str) -> Result<(), DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job not found")]
    NotFound,

    #[error("{0}")]
    Precondition(String),

    #[error("processing backend rejected job: {0}")]
    Backend(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives the job state machine from submission onward.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ProcessingBackend>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, backend: Arc<dyn ProcessingBackend>) -> Self {
        Self { store, backend }
    }

    /// Submit a job for processing.
    ///
    /// Idempotent for jobs already `queued`, `running`, or `completed`:
    /// returns the current status with no second dispatch. A job still
    /// in `created` state is rejected. A `failed` job may be
    /// re-submitted, which clears its error and re-queues it.
    pub async fn submit(&self, job_id: Uuid) -> Result<JobStatus, DispatchError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(DispatchError::NotFound)?;

        match job.status {
            JobStatus::Created => Err(DispatchError::Precondition(
                "job must be uploaded before submit".to_string(),
            )),
            JobStatus::Queued | JobStatus::Running | JobStatus::Completed => {
                tracing::debug!(job_id = %job_id, status = %job.status, "repeat submit is a no-op");
                Ok(job.status)
            }
            JobStatus::Uploaded | JobStatus::Failed => {
                let video_ref = job.video_ref.clone().ok_or_else(|| {
                    DispatchError::Precondition(
                        "job missing video_ref (upload not completed)".to_string(),
                    )
                })?;

                // Queue before dispatch so the handoff target can
                // already see the job.
                self.store
                    .update(
                        job_id,
                        JobPatch {
                            status: Some(JobStatus::Queued),
                            error: Some(None),
                            ..Default::default()
                        },
                    )
                    .await?;

                metrics::counter!("detection_jobs_submitted").increment(1);
                tracing::info!(job_id = %job_id, video_ref = %video_ref, "job queued");

                match self.backend.dispatch(job_id, &video_ref).await {
                    Ok(()) => Ok(JobStatus::Queued),
                    Err(e) => {
                        // Never leave the job stuck in `queued` when
                        // the backend rejected it.
                        let message = e.to_string();
                        self.store
                            .update(
                                job_id,
                                JobPatch {
                                    status: Some(JobStatus::Failed),
                                    error: Some(Some(message.clone())),
                                    ..Default::default()
                                },
                            )
                            .await?;

                        metrics::counter!("detection_jobs_failed").increment(1);
                        tracing::error!(job_id = %job_id, error = %message, "dispatch failed");
                        Err(e)
                    }
                }
            }
        }
    }
}

/// Local backend: the `queued` status is itself the handoff, picked up
/// by the worker loop's poll, so dispatch has nothing left to do.
pub struct WorkerBackend;

#[async_trait]
impl ProcessingBackend for WorkerBackend {
    async fn dispatch(&self, job_id: Uuid, _video_ref: &str) -> Result<(), DispatchError> {
        tracing::debug!(job_id = %job_id, "job left for worker poll");
        Ok(())
    }
}

/// Remote backend: invokes a stateless serverless processing function
/// over HTTP. A rejection or network timeout here must become a
/// terminal failure, not a stuck queue entry.
pub struct RemoteBackend {
    http: Client,
    endpoint_url: String,
    api_token: String,
}

impl RemoteBackend {
    pub fn new(endpoint_url: String, api_token: String) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(REMOTE_SUBMIT_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Backend(e.to_string()))?;

        Ok(Self {
            http,
            endpoint_url,
            api_token,
        })
    }
}

#[async_trait]
impl ProcessingBackend for RemoteBackend {
    async fn dispatch(&self, job_id: Uuid, video_ref: &str) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "input": { "job_id": job_id, "video_key": video_ref }
        });

        let response = self
            .http
            .post(&self.endpoint_url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Backend(format!("remote submit failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Backend(format!(
                "remote submit failed: {status}"
            )));
        }

        Ok(())
    }
}
