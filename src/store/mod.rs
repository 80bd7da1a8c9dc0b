use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, JobStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Persistence contract for job records.
///
/// The original system grew three storage variants (in-memory,
/// file-backed, object-store-backed); this trait consolidates them into
/// one pluggable interface. Updates are atomic per job id; the `queued`
/// rows double as the work queue, with [`JobStore::claim`] as the
/// exclusive hand-off to a worker.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `created` state with a fresh id.
    async fn create(
        &self,
        asset_types: Vec<String>,
        filename_hint: Option<String>,
    ) -> Result<Job, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Apply a partial patch with read-modify-write atomicity for this
    /// job id. Entering `queued` clears both run timestamps, entering
    /// `running` stamps a fresh `started_at`, and entering a terminal
    /// state stamps `finished_at`. `video_ref`/`results_ref` are
    /// write-once.
    async fn update(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, StoreError>;

    /// List jobs ordered by `created_at` ascending, optionally filtered
    /// by status.
    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, StoreError>;

    /// Compare-and-set `queued → running`. Returns the claimed job, or
    /// `None` if the job was not in `queued` state (another worker won,
    /// or the job moved on). Only one concurrent caller can win.
    async fn claim(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Number of jobs currently in `queued` state (queue depth gauge).
    async fn count_queued(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,

    #[error("{0} is write-once and already set")]
    WriteOnce(&'static str),

    #[error("persisted job state is corrupt: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Apply a patch to a job in place, enforcing write-once fields and
/// stamping lifecycle timestamps. Shared by the store backends so both
/// enforce identical semantics.
pub(crate) fn apply_patch(job: &mut Job, patch: JobPatch) -> Result<(), StoreError> {
    if let Some(video_ref) = patch.video_ref {
        match &job.video_ref {
            Some(existing) if *existing != video_ref => {
                return Err(StoreError::WriteOnce("video_ref"))
            }
            _ => job.video_ref = Some(video_ref),
        }
    }

    if let Some(results_ref) = patch.results_ref {
        match &job.results_ref {
            Some(existing) if *existing != results_ref => {
                return Err(StoreError::WriteOnce("results_ref"))
            }
            _ => job.results_ref = Some(results_ref),
        }
    }

    if let Some(error) = patch.error {
        job.error = error;
    }

    if let Some(status) = patch.status {
        match status {
            // A re-queue begins a fresh attempt; timestamps from the
            // previous run no longer describe this job.
            JobStatus::Queued => {
                job.started_at = None;
                job.finished_at = None;
            }
            JobStatus::Running => {
                job.started_at = Some(Utc::now());
                job.finished_at = None;
            }
            s if s.is_terminal() => {
                job.finished_at = Some(Utc::now());
            }
            _ => {}
        }
        job.status = status;
    }

    Ok(())
}
