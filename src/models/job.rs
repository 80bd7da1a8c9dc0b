use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a detection job in its lifecycle.
///
/// `created → uploaded → queued → running → {completed | failed}`.
/// `completed` and `failed` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Created,
    Uploaded,
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether no further transitions can occur from this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One video analysis job, tracked from upload through detection to a
/// results document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    /// Requested detection categories; non-empty, set once at creation.
    pub asset_types: Vec<String>,
    pub filename_hint: Option<String>,
    pub status: JobStatus,
    /// Blob-store key of the uploaded video. Write-once.
    pub video_ref: Option<String>,
    /// Blob-store key of the results document. Write-once, set only by
    /// the producer that completes processing.
    pub results_ref: Option<String>,
    /// Present only while the job is in `failed` state.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(asset_types: Vec<String>, filename_hint: Option<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            asset_types,
            filename_hint,
            status: JobStatus::Created,
            video_ref: None,
            results_ref: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Partial update applied atomically by a `JobStore`.
///
/// The store stamps `started_at`/`finished_at` itself when `status`
/// enters `running` or a terminal state, so patches never carry
/// timestamps. `error: Some(None)` clears a previous error.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub video_ref: Option<String>,
    pub results_ref: Option<String>,
    pub error: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Created,
            JobStatus::Uploaded,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let text = status.to_string();
            assert_eq!(JobStatus::from_str(&text).unwrap(), status);
        }
        assert_eq!(JobStatus::Queued.to_string(), "queued");
    }

    #[test]
    fn unknown_status_text_is_an_error() {
        assert!(JobStatus::from_str("done").is_err());
    }

    #[test]
    fn new_job_starts_created_with_no_refs() {
        let job = Job::new(vec!["milepost".to_string()], None);
        assert_eq!(job.status, JobStatus::Created);
        assert!(job.video_ref.is_none());
        assert!(job.results_ref.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }
}
