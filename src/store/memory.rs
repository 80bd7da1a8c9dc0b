use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, JobStatus};

use super::{apply_patch, JobStore, StoreError};

/// In-process job store for single-node deployments and tests.
///
/// All mutation happens under one write lock, so per-job updates
/// serialize trivially and `claim` is an honest compare-and-set.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        asset_types: Vec<String>,
        filename_hint: Option<String>,
    ) -> Result<Job, StoreError> {
        let job = Job::new(asset_types, filename_hint);
        self.jobs.write().await.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn update(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        apply_patch(job, patch)?;
        Ok(job.clone())
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn claim(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound)?;
        if job.status != JobStatus::Queued {
            return Ok(None);
        }
        apply_patch(
            job,
            JobPatch {
                status: Some(JobStatus::Running),
                error: Some(None),
                ..Default::default()
            },
        )?;
        Ok(Some(job.clone()))
    }

    async fn count_queued(&self) -> Result<u64, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count() as u64)
    }
}
