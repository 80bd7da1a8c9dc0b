use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Job, JobPatch, JobStatus};

use super::{apply_patch, JobStore, StoreError};

/// Initialize the PostgreSQL connection pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

const JOB_COLUMNS: &str = "job_id, asset_types, filename_hint, status, video_ref, results_ref, \
                           error, created_at, started_at, finished_at";

/// PostgreSQL-backed job store.
///
/// Row-level locking gives per-job update atomicity without blocking
/// updates to other jobs; the claim is a single conditional UPDATE so
/// at most one worker can move a job out of `queued`.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a row to a Job. An unrecognized status string is surfaced as
/// corruption, never defaulted.
fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown job status {status_str:?}")))?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        asset_types: row.try_get("asset_types")?,
        filename_hint: row.try_get("filename_hint")?,
        status,
        video_ref: row.try_get("video_ref")?,
        results_ref: row.try_get("results_ref")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        asset_types: Vec<String>,
        filename_hint: Option<String>,
    ) -> Result<Job, StoreError> {
        let job = Job::new(asset_types, filename_hint);

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, asset_types, filename_hint, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job.job_id)
        .bind(&job.asset_types)
        .bind(&job.filename_hint)
        .bind(job.status.to_string())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, job_id: Uuid, patch: JobPatch) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        let mut job = job_from_row(&row)?;
        apply_patch(&mut job, patch)?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, video_ref = $3, results_ref = $4, error = $5,
                started_at = $6, finished_at = $7
            WHERE job_id = $1
            "#,
        )
        .bind(job.job_id)
        .bind(job.status.to_string())
        .bind(&job.video_ref)
        .bind(&job.results_ref)
        .bind(&job.error)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn list(
        &self,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM jobs
                    WHERE status = $1
                    ORDER BY created_at ASC
                    LIMIT $2 OFFSET $3
                    "#
                ))
                .bind(status.to_string())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM jobs
                    ORDER BY created_at ASC
                    LIMIT $1 OFFSET $2
                    "#
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(job_from_row).collect()
    }

    async fn claim(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        // Single conditional UPDATE: only one concurrent caller can see
        // the row in `queued` state and flip it.
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'running', started_at = NOW(), finished_at = NULL, error = NULL
            WHERE job_id = $1 AND status = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(job_from_row(&row)?)),
            None => {
                // Distinguish "lost the race" from "no such job".
                if self.get(job_id).await?.is_none() {
                    return Err(StoreError::NotFound);
                }
                Ok(None)
            }
        }
    }

    async fn count_queued(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}
