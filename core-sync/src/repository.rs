//! Sync job persistence.

use crate::error::{Result, SyncError};
use crate::job::{SyncJob, SyncJobId, SyncStatus};
use async_trait::async_trait;
use core_library::BindingId;
use platform_traits::Platform;
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

/// Repository for sync job bookkeeping and history.
#[async_trait]
pub trait SyncJobRepository: Send + Sync {
    async fn insert(&self, job: &SyncJob) -> Result<()>;

    async fn update(&self, job: &SyncJob) -> Result<()>;

    async fn find_by_id(&self, id: SyncJobId) -> Result<Option<SyncJob>>;

    /// History for one binding, most recent first.
    async fn history(&self, binding_id: BindingId, limit: u32) -> Result<Vec<SyncJob>>;

    /// Whether a pending or running job exists for a binding.
    async fn has_active(&self, binding_id: BindingId) -> Result<bool>;
}

/// SQLite implementation of [`SyncJobRepository`].
pub struct SqliteSyncJobRepository {
    pool: SqlitePool,
}

impl SqliteSyncJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncJobRow {
    id: String,
    binding_id: i64,
    platform: String,
    status: String,
    applied_count: i64,
    skipped_count: i64,
    failed_count: i64,
    error_message: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

impl TryFrom<SyncJobRow> for SyncJob {
    type Error = SyncError;

    fn try_from(row: SyncJobRow) -> Result<Self> {
        let platform = Platform::from_str(&row.platform)
            .map_err(|_| SyncError::InvalidStatus(format!("platform: {}", row.platform)))?;
        Ok(SyncJob {
            id: SyncJobId::from_string(&row.id)?,
            binding_id: BindingId(row.binding_id),
            platform,
            status: row.status.parse()?,
            applied_count: row.applied_count as u64,
            skipped_count: row.skipped_count as u64,
            failed_count: row.failed_count as u64,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl SyncJobRepository for SqliteSyncJobRepository {
    async fn insert(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, binding_id, platform, status,
                applied_count, skipped_count, failed_count,
                error_message, created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.binding_id.0)
        .bind(job.platform.as_str())
        .bind(job.status.as_str())
        .bind(job.applied_count as i64)
        .bind(job.skipped_count as i64)
        .bind(job.failed_count as i64)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(core_library::LibraryError::Database)?;
        Ok(())
    }

    async fn update(&self, job: &SyncJob) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                status = ?, applied_count = ?, skipped_count = ?, failed_count = ?,
                error_message = ?, started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.applied_count as i64)
        .bind(job.skipped_count as i64)
        .bind(job.failed_count as i64)
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(core_library::LibraryError::Database)?
        .rows_affected();

        if affected == 0 {
            return Err(SyncError::JobNotFound {
                job_id: job.id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, id: SyncJobId) -> Result<Option<SyncJob>> {
        let row: Option<SyncJobRow> = sqlx::query_as("SELECT * FROM sync_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(core_library::LibraryError::Database)?;
        row.map(SyncJob::try_from).transpose()
    }

    async fn history(&self, binding_id: BindingId, limit: u32) -> Result<Vec<SyncJob>> {
        let rows: Vec<SyncJobRow> = sqlx::query_as(
            "SELECT * FROM sync_jobs WHERE binding_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(binding_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(core_library::LibraryError::Database)?;
        rows.into_iter().map(SyncJob::try_from).collect()
    }

    async fn has_active(&self, binding_id: BindingId) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sync_jobs WHERE binding_id = ? AND status IN ('pending', 'running')",
        )
        .bind(binding_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(core_library::LibraryError::Database)?;
        Ok(count > 0)
    }
}
