// src/queue/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::queue::{
    Delivery, JobInfo, JobStatus, LEASE_EXPIRED, QueueError, QueueOptions, RetryOutcome, Task,
    TaskQueue,
};

const JOB_COLUMNS: &str = "id, queue, status, retried, max_retry, last_error, owner_id, \
     created_at, updated_at, completed_at";

/// Queue stored in the `jobs` table. Workers in any number of processes can
/// share it; claims use `FOR UPDATE SKIP LOCKED`.
pub struct PgQueue {
    pool: PgPool,
    options: QueueOptions,
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    status: String,
    retried: i32,
    max_retry: i32,
    last_error: Option<String>,
    owner_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobInfo {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| QueueError::Corrupt(format!("job {} has status {}", row.id, row.status)))?;
        Ok(JobInfo {
            id: row.id,
            queue: row.queue,
            status,
            retried: row.retried.max(0) as u32,
            max_retry: row.max_retry.max(0) as u32,
            last_error: row.last_error,
            owner: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(FromRow)]
struct ClaimRow {
    id: Uuid,
    queue: String,
    payload: Vec<u8>,
    retried: i32,
    lease_token: Uuid,
}

impl PgQueue {
    pub fn new(pool: PgPool, options: QueueOptions) -> Self {
        Self { pool, options }
    }

    /// Explains why an ack matched no row running under its lease.
    async fn not_running(&self, id: Uuid) -> QueueError {
        match self.status(id).await {
            Ok(Some(info)) if info.status == JobStatus::Running => QueueError::LeaseLost(id),
            Ok(Some(info)) => QueueError::NotRunning {
                id,
                status: info.status,
            },
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }

    async fn finish(
        &self,
        delivery: &Delivery,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<JobInfo, QueueError> {
        let sql = format!(
            "UPDATE jobs SET status = $3, last_error = COALESCE($4, last_error), \
             completed_at = NOW(), updated_at = NOW(), lease_until = NULL, lease_token = NULL, \
             expires_at = NOW() + make_interval(secs => retention_secs::double precision) \
             WHERE id = $1 AND status = 'running' AND lease_token = $2 RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(delivery.id)
            .bind(delivery.lease)
            .bind(status.as_str())
            .bind(error)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.not_running(delivery.id).await),
        }
    }

    /// Fails timed-out claims of `queue` that have no retries left.
    async fn fail_exhausted_leases(&self, queue: &str) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', last_error = $2,
                completed_at = NOW(), updated_at = NOW(),
                lease_until = NULL, lease_token = NULL,
                expires_at = NOW() + make_interval(secs => retention_secs::double precision)
            WHERE queue = $1
              AND status = 'running'
              AND lease_until <= NOW()
              AND retried >= max_retry
            "#,
        )
        .bind(queue)
        .bind(LEASE_EXPIRED)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TaskQueue for PgQueue {
    async fn enqueue(&self, task: Task) -> Result<JobInfo, QueueError> {
        let sql = format!(
            "INSERT INTO jobs (id, queue, payload, status, retried, max_retry, retention_secs, owner_id, next_attempt_at) \
             VALUES ($1, $2, $3, 'queued', 0, $4, $5, $6, NOW()) RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(task.id)
            .bind(&task.queue)
            .bind(&task.payload)
            .bind(i32::try_from(task.max_retry).unwrap_or(i32::MAX))
            .bind(i64::try_from(task.retention.as_secs()).unwrap_or(i64::MAX))
            .bind(task.owner)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return QueueError::Duplicate(task.id);
                    }
                }
                QueueError::from(e)
            })?;
        row.try_into()
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobInfo>, QueueError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE id = $1 AND (expires_at IS NULL OR expires_at > NOW())"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobInfo::try_from).transpose()
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let failed = self.fail_exhausted_leases(queue).await?;
        if failed > 0 {
            tracing::warn!("Failed {} jobs whose lease expired with no retries left", failed);
        }

        // SET expressions see the old row, so `status = 'running'` marks a reclaim.
        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            UPDATE jobs
            SET retried = CASE WHEN status = 'running' THEN retried + 1 ELSE retried END,
                last_error = CASE WHEN status = 'running' THEN $4 ELSE last_error END,
                status = 'running',
                lease_until = NOW() + make_interval(secs => $2),
                lease_token = $3,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1
                  AND ((status IN ('queued', 'retrying') AND next_attempt_at <= NOW())
                       OR (status = 'running' AND lease_until <= NOW() AND retried < max_retry))
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, payload, retried, lease_token
            "#,
        )
        .bind(queue)
        .bind(self.options.lease.as_secs_f64())
        .bind(Uuid::new_v4())
        .bind(LEASE_EXPIRED)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Delivery {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            retried: row.retried.max(0) as u32,
            lease: row.lease_token,
        }))
    }

    async fn complete(&self, delivery: &Delivery) -> Result<JobInfo, QueueError> {
        self.finish(delivery, JobStatus::Succeeded, None).await
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> Result<JobInfo, QueueError> {
        let id = delivery.id;
        let mut tx = self.pool.begin().await?;

        let budget: Option<(i32, i32)> = sqlx::query_as(
            "SELECT retried, max_retry FROM jobs \
             WHERE id = $1 AND status = 'running' AND lease_token = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(delivery.lease)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((retried, max_retry)) = budget else {
            tx.rollback().await?;
            return Err(self.not_running(id).await);
        };

        let outcome = self
            .options
            .after_failure(retried.max(0) as u32, max_retry.max(0) as u32);

        let row = match outcome {
            RetryOutcome::Retry { retried, delay } => {
                let sql = format!(
                    "UPDATE jobs SET status = 'retrying', retried = $2, last_error = $3, \
                     next_attempt_at = NOW() + make_interval(secs => $4), \
                     lease_until = NULL, lease_token = NULL, updated_at = NOW() \
                     WHERE id = $1 RETURNING {JOB_COLUMNS}"
                );
                sqlx::query_as::<_, JobRow>(&sql)
                    .bind(id)
                    .bind(i32::try_from(retried).unwrap_or(i32::MAX))
                    .bind(error)
                    .bind(delay.as_secs_f64())
                    .fetch_one(&mut *tx)
                    .await?
            }
            RetryOutcome::Exhausted => {
                let sql = format!(
                    "UPDATE jobs SET status = 'failed', last_error = $2, \
                     completed_at = NOW(), updated_at = NOW(), lease_until = NULL, lease_token = NULL, \
                     expires_at = NOW() + make_interval(secs => retention_secs::double precision) \
                     WHERE id = $1 RETURNING {JOB_COLUMNS}"
                );
                sqlx::query_as::<_, JobRow>(&sql)
                    .bind(id)
                    .bind(error)
                    .fetch_one(&mut *tx)
                    .await?
            }
        };

        tx.commit().await?;
        row.try_into()
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<JobInfo, QueueError> {
        self.finish(delivery, JobStatus::Failed, Some(error)).await
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let result =
            sqlx::query("DELETE FROM jobs WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
