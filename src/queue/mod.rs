// src/queue/mod.rs

//! Durable job queue with at-least-once delivery.
//!
//! A job is an opaque payload tagged with a queue name. It is retried after
//! failures until its retry budget is spent, and stays inspectable by id for a
//! retention window after it reaches a terminal state.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

pub const DEFAULT_MAX_RETRY: u32 = 10;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "retrying" => Some(JobStatus::Retrying),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `status()` reports about a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub queue: String,
    pub status: JobStatus,
    /// Retries consumed so far (the first attempt is not a retry).
    pub retried: u32,
    pub max_retry: u32,
    pub last_error: Option<String>,
    /// User the job was queued for, if any.
    #[serde(skip_serializing)]
    pub owner: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobInfo {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner == Some(user_id)
    }
}

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub queue: String,
    pub payload: Vec<u8>,
    pub max_retry: u32,
    pub retention: Duration,
    pub owner: Option<Uuid>,
}

impl Task {
    pub fn new(queue: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            max_retry: DEFAULT_MAX_RETRY,
            retention: DEFAULT_RETENTION,
            owner: None,
        }
    }

    pub fn owner(mut self, user_id: Uuid) -> Self {
        self.owner = Some(user_id);
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// A job handed to a worker. The worker must answer with `complete`,
/// `retry` or `fail` before the lease runs out.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub queue: String,
    pub payload: Vec<u8>,
    pub retried: u32,
    /// Identifies this claim. Acks carrying an older token are rejected.
    pub lease: Uuid,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("task {0} already exists")]
    Duplicate(Uuid),
    #[error("task {id} is {status}, expected running")]
    NotRunning { id: Uuid, status: JobStatus },
    #[error("lease on task {0} was lost to another claim")]
    LeaseLost(Uuid),
    #[error("corrupt task row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<JobInfo, QueueError>;

    /// `None` for unknown ids and for terminal jobs past their retention.
    async fn status(&self, id: Uuid) -> Result<Option<JobInfo>, QueueError>;

    /// Claims the oldest ready job of `queue` and marks it running.
    ///
    /// A running job whose lease expired counts as ready again, and the lost
    /// attempt consumes a retry. If its budget is already spent the job fails
    /// instead of being redelivered.
    async fn dequeue(&self, queue: &str) -> Result<Option<Delivery>, QueueError>;

    async fn complete(&self, delivery: &Delivery) -> Result<JobInfo, QueueError>;

    /// Schedules another attempt, or fails the job when the budget is spent.
    async fn retry(&self, delivery: &Delivery, error: &str) -> Result<JobInfo, QueueError>;

    /// Fails the job without consuming retries.
    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<JobInfo, QueueError>;

    /// Drops terminal jobs whose retention has elapsed. Returns how many.
    async fn purge_expired(&self) -> Result<u64, QueueError>;
}

/// Backoff and lease settings shared by the queue backends.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How long a claimed job stays invisible before it is redelivered.
    pub lease: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            lease: Duration::from_secs(65 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Retry { retried: u32, delay: Duration },
    Exhausted,
}

impl QueueOptions {
    /// Delay before retry number `retried` (1-based): `base * 2^(retried-1)`, capped.
    pub fn backoff(&self, retried: u32) -> Duration {
        let factor = 2u32.saturating_pow(retried.saturating_sub(1));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Decides what a failed attempt leads to. `max_retry = n` allows `n`
    /// retries, so the job fails on its `n + 1`-th failed attempt.
    pub fn after_failure(&self, retried: u32, max_retry: u32) -> RetryOutcome {
        if retried < max_retry {
            let retried = retried + 1;
            RetryOutcome::Retry {
                retried,
                delay: self.backoff(retried),
            }
        } else {
            RetryOutcome::Exhausted
        }
    }
}

pub(crate) const LEASE_EXPIRED: &str = "lease expired before the job was settled";

/// `t + d`, saturating at the latest representable instant.
pub(crate) fn add_duration(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|delta| t.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
