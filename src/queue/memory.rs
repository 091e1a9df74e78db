// src/queue/memory.rs

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::queue::{
    Delivery, JobInfo, JobStatus, LEASE_EXPIRED, QueueError, QueueOptions, RetryOutcome, Task,
    TaskQueue, add_duration,
};

/// Single-process queue. Jobs do not survive a restart.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    options: QueueOptions,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Entry>,
    // Enqueue order, used for FIFO among ready jobs.
    seq: u64,
}

struct Entry {
    info: JobInfo,
    payload: Vec<u8>,
    retention: Duration,
    seq: u64,
    next_attempt_at: DateTime<Utc>,
    lease_until: Option<DateTime<Utc>>,
    lease_token: Option<Uuid>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.info.status {
            JobStatus::Queued | JobStatus::Retrying => self.next_attempt_at <= now,
            JobStatus::Running => self.lease_until.is_some_and(|lease| lease <= now),
            JobStatus::Succeeded | JobStatus::Failed => false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// The job must be running under the lease of `delivery`.
    fn ensure_claimed(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.info.status != JobStatus::Running {
            return Err(QueueError::NotRunning {
                id: self.info.id,
                status: self.info.status,
            });
        }
        if self.lease_token != Some(delivery.lease) {
            return Err(QueueError::LeaseLost(self.info.id));
        }
        Ok(())
    }

    fn finish(&mut self, status: JobStatus, error: Option<&str>, now: DateTime<Utc>) {
        self.info.status = status;
        self.info.updated_at = now;
        self.info.completed_at = Some(now);
        if let Some(error) = error {
            self.info.last_error = Some(error.to_string());
        }
        self.lease_until = None;
        self.lease_token = None;
        self.expires_at = Some(add_duration(now, self.retention));
    }
}

impl MemoryQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            options,
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: Task) -> Result<JobInfo, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&task.id) {
            return Err(QueueError::Duplicate(task.id));
        }
        let now = Utc::now();
        inner.seq += 1;
        let info = JobInfo {
            id: task.id,
            queue: task.queue,
            status: JobStatus::Queued,
            retried: 0,
            max_retry: task.max_retry,
            last_error: None,
            owner: task.owner,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let entry = Entry {
            info: info.clone(),
            payload: task.payload,
            retention: task.retention,
            seq: inner.seq,
            next_attempt_at: now,
            lease_until: None,
            lease_token: None,
            expires_at: None,
        };
        inner.jobs.insert(task.id, entry);
        Ok(info)
    }

    async fn status(&self, id: Uuid) -> Result<Option<JobInfo>, QueueError> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        Ok(inner
            .jobs
            .get(&id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.info.clone()))
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Delivery>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        loop {
            let next = inner
                .jobs
                .values()
                .filter(|entry| entry.info.queue == queue && entry.is_ready(now))
                .min_by_key(|entry| entry.seq)
                .map(|entry| entry.info.id);

            let Some(id) = next else {
                return Ok(None);
            };
            let entry = inner.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;

            if entry.info.status == JobStatus::Running {
                // The previous claim timed out.
                if entry.info.retried >= entry.info.max_retry {
                    entry.finish(JobStatus::Failed, Some(LEASE_EXPIRED), now);
                    continue;
                }
                entry.info.retried += 1;
                entry.info.last_error = Some(LEASE_EXPIRED.to_string());
            }

            let lease = Uuid::new_v4();
            entry.info.status = JobStatus::Running;
            entry.info.updated_at = now;
            entry.lease_until = Some(add_duration(now, self.options.lease));
            entry.lease_token = Some(lease);

            return Ok(Some(Delivery {
                id,
                queue: entry.info.queue.clone(),
                payload: entry.payload.clone(),
                retried: entry.info.retried,
                lease,
            }));
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<JobInfo, QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(&delivery.id)
            .ok_or(QueueError::NotFound(delivery.id))?;
        entry.ensure_claimed(delivery)?;
        entry.finish(JobStatus::Succeeded, None, Utc::now());
        Ok(entry.info.clone())
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> Result<JobInfo, QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(&delivery.id)
            .ok_or(QueueError::NotFound(delivery.id))?;
        entry.ensure_claimed(delivery)?;
        let now = Utc::now();

        match self
            .options
            .after_failure(entry.info.retried, entry.info.max_retry)
        {
            RetryOutcome::Retry { retried, delay } => {
                entry.info.status = JobStatus::Retrying;
                entry.info.retried = retried;
                entry.info.last_error = Some(error.to_string());
                entry.info.updated_at = now;
                entry.next_attempt_at = add_duration(now, delay);
                entry.lease_until = None;
                entry.lease_token = None;
            }
            RetryOutcome::Exhausted => entry.finish(JobStatus::Failed, Some(error), now),
        }
        Ok(entry.info.clone())
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<JobInfo, QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(&delivery.id)
            .ok_or(QueueError::NotFound(delivery.id))?;
        entry.ensure_claimed(delivery)?;
        entry.finish(JobStatus::Failed, Some(error), Utc::now());
        Ok(entry.info.clone())
    }

    async fn purge_expired(&self) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, entry| !entry.is_expired(now));
        Ok((before - inner.jobs.len()) as u64)
    }
}
