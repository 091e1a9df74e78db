// src/worker.rs

//! Background consumers of the `generate_test` queue.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

use crate::{
    clients::llm::{GenerateRequest, LlmService, normalize_base_url},
    db::TestRepository,
    models::{
        job::{GenerateTestPayload, QUEUE_GENERATE_TEST},
        test_record::{NewTestRecord, TestDetails},
    },
    queue::{QueueError, TaskQueue},
};

/// How a failed job should be settled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    /// Retrying cannot help; the job fails immediately.
    #[error("{0}")]
    Permanent(String),
    /// The queue schedules another attempt while the budget lasts.
    #[error("{0}")]
    Retryable(String),
}

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    tests: Arc<dyn TestRepository>,
    llm: Arc<dyn LlmService>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        tests: Arc<dyn TestRepository>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self { queue, tests, llm }
    }

    /// Claims and settles one job. Returns `false` if none was ready.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(delivery) = self.queue.dequeue(QUEUE_GENERATE_TEST).await? else {
            return Ok(false);
        };
        let attempt = delivery.retried + 1;
        tracing::debug!("Job {} picked up (attempt {})", delivery.id, attempt);

        let settled = match self.handle_generate_test(&delivery.payload).await {
            Ok(created) => self.queue.complete(&delivery).await.map(|_| {
                if created {
                    tracing::info!("Job {} succeeded on attempt {}", delivery.id, attempt);
                } else {
                    tracing::info!("Job {} redelivered, test already stored", delivery.id);
                }
            }),
            Err(JobError::Permanent(reason)) => {
                tracing::error!("Job {} failed permanently: {}", delivery.id, reason);
                self.queue.fail(&delivery, &reason).await.map(|_| ())
            }
            Err(JobError::Retryable(reason)) => {
                self.queue.retry(&delivery, &reason).await.map(|info| {
                    tracing::warn!(
                        "Job {} attempt {} failed: {} (now {}, {}/{} retries used)",
                        delivery.id,
                        attempt,
                        reason,
                        info.status,
                        info.retried,
                        info.max_retry
                    );
                })
            }
        };

        match settled {
            // The lease ran out while this attempt was in flight; the newer claim settles it.
            Err(QueueError::LeaseLost(id)) => {
                tracing::warn!("Job {} was reclaimed before attempt {} settled", id, attempt);
                Ok(true)
            }
            other => other.map(|_| true),
        }
    }

    /// Generates and stores the test described by a job payload.
    /// Returns `false` when the test already existed.
    pub async fn handle_generate_test(&self, payload: &[u8]) -> Result<bool, JobError> {
        let payload = GenerateTestPayload::from_bytes(payload)
            .map_err(|e| JobError::Permanent(format!("Malformed job payload: {}", e)))?;
        let test_id = Uuid::parse_str(&payload.test_id).map_err(|e| {
            JobError::Permanent(format!("Invalid test id '{}': {}", payload.test_id, e))
        })?;
        let base_url = normalize_base_url(&payload.llm_service_url).map_err(|e| {
            JobError::Permanent(format!(
                "Invalid service url '{}': {}",
                payload.llm_service_url, e
            ))
        })?;

        let existing = self
            .tests
            .test(test_id)
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))?;
        if existing.is_some() {
            return Ok(false);
        }

        let request = GenerateRequest {
            test_id,
            themes: payload.themes,
        };
        let details = self
            .llm
            .generate_test(&base_url, &request)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    JobError::Retryable(e.to_string())
                } else {
                    JobError::Permanent(e.to_string())
                }
            })?;
        TestDetails::from_value(&details).map_err(|e| {
            JobError::Retryable(format!("Generator returned a malformed test: {}", e))
        })?;

        self.tests
            .create_test(NewTestRecord {
                id: test_id,
                history_id: payload.history_id,
                details,
                is_first: false,
            })
            .await
            .map_err(|e| JobError::Retryable(e.to_string()))
    }
}

/// A fixed set of workers plus a janitor purging expired jobs.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn spawn(worker: Worker, concurrency: usize, poll_interval: Duration) -> Self {
        let (shutdown, rx) = watch::channel(false);

        let mut handles: Vec<JoinHandle<()>> = (0..concurrency.max(1))
            .map(|index| {
                tokio::spawn(run_worker(index, worker.clone(), poll_interval, rx.clone()))
            })
            .collect();
        handles.push(tokio::spawn(run_janitor(
            worker.queue.clone(),
            poll_interval,
            rx,
        )));

        tracing::info!("Worker pool started with {} workers", concurrency.max(1));
        Self { handles, shutdown }
    }

    /// Stops polling and waits for in-flight jobs to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task panicked: {}", e);
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

/// Sleeps for `poll_interval`. Returns `true` if the pool is shutting down.
async fn idle(poll_interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn run_worker(
    index: usize,
    worker: Worker,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match worker.process_next().await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => tracing::error!("Worker {} queue error: {}", index, e),
        }
        if idle(poll_interval, &mut shutdown).await {
            break;
        }
    }
    tracing::debug!("Worker {} exited", index);
}

async fn run_janitor(
    queue: Arc<dyn TaskQueue>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        match queue.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!("Purged {} expired jobs", purged),
            Err(e) => tracing::error!("Failed to purge expired jobs: {}", e),
        }
        if idle(poll_interval, &mut shutdown).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::{Value, json};
    use url::Url;

    use super::*;
    use crate::{
        clients::llm::LlmError,
        db::MemoryStore,
        queue::{JobStatus, MemoryQueue, QueueOptions, Task},
    };

    struct FakeGenerator {
        failing: bool,
        calls: AtomicUsize,
    }

    impl FakeGenerator {
        fn new(failing: bool) -> Arc<Self> {
            Arc::new(Self {
                failing,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmService for FakeGenerator {
        async fn generate_test(
            &self,
            _base_url: &Url,
            _request: &GenerateRequest,
        ) -> Result<Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(LlmError::Status {
                    url: "http://llm/api/test-workflow".to_string(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(json!({"test": [{"title": "T1", "questions": [{"text": "q1", "options": []}]}]}))
        }

        async fn generate_first_test(&self, _request: &GenerateRequest) -> Result<Value, LlmError> {
            Ok(json!({"test": []}))
        }

        async fn correct_answers(&self, _test_id: Uuid) -> Result<Vec<String>, LlmError> {
            Ok(Vec::new())
        }

        async fn set_answers(&self, _test_id: Uuid, _answers: &[String]) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn instant_queue() -> Arc<MemoryQueue> {
        Arc::new(MemoryQueue::new(QueueOptions {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            lease: Duration::from_secs(60),
        }))
    }

    fn payload(test_id: Uuid) -> Vec<u8> {
        GenerateTestPayload {
            test_id: test_id.to_string(),
            themes: vec!["Graphs".to_string()],
            user_id: Uuid::new_v4().to_string(),
            discipline_id: 1,
            history_id: Uuid::new_v4(),
            llm_service_url: "http://llm".to_string(),
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn test_redelivery_stores_one_test() {
        let queue = instant_queue();
        let store = Arc::new(MemoryStore::default());
        let llm = FakeGenerator::new(false);
        let worker = Worker::new(queue.clone(), store.clone(), llm.clone());

        let test_id = Uuid::new_v4();
        assert_eq!(worker.handle_generate_test(&payload(test_id)).await, Ok(true));
        assert_eq!(worker.handle_generate_test(&payload(test_id)).await, Ok(false));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

        let record = store.test(test_id).await.unwrap().unwrap();
        assert!(!record.is_first);
    }

    #[tokio::test]
    async fn test_job_completes() {
        let queue = instant_queue();
        let store = Arc::new(MemoryStore::default());
        let worker = Worker::new(queue.clone(), store.clone(), FakeGenerator::new(false));

        let test_id = Uuid::new_v4();
        let job = queue
            .enqueue(Task::new(QUEUE_GENERATE_TEST, payload(test_id)))
            .await
            .unwrap();
        assert!(worker.process_next().await.unwrap());
        assert!(!worker.process_next().await.unwrap());

        let info = queue.status(job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Succeeded);
        assert!(store.test(test_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failing_generator_spends_all_retries() {
        let queue = instant_queue();
        let store = Arc::new(MemoryStore::default());
        let llm = FakeGenerator::new(true);
        let worker = Worker::new(queue.clone(), store.clone(), llm.clone());

        let job = queue
            .enqueue(Task::new(QUEUE_GENERATE_TEST, payload(Uuid::new_v4())).max_retry(3))
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(worker.process_next().await.unwrap());
            let info = queue.status(job.id).await.unwrap().unwrap();
            assert_eq!(info.status, JobStatus::Retrying);
        }
        assert!(worker.process_next().await.unwrap());
        assert!(!worker.process_next().await.unwrap());

        let info = queue.status(job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.retried, 3);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_malformed_payload_fails_without_retry() {
        let queue = instant_queue();
        let worker = Worker::new(
            queue.clone(),
            Arc::new(MemoryStore::default()),
            FakeGenerator::new(false),
        );

        let bad_json = queue
            .enqueue(Task::new(QUEUE_GENERATE_TEST, b"{not json".to_vec()))
            .await
            .unwrap();
        assert!(worker.process_next().await.unwrap());
        let info = queue.status(bad_json.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.retried, 0);

        let mut bad_id: Value = serde_json::from_slice(&payload(Uuid::new_v4())).unwrap();
        bad_id["test_id"] = json!("not-a-uuid");
        let err = worker
            .handle_generate_test(&serde_json::to_vec(&bad_id).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_hung_claim_is_reclaimed_and_counted() {
        let queue = Arc::new(MemoryQueue::new(QueueOptions {
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            lease: Duration::ZERO,
        }));
        let store = Arc::new(MemoryStore::default());
        let worker = Worker::new(queue.clone(), store.clone(), FakeGenerator::new(false));

        let test_id = Uuid::new_v4();
        let job = queue
            .enqueue(Task::new(QUEUE_GENERATE_TEST, payload(test_id)))
            .await
            .unwrap();

        // A claim that never settles, as from a crashed worker.
        let lost = queue.dequeue(QUEUE_GENERATE_TEST).await.unwrap().unwrap();
        assert!(worker.process_next().await.unwrap());

        let info = queue.status(job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Succeeded);
        assert_eq!(info.retried, 1);
        assert!(store.test(test_id).await.unwrap().is_some());
        assert!(matches!(
            queue.complete(&lost).await.unwrap_err(),
            QueueError::NotRunning { .. }
        ));
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let queue = instant_queue();
        let store = Arc::new(MemoryStore::default());
        let worker = Worker::new(queue.clone(), store.clone(), FakeGenerator::new(false));

        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue
                .enqueue(Task::new(QUEUE_GENERATE_TEST, payload(*id)))
                .await
                .unwrap();
        }

        let pool = WorkerPool::spawn(worker, 3, Duration::from_millis(10));
        for _ in 0..200 {
            let mut stored = 0;
            for id in &ids {
                if store.test(*id).await.unwrap().is_some() {
                    stored += 1;
                }
            }
            if stored == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pool.shutdown().await;

        for id in &ids {
            assert!(store.test(*id).await.unwrap().is_some());
        }
    }
}
