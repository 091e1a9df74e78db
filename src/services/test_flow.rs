// src/services/test_flow.rs

//! Creating quizzes, scoring them and tracking generation jobs.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

use crate::{
    clients::llm::{GenerateRequest, LlmService},
    config::Config,
    db::Repositories,
    error::AppError,
    models::{
        history::{HistoryRecord, HistoryView},
        job::{GenerateTestPayload, QUEUE_GENERATE_TEST},
        report::TestSnapshot,
        teacher_test::{PublicTeacherTest, TeacherTest},
        test_record::{NewTestRecord, ScoreSheet, TestDetails, TestStatus},
    },
    queue::{JobInfo, Task, TaskQueue},
    services::scoring::score_answers,
};

/// Settings stamped into every generation job.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub llm_url: Url,
    pub max_retry: u32,
    pub retention: Duration,
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            llm_url: config.llm_url.clone(),
            max_retry: config.job_max_retry,
            retention: config.job_retention,
        }
    }
}

#[derive(Clone)]
pub struct TestService {
    repos: Repositories,
    queue: Arc<dyn TaskQueue>,
    llm: Arc<dyn LlmService>,
    jobs: JobSettings,
}

impl TestService {
    pub fn new(
        repos: Repositories,
        queue: Arc<dyn TaskQueue>,
        llm: Arc<dyn LlmService>,
        jobs: JobSettings,
    ) -> Self {
        Self {
            repos,
            queue,
            llm,
            jobs,
        }
    }

    async fn existing_history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<HistoryRecord, AppError> {
        self.repos
            .histories
            .history(user_id, discipline_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No history for discipline {}", discipline_id))
            })
    }

    /// The user's history for a discipline with the tests still to be taken.
    pub async fn history(&self, user_id: Uuid, discipline_id: i32) -> Result<HistoryView, AppError> {
        let history = self.existing_history(user_id, discipline_id).await?;
        let tests = self.repos.tests.pending_tests(history.id).await?;
        Ok(HistoryView { history, tests })
    }

    /// Results of every passed test of the user's history, in passing order.
    pub async fn passed_results(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<Vec<TestSnapshot>, AppError> {
        let history = self.existing_history(user_id, discipline_id).await?;
        self.repos.tests.passed_results(history.id).await
    }

    /// Uniform pick among the teacher tests of a discipline.
    pub async fn random_teacher_test(
        &self,
        discipline_id: i32,
    ) -> Result<Option<TeacherTest>, AppError> {
        let tests = self.repos.teacher_tests.teacher_tests(discipline_id).await?;
        let picked = tests.choose(&mut rand::thread_rng()).cloned();
        Ok(picked)
    }

    /// Creates the diagnostic test of a discipline.
    ///
    /// A teacher test is preferred when the bank has one. Otherwise the
    /// generator is called synchronously and its document is returned with the
    /// new test id under `"id"`.
    pub async fn create_first_test(
        &self,
        user_id: Uuid,
        discipline_id: i32,
        themes: Vec<String>,
    ) -> Result<Value, AppError> {
        let history = self
            .repos
            .histories
            .ensure_history(user_id, discipline_id)
            .await?;
        let test_id = Uuid::new_v4();

        if let Some(bank_test) = self.random_teacher_test(discipline_id).await? {
            self.llm.set_answers(test_id, &bank_test.answers).await?;
            self.repos
                .tests
                .create_test(NewTestRecord {
                    id: test_id,
                    history_id: history.id,
                    details: json!({ "test": bank_test.details }),
                    is_first: true,
                })
                .await?;
            tracing::info!(
                "Diagnostic test {} created from teacher test {}",
                test_id,
                bank_test.id
            );

            let public = PublicTeacherTest {
                id: test_id,
                test: bank_test.details,
            };
            return serde_json::to_value(public)
                .map_err(|e| AppError::InternalServerError(e.to_string()));
        }

        let request = GenerateRequest { test_id, themes };
        let mut details = self.llm.generate_first_test(&request).await?;
        TestDetails::from_value(&details)
            .map_err(|e| AppError::Upstream(format!("Generator returned a malformed test: {}", e)))?;

        self.repos
            .tests
            .create_test(NewTestRecord {
                id: test_id,
                history_id: history.id,
                details: details.clone(),
                is_first: true,
            })
            .await?;
        tracing::info!("Diagnostic test {} generated for user {}", test_id, user_id);

        if let Some(object) = details.as_object_mut() {
            object.insert("id".to_string(), json!(test_id));
        }
        Ok(details)
    }

    /// Queues generation of a regular test. The history must already exist.
    pub async fn create_default_test(
        &self,
        user_id: Uuid,
        discipline_id: i32,
        themes: Vec<String>,
    ) -> Result<JobInfo, AppError> {
        let history = self.existing_history(user_id, discipline_id).await?;

        let payload = GenerateTestPayload {
            test_id: Uuid::new_v4().to_string(),
            themes,
            user_id: user_id.to_string(),
            discipline_id,
            history_id: history.id,
            llm_service_url: self.jobs.llm_url.to_string(),
        };
        let bytes = payload
            .to_bytes()
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;

        let task = Task::new(QUEUE_GENERATE_TEST, bytes)
            .max_retry(self.jobs.max_retry)
            .retention(self.jobs.retention)
            .owner(user_id);
        let info = self.queue.enqueue(task).await?;

        tracing::info!(
            "Queued job {} to generate test {} for user {}",
            info.id,
            payload.test_id,
            user_id
        );
        Ok(info)
    }

    /// Status of a generation job queued by `user_id`. Other users' jobs
    /// are reported as missing.
    pub async fn task_status(&self, user_id: Uuid, task_id: Uuid) -> Result<JobInfo, AppError> {
        self.queue
            .status(task_id)
            .await?
            .filter(|info| info.is_owned_by(user_id))
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
    }

    /// Scores a pending test of `user_id` and marks it passed. A diagnostic
    /// test also replaces the blocks of its history in the same write.
    pub async fn submit_answers(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        answers: Vec<String>,
    ) -> Result<ScoreSheet, AppError> {
        let not_found = || AppError::NotFound(format!("Test {} not found", test_id));

        let test = self.repos.tests.test(test_id).await?.ok_or_else(not_found)?;
        let history = self
            .repos
            .histories
            .history_by_id(test.history_id)
            .await?
            .ok_or_else(not_found)?;
        if history.user_id != user_id {
            return Err(not_found());
        }

        if test.status == TestStatus::Passed {
            return Err(AppError::Conflict(format!("Test {} is already passed", test_id)));
        }

        let details = TestDetails::from_value(&test.details).map_err(|e| {
            AppError::InternalServerError(format!("Stored test {} is malformed: {}", test_id, e))
        })?;
        let truth = self.llm.correct_answers(test_id).await?;
        let sheet = score_answers(&details, &answers, &truth)?;

        let passed_at = Utc::now();
        let updated = if test.is_first {
            self.repos
                .tests
                .pass_first_test(test_id, history.id, &sheet, passed_at)
                .await?
        } else {
            self.repos
                .tests
                .mark_passed(test_id, &sheet, passed_at)
                .await?
        };
        if !updated {
            return Err(AppError::Conflict(format!("Test {} is already passed", test_id)));
        }

        tracing::info!("Test {} passed with {} blocks", test_id, sheet.blocks.len());
        Ok(sheet)
    }
}
