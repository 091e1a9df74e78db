// src/db/mod.rs

//! Persistence seams.
//!
//! Handlers, services and workers only see these traits. `PgStore` backs them
//! with Postgres; `MemoryStore` keeps everything in process for tests and local
//! runs without a database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        history::HistoryRecord,
        report::{DisciplineSummary, NewReport, ReportRecord, TestSnapshot},
        teacher_test::{NewTeacherTest, TeacherTest},
        test_record::{NewTestRecord, ScoreSheet, TestBlock, TestRecord},
        user::{NewUser, User},
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the login is taken.
    async fn create_user(&self, user: NewUser) -> Result<Uuid, AppError>;
    async fn user(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn user_by_login(&self, login: &str) -> Result<Option<User>, AppError>;
}

#[async_trait]
pub trait TestRepository: Send + Sync {
    /// Inserts a pending test. Returns `false` (and changes nothing) when a
    /// test with the same id already exists.
    async fn create_test(&self, test: NewTestRecord) -> Result<bool, AppError>;

    async fn test(&self, id: Uuid) -> Result<Option<TestRecord>, AppError>;

    /// Moves a pending test to passed. Returns `false` if it was not pending.
    async fn mark_passed(
        &self,
        id: Uuid,
        results: &ScoreSheet,
        passed_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Marks a pending diagnostic test passed and replaces the blocks of
    /// `history_id` with `results`, as one write. Returns `false` if the test
    /// was not pending. A missing history is `NotFound` and changes nothing.
    async fn pass_first_test(
        &self,
        id: Uuid,
        history_id: Uuid,
        results: &ScoreSheet,
        passed_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Tests of a history that are still waiting to be taken, oldest first.
    async fn pending_tests(&self, history_id: Uuid) -> Result<Vec<TestRecord>, AppError>;

    /// Results of the passed tests of a history, in passing order.
    async fn passed_results(&self, history_id: Uuid) -> Result<Vec<TestSnapshot>, AppError>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<Option<HistoryRecord>, AppError>;

    async fn history_by_id(&self, id: Uuid) -> Result<Option<HistoryRecord>, AppError>;

    /// Get-or-create. Never produces two rows for the same (user, discipline).
    async fn ensure_history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<HistoryRecord, AppError>;
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Inserts, or overwrites `details` of the existing (user, discipline) row.
    async fn upsert_report(&self, report: NewReport) -> Result<ReportRecord, AppError>;
    async fn report(&self, id: Uuid) -> Result<Option<ReportRecord>, AppError>;
    async fn reports_by_discipline(&self, discipline_id: i32)
    -> Result<Vec<ReportRecord>, AppError>;
    async fn report_disciplines(&self) -> Result<Vec<DisciplineSummary>, AppError>;
    async fn report_groups(&self, discipline_title: &str) -> Result<Vec<String>, AppError>;
    async fn reports_by_group_and_discipline(
        &self,
        discipline_title: &str,
        group: &str,
    ) -> Result<Vec<ReportRecord>, AppError>;
}

#[async_trait]
pub trait TeacherTestRepository: Send + Sync {
    async fn create_teacher_test(&self, test: NewTeacherTest) -> Result<Uuid, AppError>;
    /// Returns `false` if no test has this id.
    async fn update_teacher_test(
        &self,
        id: Uuid,
        details: Vec<TestBlock>,
        answers: Vec<String>,
    ) -> Result<bool, AppError>;
    /// Returns `false` if no test has this id.
    async fn delete_teacher_test(&self, id: Uuid) -> Result<bool, AppError>;
    async fn teacher_tests(&self, discipline_id: i32) -> Result<Vec<TeacherTest>, AppError>;
    async fn teacher_test(&self, id: Uuid) -> Result<Option<TeacherTest>, AppError>;
}

/// The set of stores the application is wired with.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub tests: Arc<dyn TestRepository>,
    pub histories: Arc<dyn HistoryRepository>,
    pub reports: Arc<dyn ReportRepository>,
    pub teacher_tests: Arc<dyn TeacherTestRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            users: store.clone(),
            tests: store.clone(),
            histories: store.clone(),
            reports: store.clone(),
            teacher_tests: store,
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::default());
        Self {
            users: store.clone(),
            tests: store.clone(),
            histories: store.clone(),
            reports: store.clone(),
            teacher_tests: store,
        }
    }
}
