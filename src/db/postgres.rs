// src/db/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, types::Json};
use uuid::Uuid;

use crate::{
    db::{
        HistoryRepository, ReportRepository, TeacherTestRepository, TestRepository,
        UserRepository,
    },
    error::AppError,
    models::{
        history::HistoryRecord,
        report::{DisciplineSummary, NewReport, ReportDetails, ReportRecord, TestSnapshot},
        teacher_test::{NewTeacherTest, TeacherTest},
        test_record::{NewTestRecord, ScoreSheet, TestBlock, TestRecord, TestStatus},
        user::{NewUser, User},
    },
};

/// Postgres-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Helper struct for reading 'roadmap_tests' rows.
#[derive(FromRow)]
struct TestRow {
    id: Uuid,
    history_id: Uuid,
    status: String,
    details: Json<Value>,
    results: Option<Json<ScoreSheet>>,
    is_first: bool,
    created_at: DateTime<Utc>,
    passed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TestRow> for TestRecord {
    type Error = AppError;

    fn try_from(row: TestRow) -> Result<Self, Self::Error> {
        let status = TestStatus::parse(&row.status).ok_or_else(|| {
            AppError::InternalServerError(format!(
                "Unknown status '{}' on test {}",
                row.status, row.id
            ))
        })?;
        Ok(TestRecord {
            id: row.id,
            history_id: row.history_id,
            status,
            details: row.details.0,
            results: row.results.map(|r| r.0),
            is_first: row.is_first,
            created_at: row.created_at,
            passed_at: row.passed_at,
        })
    }
}

#[derive(FromRow)]
struct HistoryRow {
    id: Uuid,
    user_id: Uuid,
    discipline_id: i32,
    blocks: Json<ScoreSheet>,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for HistoryRecord {
    fn from(row: HistoryRow) -> Self {
        HistoryRecord {
            id: row.id,
            user_id: row.user_id,
            discipline_id: row.discipline_id,
            blocks: row.blocks.0,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReportRow {
    id: Uuid,
    user_id: Uuid,
    discipline_title: String,
    discipline_id: i32,
    group: String,
    details: Json<ReportDetails>,
    created_at: DateTime<Utc>,
}

impl From<ReportRow> for ReportRecord {
    fn from(row: ReportRow) -> Self {
        ReportRecord {
            id: row.id,
            user_id: row.user_id,
            discipline_title: row.discipline_title,
            discipline_id: row.discipline_id,
            group: row.group,
            details: row.details.0,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TeacherTestRow {
    id: Uuid,
    discipline_id: i32,
    details: Json<Vec<TestBlock>>,
    answers: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<TeacherTestRow> for TeacherTest {
    fn from(row: TeacherTestRow) -> Self {
        TeacherTest {
            id: row.id,
            discipline_id: row.discipline_id,
            details: row.details.0,
            answers: row.answers.0,
            created_at: row.created_at,
        }
    }
}

const TEST_COLUMNS: &str =
    "id, history_id, status, details, results, is_first, created_at, passed_at";
const HISTORY_COLUMNS: &str = "id, user_id, discipline_id, blocks, created_at";
const REPORT_COLUMNS: &str =
    r#"id, user_id, discipline_title, discipline_id, "group", details, created_at"#;
const TEACHER_TEST_COLUMNS: &str = "id, discipline_id, details, answers, created_at";
const USER_COLUMNS: &str = r#"id, login, password, role, "group", created_at"#;

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<Uuid, AppError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO users (login, password, role, "group")
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&user.login)
        .bind(&user.password)
        .bind(&user.role)
        .bind(&user.group)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return AppError::Conflict(format!("Login '{}' already exists", user.login));
                }
            }
            tracing::error!("Failed to create user: {:?}", e);
            AppError::from(e)
        })?;

        Ok(id)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE login = $1",
            USER_COLUMNS
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[async_trait]
impl TestRepository for PgStore {
    async fn create_test(&self, test: NewTestRecord) -> Result<bool, AppError> {
        // A redelivered job carries the same id: the conflict makes the insert a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO roadmap_tests (id, history_id, status, details, is_first)
            VALUES ($1, $2, 'pending', $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(test.id)
        .bind(test.history_id)
        .bind(Json(&test.details))
        .bind(test.is_first)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert test {}: {:?}", test.id, e);
            AppError::from(e)
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn test(&self, id: Uuid) -> Result<Option<TestRecord>, AppError> {
        let row = sqlx::query_as::<_, TestRow>(&format!(
            "SELECT {} FROM roadmap_tests WHERE id = $1",
            TEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TestRecord::try_from).transpose()
    }

    async fn mark_passed(
        &self,
        id: Uuid,
        results: &ScoreSheet,
        passed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE roadmap_tests
            SET status = 'passed', results = $2, passed_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Json(results))
        .bind(passed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pass_first_test(
        &self,
        id: Uuid,
        history_id: Uuid,
        results: &ScoreSheet,
        passed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let passed = sqlx::query(
            r#"
            UPDATE roadmap_tests
            SET status = 'passed', results = $2, passed_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(Json(results))
        .bind(passed_at)
        .execute(&mut *tx)
        .await?;

        if passed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let replaced = sqlx::query("UPDATE roadmap_histories SET blocks = $2 WHERE id = $1")
            .bind(history_id)
            .bind(Json(results))
            .execute(&mut *tx)
            .await?;

        if replaced.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound("History not found".to_string()));
        }

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit diagnostic result for test {}: {:?}", id, e);
            AppError::from(e)
        })?;
        Ok(true)
    }

    async fn pending_tests(&self, history_id: Uuid) -> Result<Vec<TestRecord>, AppError> {
        let rows = sqlx::query_as::<_, TestRow>(&format!(
            "SELECT {} FROM roadmap_tests WHERE history_id = $1 AND status = 'pending' ORDER BY created_at",
            TEST_COLUMNS
        ))
        .bind(history_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TestRecord::try_from).collect()
    }

    async fn passed_results(&self, history_id: Uuid) -> Result<Vec<TestSnapshot>, AppError> {
        let rows: Vec<(Option<Json<ScoreSheet>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT results, passed_at
            FROM roadmap_tests
            WHERE history_id = $1 AND status = 'passed'
            ORDER BY passed_at
            "#,
        )
        .bind(history_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(results, passed_at)| TestSnapshot {
                results: results.map(|r| r.0).unwrap_or_default(),
                passed_at,
            })
            .collect())
    }
}

#[async_trait]
impl HistoryRepository for PgStore {
    async fn history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<Option<HistoryRecord>, AppError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM roadmap_histories WHERE user_id = $1 AND discipline_id = $2",
            HISTORY_COLUMNS
        ))
        .bind(user_id)
        .bind(discipline_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HistoryRecord::from))
    }

    async fn history_by_id(&self, id: Uuid) -> Result<Option<HistoryRecord>, AppError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {} FROM roadmap_histories WHERE id = $1",
            HISTORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HistoryRecord::from))
    }

    async fn ensure_history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<HistoryRecord, AppError> {
        sqlx::query(
            r#"
            INSERT INTO roadmap_histories (user_id, discipline_id, blocks)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, discipline_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(discipline_id)
        .bind(Json(ScoreSheet::empty()))
        .execute(&self.pool)
        .await?;

        self.history(user_id, discipline_id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("History vanished after insert".into()))
    }
}

#[async_trait]
impl ReportRepository for PgStore {
    async fn upsert_report(&self, report: NewReport) -> Result<ReportRecord, AppError> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            r#"
            INSERT INTO reports (user_id, discipline_title, discipline_id, "group", details)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, discipline_id) DO UPDATE SET details = EXCLUDED.details
            RETURNING {}
            "#,
            REPORT_COLUMNS
        ))
        .bind(report.user_id)
        .bind(&report.discipline_title)
        .bind(report.discipline_id)
        .bind(&report.group)
        .bind(Json(&report.details))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert report: {:?}", e);
            AppError::from(e)
        })?;

        Ok(row.into())
    }

    async fn report(&self, id: Uuid) -> Result<Option<ReportRecord>, AppError> {
        let row = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {} FROM reports WHERE id = $1",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ReportRecord::from))
    }

    async fn reports_by_discipline(
        &self,
        discipline_id: i32,
    ) -> Result<Vec<ReportRecord>, AppError> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            "SELECT {} FROM reports WHERE discipline_id = $1 ORDER BY created_at",
            REPORT_COLUMNS
        ))
        .bind(discipline_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ReportRecord::from).collect())
    }

    async fn report_disciplines(&self) -> Result<Vec<DisciplineSummary>, AppError> {
        let rows: Vec<(String, i32)> = sqlx::query_as(
            r#"
            SELECT DISTINCT discipline_title, discipline_id
            FROM reports
            ORDER BY discipline_title, discipline_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, id)| DisciplineSummary { name, id })
            .collect())
    }

    async fn report_groups(&self, discipline_title: &str) -> Result<Vec<String>, AppError> {
        let groups: Vec<String> = sqlx::query_scalar(
            r#"SELECT DISTINCT "group" FROM reports WHERE discipline_title = $1 ORDER BY "group""#,
        )
        .bind(discipline_title)
        .fetch_all(&self.pool)
        .await?;

        Ok(groups)
    }

    async fn reports_by_group_and_discipline(
        &self,
        discipline_title: &str,
        group: &str,
    ) -> Result<Vec<ReportRecord>, AppError> {
        let rows = sqlx::query_as::<_, ReportRow>(&format!(
            r#"SELECT {} FROM reports WHERE discipline_title = $1 AND "group" = $2 ORDER BY created_at"#,
            REPORT_COLUMNS
        ))
        .bind(discipline_title)
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ReportRecord::from).collect())
    }
}

#[async_trait]
impl TeacherTestRepository for PgStore {
    async fn create_teacher_test(&self, test: NewTeacherTest) -> Result<Uuid, AppError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO teacher_tests (discipline_id, details, answers)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(test.discipline_id)
        .bind(Json(&test.details))
        .bind(Json(&test.answers))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_teacher_test(
        &self,
        id: Uuid,
        details: Vec<TestBlock>,
        answers: Vec<String>,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE teacher_tests SET details = $2, answers = $3 WHERE id = $1")
                .bind(id)
                .bind(Json(&details))
                .bind(Json(&answers))
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_teacher_test(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM teacher_tests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn teacher_tests(&self, discipline_id: i32) -> Result<Vec<TeacherTest>, AppError> {
        let rows = sqlx::query_as::<_, TeacherTestRow>(&format!(
            "SELECT {} FROM teacher_tests WHERE discipline_id = $1 ORDER BY created_at",
            TEACHER_TEST_COLUMNS
        ))
        .bind(discipline_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TeacherTest::from).collect())
    }

    async fn teacher_test(&self, id: Uuid) -> Result<Option<TeacherTest>, AppError> {
        let row = sqlx::query_as::<_, TeacherTestRow>(&format!(
            "SELECT {} FROM teacher_tests WHERE id = $1",
            TEACHER_TEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TeacherTest::from))
    }
}
