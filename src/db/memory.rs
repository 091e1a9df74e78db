// src/db/memory.rs

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    db::{
        HistoryRepository, ReportRepository, TeacherTestRepository, TestRepository,
        UserRepository,
    },
    error::AppError,
    models::{
        history::HistoryRecord,
        report::{DisciplineSummary, NewReport, ReportRecord, TestSnapshot},
        teacher_test::{NewTeacherTest, TeacherTest},
        test_record::{NewTestRecord, ScoreSheet, TestBlock, TestRecord, TestStatus},
        user::{NewUser, User},
    },
};

/// In-process store. Each table is a map behind its own lock, so every
/// operation below is atomic with respect to the others on the same table.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    tests: RwLock<HashMap<Uuid, TestRecord>>,
    histories: RwLock<HashMap<Uuid, HistoryRecord>>,
    reports: RwLock<HashMap<Uuid, ReportRecord>>,
    teacher_tests: RwLock<HashMap<Uuid, TeacherTest>>,
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<Uuid, AppError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.login == user.login) {
            return Err(AppError::Conflict(format!(
                "Login '{}' already exists",
                user.login
            )));
        }
        let id = Uuid::new_v4();
        users.insert(
            id,
            User {
                id,
                login: user.login,
                password: user.password,
                role: user.role,
                group: user.group,
                created_at: Some(Utc::now()),
            },
        );
        Ok(id)
    }

    async fn user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.login == login)
            .cloned())
    }
}

#[async_trait]
impl TestRepository for MemoryStore {
    async fn create_test(&self, test: NewTestRecord) -> Result<bool, AppError> {
        let mut tests = self.tests.write().await;
        if tests.contains_key(&test.id) {
            return Ok(false);
        }
        tests.insert(
            test.id,
            TestRecord {
                id: test.id,
                history_id: test.history_id,
                status: TestStatus::Pending,
                details: test.details,
                results: None,
                is_first: test.is_first,
                created_at: Utc::now(),
                passed_at: None,
            },
        );
        Ok(true)
    }

    async fn test(&self, id: Uuid) -> Result<Option<TestRecord>, AppError> {
        Ok(self.tests.read().await.get(&id).cloned())
    }

    async fn mark_passed(
        &self,
        id: Uuid,
        results: &ScoreSheet,
        passed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tests = self.tests.write().await;
        match tests.get_mut(&id) {
            Some(test) if test.status == TestStatus::Pending => {
                test.status = TestStatus::Passed;
                test.results = Some(results.clone());
                test.passed_at = Some(passed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pass_first_test(
        &self,
        id: Uuid,
        history_id: Uuid,
        results: &ScoreSheet,
        passed_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // Lock order: tests, then histories.
        let mut tests = self.tests.write().await;
        let mut histories = self.histories.write().await;

        let Some(test) = tests
            .get_mut(&id)
            .filter(|t| t.status == TestStatus::Pending)
        else {
            return Ok(false);
        };
        let history = histories
            .get_mut(&history_id)
            .ok_or_else(|| AppError::NotFound("History not found".to_string()))?;

        history.blocks = results.clone();
        test.status = TestStatus::Passed;
        test.results = Some(results.clone());
        test.passed_at = Some(passed_at);
        Ok(true)
    }

    async fn pending_tests(&self, history_id: Uuid) -> Result<Vec<TestRecord>, AppError> {
        let mut pending: Vec<TestRecord> = self
            .tests
            .read()
            .await
            .values()
            .filter(|t| t.history_id == history_id && t.status == TestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        Ok(pending)
    }

    async fn passed_results(&self, history_id: Uuid) -> Result<Vec<TestSnapshot>, AppError> {
        let tests = self.tests.read().await;
        let mut passed: Vec<&TestRecord> = tests
            .values()
            .filter(|t| t.history_id == history_id && t.status == TestStatus::Passed)
            .collect();
        passed.sort_by_key(|t| t.passed_at);
        Ok(passed
            .into_iter()
            .map(|t| TestSnapshot {
                results: t.results.clone().unwrap_or_default(),
                passed_at: t.passed_at,
            })
            .collect())
    }
}

#[async_trait]
impl HistoryRepository for MemoryStore {
    async fn history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<Option<HistoryRecord>, AppError> {
        Ok(self
            .histories
            .read()
            .await
            .values()
            .find(|h| h.user_id == user_id && h.discipline_id == discipline_id)
            .cloned())
    }

    async fn history_by_id(&self, id: Uuid) -> Result<Option<HistoryRecord>, AppError> {
        Ok(self.histories.read().await.get(&id).cloned())
    }

    async fn ensure_history(
        &self,
        user_id: Uuid,
        discipline_id: i32,
    ) -> Result<HistoryRecord, AppError> {
        let mut histories = self.histories.write().await;
        if let Some(existing) = histories
            .values()
            .find(|h| h.user_id == user_id && h.discipline_id == discipline_id)
        {
            return Ok(existing.clone());
        }
        let history = HistoryRecord {
            id: Uuid::new_v4(),
            user_id,
            discipline_id,
            blocks: ScoreSheet::empty(),
            created_at: Utc::now(),
        };
        histories.insert(history.id, history.clone());
        Ok(history)
    }
}

#[async_trait]
impl ReportRepository for MemoryStore {
    async fn upsert_report(&self, report: NewReport) -> Result<ReportRecord, AppError> {
        let mut reports = self.reports.write().await;
        if let Some(existing) = reports
            .values_mut()
            .find(|r| r.user_id == report.user_id && r.discipline_id == report.discipline_id)
        {
            existing.details = report.details;
            return Ok(existing.clone());
        }
        let record = ReportRecord {
            id: Uuid::new_v4(),
            user_id: report.user_id,
            discipline_title: report.discipline_title,
            discipline_id: report.discipline_id,
            group: report.group,
            details: report.details,
            created_at: Utc::now(),
        };
        reports.insert(record.id, record.clone());
        Ok(record)
    }

    async fn report(&self, id: Uuid) -> Result<Option<ReportRecord>, AppError> {
        Ok(self.reports.read().await.get(&id).cloned())
    }

    async fn reports_by_discipline(
        &self,
        discipline_id: i32,
    ) -> Result<Vec<ReportRecord>, AppError> {
        let reports = self.reports.read().await;
        Ok(sorted_reports(
            reports.values().filter(|r| r.discipline_id == discipline_id),
        ))
    }

    async fn report_disciplines(&self) -> Result<Vec<DisciplineSummary>, AppError> {
        let reports = self.reports.read().await;
        let distinct: BTreeSet<(String, i32)> = reports
            .values()
            .map(|r| (r.discipline_title.clone(), r.discipline_id))
            .collect();
        Ok(distinct
            .into_iter()
            .map(|(name, id)| DisciplineSummary { name, id })
            .collect())
    }

    async fn report_groups(&self, discipline_title: &str) -> Result<Vec<String>, AppError> {
        let reports = self.reports.read().await;
        let groups: BTreeSet<String> = reports
            .values()
            .filter(|r| r.discipline_title == discipline_title)
            .map(|r| r.group.clone())
            .collect();
        Ok(groups.into_iter().collect())
    }

    async fn reports_by_group_and_discipline(
        &self,
        discipline_title: &str,
        group: &str,
    ) -> Result<Vec<ReportRecord>, AppError> {
        let reports = self.reports.read().await;
        Ok(sorted_reports(reports.values().filter(|r| {
            r.discipline_title == discipline_title && r.group == group
        })))
    }
}

fn sorted_reports<'a>(reports: impl Iterator<Item = &'a ReportRecord>) -> Vec<ReportRecord> {
    let mut reports: Vec<ReportRecord> = reports.cloned().collect();
    reports.sort_by_key(|r| r.created_at);
    reports
}

#[async_trait]
impl TeacherTestRepository for MemoryStore {
    async fn create_teacher_test(&self, test: NewTeacherTest) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        self.teacher_tests.write().await.insert(
            id,
            TeacherTest {
                id,
                discipline_id: test.discipline_id,
                details: test.details,
                answers: test.answers,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn update_teacher_test(
        &self,
        id: Uuid,
        details: Vec<TestBlock>,
        answers: Vec<String>,
    ) -> Result<bool, AppError> {
        let mut tests = self.teacher_tests.write().await;
        match tests.get_mut(&id) {
            Some(test) => {
                test.details = details;
                test.answers = answers;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_teacher_test(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.teacher_tests.write().await.remove(&id).is_some())
    }

    async fn teacher_tests(&self, discipline_id: i32) -> Result<Vec<TeacherTest>, AppError> {
        let mut tests: Vec<TeacherTest> = self
            .teacher_tests
            .read()
            .await
            .values()
            .filter(|t| t.discipline_id == discipline_id)
            .cloned()
            .collect();
        tests.sort_by_key(|t| t.created_at);
        Ok(tests)
    }

    async fn teacher_test(&self, id: Uuid) -> Result<Option<TeacherTest>, AppError> {
        Ok(self.teacher_tests.read().await.get(&id).cloned())
    }
}
