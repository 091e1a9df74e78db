// src/services/reports.rs

use uuid::Uuid;

use crate::{
    db::Repositories,
    error::AppError,
    models::report::{DisciplineSummary, NewReport, ReportDetails, ReportRecord, TimelineStat},
    services::aggregator::timeline_stats,
};

#[derive(Clone)]
pub struct ReportService {
    repos: Repositories,
}

impl ReportService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Snapshots every passed test of the user's history into their report
    /// for the discipline, replacing the previous snapshot.
    pub async fn create_report(
        &self,
        user_id: Uuid,
        discipline_id: i32,
        discipline_title: String,
    ) -> Result<ReportRecord, AppError> {
        let user = self
            .repos
            .users
            .user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let history = self
            .repos
            .histories
            .history(user_id, discipline_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("No history for discipline {}", discipline_id))
            })?;

        let report = self.repos.tests.passed_results(history.id).await?;

        self.repos
            .reports
            .upsert_report(NewReport {
                user_id,
                discipline_title,
                discipline_id,
                group: user.group,
                details: ReportDetails { report },
            })
            .await
    }

    pub async fn report(&self, id: Uuid) -> Result<ReportRecord, AppError> {
        self.repos
            .reports
            .report(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Report {} not found", id)))
    }

    pub async fn reports_by_discipline(
        &self,
        discipline_id: i32,
    ) -> Result<Vec<ReportRecord>, AppError> {
        self.repos.reports.reports_by_discipline(discipline_id).await
    }

    pub async fn disciplines(&self) -> Result<Vec<DisciplineSummary>, AppError> {
        self.repos.reports.report_disciplines().await
    }

    pub async fn groups(&self, discipline_title: &str) -> Result<Vec<String>, AppError> {
        self.repos.reports.report_groups(discipline_title).await
    }

    /// Reports of one group for one discipline, with their timeline stats.
    pub async fn cohort(
        &self,
        discipline_title: &str,
        group: &str,
    ) -> Result<(Vec<ReportRecord>, TimelineStat), AppError> {
        let reports = self
            .repos
            .reports
            .reports_by_group_and_discipline(discipline_title, group)
            .await?;
        let stats = timeline_stats(&reports);
        Ok((reports, stats))
    }
}
