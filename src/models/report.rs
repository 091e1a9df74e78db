// src/models/report.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::test_record::ScoreSheet;

/// Represents the 'reports' table in the database.
/// At most one row per (user, discipline); re-creating overwrites `details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub discipline_title: String,
    pub discipline_id: i32,
    pub group: String,
    pub details: ReportDetails,
    pub created_at: DateTime<Utc>,
}

/// Report payload: every passed test of the history at the time of creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDetails {
    #[serde(default)]
    pub report: Vec<TestSnapshot>,
}

/// Results of one passed test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSnapshot {
    #[serde(default)]
    pub results: ScoreSheet,
    pub passed_at: Option<DateTime<Utc>>,
}

/// Upsert payload for a report.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub user_id: Uuid,
    pub discipline_title: String,
    pub discipline_id: i32,
    pub group: String,
    pub details: ReportDetails,
}

/// Cohort statistics over a set of reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineStat {
    pub avg_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Number of nested test snapshots, not of report rows.
    pub reports_count: usize,
}

/// Distinct discipline seen in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisciplineSummary {
    pub name: String,
    pub id: i32,
}
