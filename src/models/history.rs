// src/models/history.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::test_record::{ScoreSheet, TestRecord};

/// Represents the 'roadmap_histories' table in the database.
/// One ledger per (user, discipline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub discipline_id: i32,

    /// Latest diagnostic score per topic. Replaced wholesale on each diagnostic.
    pub blocks: ScoreSheet,

    pub created_at: DateTime<Utc>,
}

/// A history together with the tests the user has not passed yet.
#[derive(Debug, Serialize)]
pub struct HistoryView {
    #[serde(flatten)]
    pub history: HistoryRecord,
    pub tests: Vec<TestRecord>,
}
