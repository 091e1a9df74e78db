// src/models/test_record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::Error as _};
use uuid::Uuid;

/// Version stamped into every score sheet written by this service.
pub const SCORE_SHEET_VERSION: u32 = 1;

/// Lifecycle of a quiz instance. `Passed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Passed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Passed => "passed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TestStatus::Pending),
            "passed" => Some(TestStatus::Passed),
            _ => None,
        }
    }
}

/// Represents the 'roadmap_tests' table in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: Uuid,

    /// Owning progress ledger.
    pub history_id: Uuid,

    pub status: TestStatus,

    /// Generator output, stored as received.
    /// Always decodable as `TestDetails` (checked before insert).
    pub details: serde_json::Value,

    /// Per-topic scores. `None` until the test is passed.
    pub results: Option<ScoreSheet>,

    /// Diagnostic test: its score seeds the owning history.
    pub is_first: bool,

    pub created_at: DateTime<Utc>,
    pub passed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new quiz instance.
#[derive(Debug, Clone)]
pub struct NewTestRecord {
    pub id: Uuid,
    pub history_id: Uuid,
    pub details: serde_json::Value,
    pub is_first: bool,
}

/// Typed view of a quiz: ordered topics, each with ordered questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDetails {
    pub test: Vec<TestBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBlock {
    pub title: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default)]
    pub options: Vec<AnswerOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub label: String,
    pub text: String,
}

impl TestDetails {
    /// Decodes a stored or freshly generated payload, rejecting anything that
    /// does not follow the topic → questions → options shape.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if !value.is_object() {
            return Err(serde_json::Error::custom("test details must be a JSON object"));
        }
        TestDetails::deserialize(value)
    }

    pub fn question_count(&self) -> usize {
        self.test.iter().map(|block| block.questions.len()).sum()
    }
}

/// Per-topic score list, as stored in test results and history blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSheet {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// A topic name with its percentage score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub value: f64,
}

fn default_version() -> u32 {
    SCORE_SHEET_VERSION
}

impl ScoreSheet {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            version: SCORE_SHEET_VERSION,
            blocks,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Looks up a topic's score by name.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.blocks.iter().find(|b| b.name == name).map(|b| b.value)
    }
}

impl Default for ScoreSheet {
    fn default() -> Self {
        Self::empty()
    }
}

/// DTO for submitting answers to a generated test.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswersRequest {
    pub test_id: Uuid,
    /// Positional answers across all topics, in question order.
    pub answers: Vec<String>,
}
