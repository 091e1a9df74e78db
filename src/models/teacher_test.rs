// src/models/teacher_test.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::test_record::TestBlock;

/// Represents the 'teacher_tests' table in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherTest {
    pub id: Uuid,
    pub discipline_id: i32,

    /// Ordered topics, same shape as a generated test body.
    pub details: Vec<TestBlock>,

    /// Answer key, aligned with the flattened questions.
    pub answers: Vec<String>,

    pub created_at: DateTime<Utc>,
}

/// DTO for handing a teacher test to a student (excludes the answer key).
#[derive(Debug, Clone, Serialize)]
pub struct PublicTeacherTest {
    pub id: Uuid,
    pub test: Vec<TestBlock>,
}

impl From<TeacherTest> for PublicTeacherTest {
    fn from(test: TeacherTest) -> Self {
        Self {
            id: test.id,
            test: test.details,
        }
    }
}

/// DTO for creating or replacing a teacher test.
#[derive(Debug, Deserialize, Validate)]
pub struct TeacherTestRequest {
    #[validate(length(min = 1, max = 100))]
    pub test: Vec<TestBlock>,
    #[validate(length(min = 1, max = 1000))]
    pub answers: Vec<String>,
}

impl TeacherTestRequest {
    /// The key must cover every question exactly once.
    pub fn answers_match_questions(&self) -> bool {
        let questions: usize = self.test.iter().map(|b| b.questions.len()).sum();
        questions == self.answers.len()
    }
}

#[derive(Debug, Clone)]
pub struct NewTeacherTest {
    pub discipline_id: i32,
    pub details: Vec<TestBlock>,
    pub answers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record::Question;

    fn block(title: &str, n: usize) -> TestBlock {
        TestBlock {
            title: title.to_string(),
            questions: (0..n)
                .map(|i| Question {
                    text: format!("{} q{}", title, i),
                    options: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_answers_must_cover_all_questions() {
        let ok = TeacherTestRequest {
            test: vec![block("T1", 2), block("T2", 1)],
            answers: vec!["A".into(), "B".into(), "C".into()],
        };
        assert!(ok.answers_match_questions());

        let short = TeacherTestRequest {
            test: vec![block("T1", 2), block("T2", 1)],
            answers: vec!["A".into()],
        };
        assert!(!short.answers_match_questions());
    }
}
