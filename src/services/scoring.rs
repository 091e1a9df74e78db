// src/services/scoring.rs

use thiserror::Error;

use crate::models::test_record::{Block, ScoreSheet, TestDetails};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error(
        "invalid answers count: test has {expected} questions, {submitted} answers given, {truth} in the answer key"
    )]
    CountMismatch {
        expected: usize,
        submitted: usize,
        truth: usize,
    },
}

/// Rounds to two decimals, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scores positional answers against the answer key, one block per topic.
///
/// Both lists follow the flattened question order of `details`. Topics without
/// questions produce no block. When two topics share a title, the later score
/// wins but keeps the position of the first.
pub fn score_answers(
    details: &TestDetails,
    submitted: &[String],
    truth: &[String],
) -> Result<ScoreSheet, ScoringError> {
    let expected = details.question_count();
    if submitted.len() != expected || truth.len() != expected {
        return Err(ScoringError::CountMismatch {
            expected,
            submitted: submitted.len(),
            truth: truth.len(),
        });
    }

    let mut blocks: Vec<Block> = Vec::with_capacity(details.test.len());
    let mut offset = 0;

    for topic in &details.test {
        let count = topic.questions.len();
        let range = offset..offset + count;
        offset += count;

        if count == 0 {
            continue;
        }

        let matches = submitted[range.clone()]
            .iter()
            .zip(&truth[range])
            .filter(|(given, correct)| given == correct)
            .count();
        let value = round2(matches as f64 / count as f64 * 100.0);

        match blocks.iter_mut().find(|b| b.name == topic.title) {
            Some(existing) => existing.value = value,
            None => blocks.push(Block {
                name: topic.title.clone(),
                value,
            }),
        }
    }

    Ok(ScoreSheet::new(blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record::{Question, TestBlock};

    fn topic(title: &str, questions: usize) -> TestBlock {
        TestBlock {
            title: title.to_string(),
            questions: (0..questions)
                .map(|i| Question {
                    text: format!("{title} q{i}"),
                    options: Vec::new(),
                })
                .collect(),
        }
    }

    fn answers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scores_each_topic_slice() {
        let details = TestDetails {
            test: vec![topic("T1", 3), topic("T2", 2)],
        };
        let truth = answers(&["A", "B", "C", "D", "A"]);
        let given = answers(&["A", "B", "X", "X", "X"]);

        let sheet = score_answers(&details, &given, &truth).unwrap();
        assert_eq!(sheet.blocks.len(), 2);
        assert_eq!(sheet.blocks[0].name, "T1");
        assert_eq!(sheet.blocks[0].value, 66.67);
        assert_eq!(sheet.blocks[1].name, "T2");
        assert_eq!(sheet.blocks[1].value, 0.0);
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let details = TestDetails {
            test: vec![topic("T1", 3), topic("T2", 2)],
        };
        let truth = answers(&["A", "A", "A", "A", "A"]);
        let err = score_answers(&details, &answers(&["A", "A", "A", "A"]), &truth).unwrap_err();
        assert_eq!(
            err,
            ScoringError::CountMismatch {
                expected: 5,
                submitted: 4,
                truth: 5
            }
        );

        let short_key = answers(&["A", "A", "A", "A"]);
        assert!(score_answers(&details, &truth, &short_key).is_err());
    }

    #[test]
    fn test_empty_topic_is_skipped() {
        let details = TestDetails {
            test: vec![topic("Empty", 0), topic("T1", 2)],
        };
        let key = answers(&["A", "B"]);
        let sheet = score_answers(&details, &key, &key).unwrap();
        assert_eq!(sheet.blocks.len(), 1);
        assert_eq!(sheet.value_of("T1"), Some(100.0));
        assert_eq!(sheet.value_of("Empty"), None);
    }

    #[test]
    fn test_duplicate_titles_keep_last_value() {
        let details = TestDetails {
            test: vec![topic("Dup", 1), topic("Other", 1), topic("Dup", 2)],
        };
        let truth = answers(&["A", "A", "A", "A"]);
        let given = answers(&["A", "A", "A", "X"]);
        let sheet = score_answers(&details, &given, &truth).unwrap();
        assert_eq!(sheet.blocks.len(), 2);
        assert_eq!(sheet.blocks[0].name, "Dup");
        assert_eq!(sheet.blocks[0].value, 50.0);
        assert_eq!(sheet.blocks[1].name, "Other");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(200.0 / 3.0), 66.67);
        assert_eq!(round2(100.0 / 3.0), 33.33);
        assert_eq!(round2(12.5), 12.5);
        assert_eq!(round2(0.0), 0.0);
    }
}
