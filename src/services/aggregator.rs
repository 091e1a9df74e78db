// src/services/aggregator.rs

use crate::{
    models::report::{ReportRecord, TimelineStat},
    services::scoring::round2,
};

/// Folds every block value of every snapshot in `reports`.
///
/// `reports_count` is the number of snapshots. With no block values at all,
/// every statistic is zero.
pub fn timeline_stats(reports: &[ReportRecord]) -> TimelineStat {
    let mut stats = TimelineStat::default();
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    let mut sum = 0.0;
    let mut values = 0usize;

    for snapshot in reports.iter().flat_map(|r| &r.details.report) {
        stats.reports_count += 1;
        for block in &snapshot.results.blocks {
            sum += block.value;
            values += 1;
            min = min.min(block.value);
            max = max.max(block.value);
        }
    }

    if values > 0 {
        stats.avg_score = round2(sum / values as f64);
        stats.min_score = min;
        stats.max_score = max;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        report::{ReportDetails, TestSnapshot},
        test_record::{Block, ScoreSheet},
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn snapshot(values: &[f64]) -> TestSnapshot {
        TestSnapshot {
            results: ScoreSheet::new(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Block {
                        name: format!("T{i}"),
                        value: *v,
                    })
                    .collect(),
            ),
            passed_at: Some(Utc::now()),
        }
    }

    fn report(snapshots: Vec<TestSnapshot>) -> ReportRecord {
        ReportRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            discipline_title: "Algorithms".into(),
            discipline_id: 1,
            group: "G1".into(),
            details: ReportDetails { report: snapshots },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_three_snapshots_in_one_report() {
        let reports = vec![report(vec![
            snapshot(&[10.0]),
            snapshot(&[20.0]),
            snapshot(&[30.0]),
        ])];
        let stats = timeline_stats(&reports);
        assert_eq!(stats.avg_score, 20.0);
        assert_eq!(stats.min_score, 10.0);
        assert_eq!(stats.max_score, 30.0);
        assert_eq!(stats.reports_count, 3);
    }

    #[test]
    fn test_one_snapshot_with_three_blocks() {
        let reports = vec![report(vec![snapshot(&[10.0, 20.0, 30.0])])];
        let stats = timeline_stats(&reports);
        assert_eq!(stats.avg_score, 20.0);
        assert_eq!(stats.min_score, 10.0);
        assert_eq!(stats.max_score, 30.0);
        assert_eq!(stats.reports_count, 1);
    }

    #[test]
    fn test_no_reports_gives_zeros() {
        assert_eq!(timeline_stats(&[]), TimelineStat::default());
    }

    #[test]
    fn test_snapshots_without_blocks_still_count() {
        let reports = vec![report(vec![snapshot(&[]), snapshot(&[])])];
        let stats = timeline_stats(&reports);
        assert_eq!(stats.reports_count, 2);
        assert_eq!(stats.avg_score, 0.0);
        assert_eq!(stats.min_score, 0.0);
        assert_eq!(stats.max_score, 0.0);
    }

    #[test]
    fn test_average_is_rounded() {
        let reports = vec![
            report(vec![snapshot(&[100.0, 0.0])]),
            report(vec![snapshot(&[0.0])]),
        ];
        let stats = timeline_stats(&reports);
        assert_eq!(stats.avg_score, 33.33);
        assert_eq!(stats.reports_count, 2);
    }
}
