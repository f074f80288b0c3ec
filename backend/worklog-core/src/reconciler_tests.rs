// src/reconciler_tests.rs

#[cfg(test)]
mod tests {
    use crate::interval::{Bound, IntervalError};
    use crate::models::{BatchSubmission, IntervalInput};
    use crate::reconciler::*;
    use crate::store::{ActivityStore, MemoryActivityStore, SqliteActivityStore};
    use chrono::NaiveDate;

    fn march_fifth() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn batch(intervals: Vec<IntervalInput>) -> BatchSubmission {
        BatchSubmission {
            date: march_fifth(),
            clock_in: Some("08:45".to_string()),
            clock_out: Some("17:30".to_string()),
            intervals,
        }
    }

    fn sorted_rows(rows: Vec<crate::models::ActivityRow>) -> Vec<crate::models::ActivityRow> {
        let mut rows = rows;
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        rows
    }

    #[test]
    fn build_records_computes_duration_and_normalizes_times() {
        let records = build_records(
            "alice",
            &batch(vec![
                IntervalInput::new("Email", "9:00", "12:00"),
                IntervalInput::new("Coding", "13:00", "15:00"),
            ]),
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].start, "09:00");
        assert_eq!(records[0].duration_minutes, 180);
        assert_eq!(records[1].duration_minutes, 120);
        assert_eq!(records[1].clock_out.as_deref(), Some("17:30"));
    }

    #[test]
    fn blank_clock_markers_are_dropped() {
        let mut submission = batch(vec![IntervalInput::new("Email", "09:00", "10:00")]);
        submission.clock_in = Some("  ".to_string());
        submission.clock_out = None;

        let records = build_records("alice", &submission).unwrap();
        assert_eq!(records[0].clock_in, None);
        assert_eq!(records[0].clock_out, None);
    }

    #[test]
    fn empty_subject_is_rejected_before_intervals() {
        let result = build_records(
            "   ",
            &batch(vec![IntervalInput::new("Broken", "xx", "yy")]),
        );
        assert!(matches!(result, Err(ReconcileError::EmptySubject)));
    }

    #[test]
    fn failure_reports_position_of_first_bad_interval() {
        let result = build_records(
            "alice",
            &batch(vec![
                IntervalInput::new("Ok", "09:00", "10:00"),
                IntervalInput::new("Ok", "10:00", "11:00"),
                IntervalInput::new("Backwards", "15:00", "14:00"),
                IntervalInput::new("Garbage", "later", "14:00"),
            ]),
        );

        match result {
            Err(ReconcileError::InvalidInterval { index, source }) => {
                assert_eq!(index, 2);
                assert!(matches!(source, IntervalError::InvertedInterval { .. }));
            }
            other => panic!("Expected InvalidInterval, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_batch_leaves_store_unchanged() {
        let store = MemoryActivityStore::new();
        reconcile(
            &store,
            "alice",
            &batch(vec![IntervalInput::new("Email", "09:00", "12:00")]),
        )
        .await
        .unwrap();
        let before = store.snapshot().unwrap();

        let result = reconcile(
            &store,
            "alice",
            &batch(vec![
                IntervalInput::new("Replacing", "09:00", "12:00"),
                IntervalInput::new("Bad end", "13:00", "13:75"),
            ]),
        )
        .await;

        match result {
            Err(ReconcileError::InvalidInterval { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(
                    source,
                    IntervalError::InvalidTimeFormat {
                        bound: Bound::End,
                        value: "13:75".to_string(),
                    }
                );
            }
            other => panic!("Expected InvalidInterval, got {:?}", other),
        }
        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn identical_batch_twice_is_idempotent() {
        let store = SqliteActivityStore::connect("sqlite::memory:", 1).await.unwrap();
        let submission = batch(vec![
            IntervalInput::new("Email", "09:00", "12:00"),
            IntervalInput::new("Coding", "13:00", "15:00"),
        ]);

        let first = reconcile(&store, "alice", &submission).await.unwrap();
        assert_eq!(first.written, 2);
        assert_eq!(first.replaced, 0);
        let once = sorted_rows(store.records_for_subject("alice").await.unwrap());

        let second = reconcile(&store, "alice", &submission).await.unwrap();
        assert_eq!(second.written, 2);
        assert_eq!(second.replaced, 2);
        let twice = sorted_rows(store.records_for_subject("alice").await.unwrap());

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn resubmitting_same_bounds_with_new_label_replaces_record() {
        let store = MemoryActivityStore::new();
        reconcile(
            &store,
            "alice",
            &batch(vec![IntervalInput::new("Email", "09:00", "12:00")]),
        )
        .await
        .unwrap();

        let mut resubmission = batch(vec![IntervalInput::new("Planning", "9:00", "12:00")]);
        resubmission.clock_in = Some("09:00".to_string());
        let outcome = reconcile(&store, "alice", &resubmission).await.unwrap();
        assert_eq!(outcome.replaced, 1);

        let rows = store.records_for_subject("alice").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].activity_name, "Planning");
        assert_eq!(rows[0].clock_in.as_deref(), Some("09:00"));
    }

    #[tokio::test]
    async fn overlapping_but_different_bounds_are_kept_side_by_side() {
        let store = MemoryActivityStore::new();
        reconcile(
            &store,
            "alice",
            &batch(vec![
                IntervalInput::new("Email", "09:00", "12:00"),
                IntervalInput::new("Call", "10:00", "11:00"),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(store.records_for_subject("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let store = MemoryActivityStore::new();
        let outcome = reconcile(&store, "alice", &batch(Vec::new())).await.unwrap();

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.date, march_fifth());
        assert!(store.snapshot().unwrap().is_empty());
    }
}
