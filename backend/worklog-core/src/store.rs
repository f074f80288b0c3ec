// src/store.rs
use async_trait::async_trait;
use chrono::Datelike;
use serde::Serialize;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{parse_stored_date, ActivityRecord, ActivityRow, ReportPeriod, DATE_FORMAT};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Activity store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("Activity store lock poisoned")]
    LockPoisoned,
    #[error("Aggregation worker failed: {0}")]
    Worker(String),
}

/// Result of applying one batch of replacements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchWrite {
    pub written: usize,
    pub replaced: usize,
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// For each record in order: delete any row with the same
    /// `(subject, date, start, end)` key, then insert the record.
    /// The whole batch is applied atomically.
    async fn replace_batch(&self, records: &[ActivityRecord]) -> Result<BatchWrite, StoreError>;

    async fn records_for_subject(&self, subject: &str) -> Result<Vec<ActivityRow>, StoreError>;

    /// Rows for one subject and date, ordered by start time.
    async fn records_for_day(
        &self,
        subject: &str,
        date: &str,
    ) -> Result<Vec<ActivityRow>, StoreError>;

    /// Distinct subjects with at least one row dated inside `period`, sorted.
    async fn subjects_active_in(&self, period: ReportPeriod) -> Result<Vec<String>, StoreError>;

    /// Distinct years across every row in the store, ascending.
    async fn distinct_years(&self) -> Result<Vec<i32>, StoreError>;
}

/// Pending credential-reset requests, owned by the identity service.
#[async_trait]
pub trait AdminRequestSource: Send + Sync {
    async fn pending_reset_requests(&self) -> Result<i64, StoreError>;
}

// --- SQLite ---

const ROW_COLUMNS: &str =
    "subject, activity_date, clock_in, activity_name, start_time, end_time, duration, clock_out";

#[derive(Clone)]
pub struct SqliteActivityStore {
    pool: SqlitePool,
}

impl SqliteActivityStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory && !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!("Creating database at {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        // Each in-memory connection is a separate database: keep exactly one alive.
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        info!("Connecting to SQLite database: {}", database_url);
        let pool = options.connect(database_url).await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                activity_date TEXT NOT NULL,
                clock_in TEXT,
                activity_name TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration INTEGER NOT NULL,
                clock_out TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_activity_key
            ON activities(subject, activity_date, start_time, end_time)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a row without any validation or replacement. Used to load
    /// legacy data.
    pub async fn insert_raw(&self, row: &ActivityRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO activities
                (subject, activity_date, clock_in, activity_name, start_time, end_time, duration, clock_out)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.subject)
        .bind(&row.activity_date)
        .bind(&row.clock_in)
        .bind(&row.activity_name)
        .bind(&row.start_time)
        .bind(&row.end_time)
        .bind(row.duration)
        .bind(&row.clock_out)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn replace_batch(&self, records: &[ActivityRecord]) -> Result<BatchWrite, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = BatchWrite::default();

        for record in records {
            let date = record.date.format(DATE_FORMAT).to_string();

            let deleted = sqlx::query(
                r#"
                DELETE FROM activities
                WHERE subject = ?
                  AND activity_date = ?
                  AND start_time = ?
                  AND end_time = ?
                "#,
            )
            .bind(&record.subject)
            .bind(&date)
            .bind(&record.start)
            .bind(&record.end)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            sqlx::query(
                r#"
                INSERT INTO activities
                    (subject, activity_date, clock_in, activity_name, start_time, end_time, duration, clock_out)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.subject)
            .bind(&date)
            .bind(&record.clock_in)
            .bind(&record.label)
            .bind(&record.start)
            .bind(&record.end)
            .bind(record.duration_minutes)
            .bind(&record.clock_out)
            .execute(&mut *tx)
            .await?;

            if deleted > 0 {
                debug!(
                    "Replaced {} existing record(s) for {} on {} {}-{}",
                    deleted, record.subject, date, record.start, record.end
                );
                outcome.replaced += 1;
            }
            outcome.written += 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn records_for_subject(&self, subject: &str) -> Result<Vec<ActivityRow>, StoreError> {
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {} FROM activities WHERE subject = ?",
            ROW_COLUMNS
        ))
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn records_for_day(
        &self,
        subject: &str,
        date: &str,
    ) -> Result<Vec<ActivityRow>, StoreError> {
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {} FROM activities WHERE subject = ? AND activity_date = ? ORDER BY start_time",
            ROW_COLUMNS
        ))
        .bind(subject)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn subjects_active_in(&self, period: ReportPeriod) -> Result<Vec<String>, StoreError> {
        // Dates are interpreted in Rust so malformed rows are skipped exactly
        // as the aggregator skips them.
        let pairs = sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT subject, activity_date FROM activities",
        )
        .fetch_all(&self.pool)
        .await?;

        let subjects: BTreeSet<String> = pairs
            .into_iter()
            .filter(|(subject, date)| match parse_stored_date(subject, date) {
                Ok(date) => period.contains(date),
                Err(e) => {
                    debug!("Skipping row in period scan: {}", e);
                    false
                }
            })
            .map(|(subject, _)| subject)
            .collect();
        Ok(subjects.into_iter().collect())
    }

    async fn distinct_years(&self) -> Result<Vec<i32>, StoreError> {
        let pairs = sqlx::query_as::<_, (String, String)>(
            "SELECT DISTINCT subject, activity_date FROM activities",
        )
        .fetch_all(&self.pool)
        .await?;

        let years: BTreeSet<i32> = pairs
            .iter()
            .filter_map(|(subject, date)| parse_stored_date(subject, date).ok())
            .map(|date| date.year())
            .collect();
        Ok(years.into_iter().collect())
    }
}

#[async_trait]
impl AdminRequestSource for SqliteActivityStore {
    async fn pending_reset_requests(&self) -> Result<i64, StoreError> {
        // The users table belongs to the identity service and may not exist yet.
        let table = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='users'")
            .fetch_optional(&self.pool)
            .await?;
        if table.is_none() {
            return Ok(0);
        }

        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE reset_requested = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// --- In-Memory ---

#[derive(Clone, Default)]
pub struct MemoryActivityStore {
    rows: Arc<Mutex<Vec<ActivityRow>>>,
    pending_requests: Arc<Mutex<i64>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&self, row: ActivityRow) -> Result<(), StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .push(row);
        Ok(())
    }

    pub fn set_pending_requests(&self, count: i64) -> Result<(), StoreError> {
        *self
            .pending_requests
            .lock()
            .map_err(|_| StoreError::LockPoisoned)? = count;
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<ActivityRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone())
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn replace_batch(&self, records: &[ActivityRecord]) -> Result<BatchWrite, StoreError> {
        // Held for the whole batch.
        let mut rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut outcome = BatchWrite::default();

        for record in records {
            let key = record.key();
            let before = rows.len();
            rows.retain(|row| row.key() != key);
            if rows.len() < before {
                outcome.replaced += 1;
            }
            rows.push(ActivityRow::from(record));
            outcome.written += 1;
        }

        Ok(outcome)
    }

    async fn records_for_subject(&self, subject: &str) -> Result<Vec<ActivityRow>, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(rows.iter().filter(|r| r.subject == subject).cloned().collect())
    }

    async fn records_for_day(
        &self,
        subject: &str,
        date: &str,
    ) -> Result<Vec<ActivityRow>, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut matching: Vec<ActivityRow> = rows
            .iter()
            .filter(|r| r.subject == subject && r.activity_date == date)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(matching)
    }

    async fn subjects_active_in(&self, period: ReportPeriod) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        let subjects: BTreeSet<String> = rows
            .iter()
            .filter(|r| r.parsed_date().map_or(false, |d| period.contains(d)))
            .map(|r| r.subject.clone())
            .collect();
        Ok(subjects.into_iter().collect())
    }

    async fn distinct_years(&self) -> Result<Vec<i32>, StoreError> {
        let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
        let years: BTreeSet<i32> = rows
            .iter()
            .filter_map(|r| r.parsed_date().ok())
            .map(|d| d.year())
            .collect();
        Ok(years.into_iter().collect())
    }
}

#[async_trait]
impl AdminRequestSource for MemoryActivityStore {
    async fn pending_reset_requests(&self) -> Result<i64, StoreError> {
        Ok(*self
            .pending_requests
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const TEST_DATABASE_URL: &str = "sqlite::memory:";

    fn record(subject: &str, date: &str, label: &str, start: &str, end: &str, minutes: i64) -> ActivityRecord {
        ActivityRecord {
            subject: subject.to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            clock_in: Some("08:45".to_string()),
            clock_out: Some("17:30".to_string()),
            label: label.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            duration_minutes: minutes,
        }
    }

    #[tokio::test]
    async fn sqlite_replace_batch_replaces_matching_key() {
        let store = SqliteActivityStore::connect(TEST_DATABASE_URL, 5).await.unwrap();

        let first = store
            .replace_batch(&[record("alice", "2024-03-05", "Email", "09:00", "12:00", 180)])
            .await
            .unwrap();
        assert_eq!(first, BatchWrite { written: 1, replaced: 0 });

        let second = store
            .replace_batch(&[record("alice", "2024-03-05", "Coding", "09:00", "12:00", 180)])
            .await
            .unwrap();
        assert_eq!(second, BatchWrite { written: 1, replaced: 1 });

        let rows = store.records_for_subject("alice").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].activity_name, "Coding");
        assert_eq!(rows[0].clock_in.as_deref(), Some("08:45"));
    }

    #[tokio::test]
    async fn sqlite_records_for_day_are_ordered_by_start() {
        let store = SqliteActivityStore::connect(TEST_DATABASE_URL, 5).await.unwrap();
        store
            .replace_batch(&[
                record("alice", "2024-03-05", "Afternoon", "13:00", "15:00", 120),
                record("alice", "2024-03-05", "Morning", "09:00", "12:00", 180),
                record("alice", "2024-03-06", "Other day", "08:00", "09:00", 60),
            ])
            .await
            .unwrap();

        let rows = store.records_for_day("alice", "2024-03-05").await.unwrap();
        let labels: Vec<&str> = rows.iter().map(|r| r.activity_name.as_str()).collect();
        assert_eq!(labels, vec!["Morning", "Afternoon"]);
    }

    #[tokio::test]
    async fn sqlite_period_and_year_queries_skip_malformed_dates() {
        let store = SqliteActivityStore::connect(TEST_DATABASE_URL, 5).await.unwrap();
        store
            .replace_batch(&[
                record("bob", "2024-03-05", "A", "09:00", "10:00", 60),
                record("alice", "2024-03-20", "B", "09:00", "10:00", 60),
                record("carol", "2023-03-20", "C", "09:00", "10:00", 60),
                record("dave", "2024-04-01", "D", "09:00", "10:00", 60),
            ])
            .await
            .unwrap();
        store
            .insert_raw(&ActivityRow {
                subject: "legacy".to_string(),
                activity_date: "not-a-date".to_string(),
                clock_in: None,
                activity_name: "Old".to_string(),
                start_time: "09:00".to_string(),
                end_time: "10:00".to_string(),
                duration: 60,
                clock_out: None,
            })
            .await
            .unwrap();

        let period = ReportPeriod::new(2024, 3).unwrap();
        assert_eq!(
            store.subjects_active_in(period).await.unwrap(),
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert_eq!(store.distinct_years().await.unwrap(), vec![2023, 2024]);
    }

    fn raw_row(subject: &str, date: &str) -> ActivityRow {
        ActivityRow {
            subject: subject.to_string(),
            activity_date: date.to_string(),
            clock_in: None,
            activity_name: "Imported".to_string(),
            start_time: "09:00".to_string(),
            end_time: "10:00".to_string(),
            duration: 60,
            clock_out: None,
        }
    }

    #[tokio::test]
    async fn sqlite_and_memory_agree_on_which_stored_dates_are_valid() {
        let rows = vec![
            raw_row("ghost", "2024-03-05 10:00:00"),
            raw_row("shorty", "2024-3-5"),
            raw_row("old", "2019-03-05T08:00"),
        ];
        let sqlite = SqliteActivityStore::connect(TEST_DATABASE_URL, 5).await.unwrap();
        let memory = MemoryActivityStore::new();
        for row in &rows {
            sqlite.insert_raw(row).await.unwrap();
            memory.insert_raw(row.clone()).unwrap();
        }

        let period = ReportPeriod::new(2024, 3).unwrap();
        for store in [&sqlite as &dyn ActivityStore, &memory as &dyn ActivityStore] {
            assert_eq!(
                store.subjects_active_in(period).await.unwrap(),
                vec!["shorty".to_string()]
            );
            assert_eq!(store.distinct_years().await.unwrap(), vec![2024]);
        }

        let shared: Arc<dyn ActivityStore> = Arc::new(sqlite.clone());
        let overview = crate::fleet::fleet_aggregate(shared, &sqlite, period)
            .await
            .unwrap();
        assert_eq!(overview.rows.len(), 1);
        assert_eq!(overview.rows[0].subject, "shorty");
        assert_eq!(overview.rows[0].active_days, 1);
        assert_eq!(overview.years, vec![2024]);
    }

    async fn stored_rows_in_insert_order(store: &SqliteActivityStore) -> (Vec<i64>, Vec<ActivityRow>) {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM activities ORDER BY id")
            .fetch_all(&store.pool)
            .await
            .unwrap();
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            "SELECT {} FROM activities ORDER BY id",
            ROW_COLUMNS
        ))
        .fetch_all(&store.pool)
        .await
        .unwrap();
        (ids, rows)
    }

    #[tokio::test]
    async fn sqlite_failed_insert_rolls_back_whole_batch() {
        let store = SqliteActivityStore::connect(TEST_DATABASE_URL, 5).await.unwrap();
        store
            .replace_batch(&[
                record("alice", "2024-03-05", "Email", "09:00", "12:00", 180),
                record("alice", "2024-03-05", "Lunch call", "12:00", "13:00", 60),
            ])
            .await
            .unwrap();
        sqlx::query(
            r#"
            CREATE TRIGGER reject_boom BEFORE INSERT ON activities
            WHEN NEW.activity_name = 'boom'
            BEGIN
                SELECT RAISE(ABORT, 'rejected');
            END
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();
        let before = stored_rows_in_insert_order(&store).await;

        // The first record replaces an existing key before the second one fails.
        let result = store
            .replace_batch(&[
                record("alice", "2024-03-05", "Coding", "09:00", "12:00", 180),
                record("alice", "2024-03-05", "New", "15:00", "16:00", 60),
                record("alice", "2024-03-05", "boom", "16:00", "17:00", 60),
            ])
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(stored_rows_in_insert_order(&store).await, before);
        let labels: Vec<String> = before.1.iter().map(|r| r.activity_name.clone()).collect();
        assert_eq!(labels, vec!["Email".to_string(), "Lunch call".to_string()]);
    }

    #[tokio::test]
    async fn sqlite_pending_requests_is_zero_without_users_table() {
        let store = SqliteActivityStore::connect(TEST_DATABASE_URL, 5).await.unwrap();
        assert_eq!(store.pending_reset_requests().await.unwrap(), 0);

        sqlx::query("CREATE TABLE users (username TEXT UNIQUE, reset_requested INTEGER DEFAULT 0)")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (username, reset_requested) VALUES ('a', 1), ('b', 0), ('c', 1), ('d', 2)")
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.pending_reset_requests().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn memory_store_matches_sqlite_replacement_semantics() {
        let store = MemoryActivityStore::new();
        store
            .replace_batch(&[
                record("alice", "2024-03-05", "Email", "09:00", "12:00", 180),
                record("alice", "2024-03-05", "Lunch call", "12:00", "13:00", 60),
            ])
            .await
            .unwrap();
        let outcome = store
            .replace_batch(&[record("alice", "2024-03-05", "Coding", "09:00", "12:00", 180)])
            .await
            .unwrap();

        assert_eq!(outcome, BatchWrite { written: 1, replaced: 1 });
        let rows = store.records_for_day("alice", "2024-03-05").await.unwrap();
        let labels: Vec<&str> = rows.iter().map(|r| r.activity_name.as_str()).collect();
        assert_eq!(labels, vec!["Coding", "Lunch call"]);
    }
}
