// src/models.rs
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// --- Submission Types ---

/// One activity interval as submitted, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalInput {
    pub label: String,
    pub start: String,
    pub end: String,
}

impl IntervalInput {
    pub fn new(label: &str, start: &str, end: &str) -> Self {
        Self {
            label: label.to_string(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }
}

/// A batch of intervals for one subject and one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub date: NaiveDate,
    #[serde(default)]
    pub clock_in: Option<String>,
    #[serde(default)]
    pub clock_out: Option<String>,
    #[serde(default)]
    pub intervals: Vec<IntervalInput>,
}

// --- Canonical Record ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub subject: String,
    pub date: NaiveDate,
    pub clock_in: Option<String>,
    pub clock_out: Option<String>,
    pub label: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: i64,
}

/// Replacement key: at most one stored record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub subject: String,
    pub date: String,
    pub start: String,
    pub end: String,
}

impl ActivityRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            subject: self.subject.clone(),
            date: self.date.format(DATE_FORMAT).to_string(),
            start: self.start.clone(),
            end: self.end.clone(),
        }
    }
}

// --- Stored Row ---

/// A record exactly as it sits in the store. Dates are kept as text so legacy
/// rows with unparseable dates can still be read and skipped.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ActivityRow {
    pub subject: String,
    pub activity_date: String,
    pub clock_in: Option<String>,
    pub activity_name: String,
    pub start_time: String,
    pub end_time: String,
    pub duration: i64,
    pub clock_out: Option<String>,
}

impl ActivityRow {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            subject: self.subject.clone(),
            date: self.activity_date.clone(),
            start: self.start_time.clone(),
            end: self.end_time.clone(),
        }
    }

    pub fn parsed_date(&self) -> Result<NaiveDate, MalformedStoredDate> {
        parse_stored_date(&self.subject, &self.activity_date)
    }
}

/// The single rule for which stored date texts are valid. Every store query
/// and scan that interprets `activity_date` goes through here.
pub fn parse_stored_date(subject: &str, value: &str) -> Result<NaiveDate, MalformedStoredDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| MalformedStoredDate {
        subject: subject.to_string(),
        value: value.to_string(),
    })
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stored activity for '{subject}' has malformed date '{value}'")]
pub struct MalformedStoredDate {
    pub subject: String,
    pub value: String,
}

impl From<&ActivityRecord> for ActivityRow {
    fn from(record: &ActivityRecord) -> Self {
        Self {
            subject: record.subject.clone(),
            activity_date: record.date.format(DATE_FORMAT).to_string(),
            clock_in: record.clock_in.clone(),
            activity_name: record.label.clone(),
            start_time: record.start.clone(),
            end_time: record.end.clone(),
            duration: record.duration_minutes,
            clock_out: record.clock_out.clone(),
        }
    }
}

impl TryFrom<ActivityRow> for ActivityRecord {
    type Error = MalformedStoredDate;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let date = row.parsed_date()?;
        Ok(Self {
            subject: row.subject,
            date,
            clock_in: row.clock_in,
            clock_out: row.clock_out,
            label: row.activity_name,
            start: row.start_time,
            end: row.end_time,
            duration_minutes: row.duration,
        })
    }
}

// --- Reporting Period ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("month '{0}' is not a number between 1 and 12")]
    InvalidMonth(String),
    #[error("year '{0}' is not a valid year")]
    InvalidYear(String),
}

/// A calendar month of a calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    pub year: i32,
    pub month: u32,
}

impl ReportPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month.to_string()));
        }
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(PeriodError::InvalidYear(year.to_string()));
        }
        Ok(Self { year, month })
    }

    pub fn current() -> Self {
        Self::containing(Local::now().date_naive())
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Builds a period from optional query values. Missing or blank values
    /// fall back to the current month and year. Months may be zero-padded.
    pub fn from_query(month: Option<&str>, year: Option<&str>) -> Result<Self, PeriodError> {
        let current = Self::current();

        let month = match month.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) => m
                .parse::<u32>()
                .map_err(|_| PeriodError::InvalidMonth(m.to_string()))?,
            None => current.month,
        };
        let year = match year.map(str::trim).filter(|y| !y.is_empty()) {
            Some(y) => y
                .parse::<i32>()
                .map_err(|_| PeriodError::InvalidYear(y.to_string()))?,
            None => current.year,
        };

        Self::new(year, month)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn month_str(&self) -> String {
        format!("{:02}", self.month)
    }

    pub fn year_str(&self) -> String {
        self.year.to_string()
    }
}

impl std::fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}
