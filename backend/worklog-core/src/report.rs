// src/report.rs
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use tracing::debug;

use crate::aggregator::{HourBasis, MonthlyAggregate};
use crate::interval::{minute_of_day, parse_time_of_day, Bound};
use crate::models::{ActivityRow, ReportPeriod, DATE_FORMAT};
use crate::store::{ActivityStore, StoreError};

// --- Report Types ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRow {
    pub date: NaiveDate,
    pub minutes: i64,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryCards {
    pub productive: String,
    pub working_days: i64,
    pub available: String,
    pub idle: String,
    pub productivity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayActivity {
    pub label: String,
    pub start: String,
    pub end: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject: String,
    pub period: ReportPeriod,
    pub monthly: Vec<MonthlyRow>,
    pub cards: SummaryCards,
    pub years: Vec<i32>,
    pub day_detail: Option<Vec<DayActivity>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayGroup {
    pub date: NaiveDate,
    pub activities: Vec<DayActivity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeBreakdown {
    pub subject: String,
    pub period: ReportPeriod,
    pub days: Vec<DayGroup>,
}

// --- Formatting ---

fn hours_and_minutes(total_minutes: i64) -> (i64, i64) {
    (total_minutes / 60, total_minutes % 60)
}

pub fn format_day_total(total_minutes: i64) -> String {
    let (h, m) = hours_and_minutes(total_minutes);
    format!("{} hours {} min", h, m)
}

fn format_card_duration(total_minutes: i64) -> String {
    let (h, m) = hours_and_minutes(total_minutes);
    format!("{} hrs {} min", h, m)
}

// --- Builders ---

pub fn monthly_table(aggregate: &MonthlyAggregate) -> Vec<MonthlyRow> {
    aggregate
        .day_totals
        .iter()
        .map(|(date, minutes)| MonthlyRow {
            date: *date,
            minutes: *minutes,
            time: format_day_total(*minutes),
        })
        .collect()
}

pub fn summary_cards(aggregate: &MonthlyAggregate) -> SummaryCards {
    let figures = aggregate.figures(HourBasis::Fractional);
    let idle_minutes = (aggregate.available_hours * 60 - aggregate.total_minutes).max(0);

    SummaryCards {
        productive: format_card_duration(aggregate.total_minutes),
        working_days: aggregate.active_days,
        available: format!("{} hrs", aggregate.available_hours),
        idle: format_card_duration(idle_minutes),
        productivity: format!("{:.2}%", figures.productivity_ratio),
    }
}

fn start_minute(row: &ActivityRow) -> Option<i64> {
    parse_time_of_day(&row.start_time, Bound::Start)
        .ok()
        .map(minute_of_day)
}

/// Orders rows by start time of day and projects them for display.
fn day_activities(mut rows: Vec<ActivityRow>) -> Vec<DayActivity> {
    rows.sort_by_key(start_minute);
    rows.into_iter()
        .map(|row| DayActivity {
            label: row.activity_name,
            start: row.start_time,
            end: row.end_time,
            duration_minutes: row.duration,
        })
        .collect()
}

pub async fn day_detail(
    store: &dyn ActivityStore,
    subject: &str,
    date: NaiveDate,
) -> Result<Vec<DayActivity>, StoreError> {
    let rows = store
        .records_for_day(subject, &date.format(DATE_FORMAT).to_string())
        .await?;
    Ok(day_activities(rows))
}

/// Every year present in `rows`, ascending. Malformed dates are skipped.
pub fn years_in(rows: &[ActivityRow]) -> Vec<i32> {
    let years: BTreeSet<i32> = rows
        .iter()
        .filter_map(|row| match row.parsed_date() {
            Ok(date) => Some(date.year()),
            Err(e) => {
                debug!("Skipping row in year scan: {}", e);
                None
            }
        })
        .collect();
    years.into_iter().collect()
}

pub async fn distinct_years(
    store: &dyn ActivityStore,
    subject: &str,
) -> Result<Vec<i32>, StoreError> {
    let rows = store.records_for_subject(subject).await?;
    Ok(years_in(&rows))
}

/// Self-service report: monthly table, cards and years from a single fetch,
/// plus the detail of `day` when one is requested.
pub async fn build_subject_report(
    store: &dyn ActivityStore,
    subject: &str,
    period: ReportPeriod,
    day: Option<NaiveDate>,
) -> Result<SubjectReport, StoreError> {
    let rows = store.records_for_subject(subject).await?;
    let aggregate = MonthlyAggregate::from_rows(subject, period, &rows);
    let years = years_in(&rows);

    let day_detail = day.map(|date| {
        let wanted = date.format(DATE_FORMAT).to_string();
        let matching: Vec<ActivityRow> = rows
            .iter()
            .filter(|row| row.activity_date == wanted)
            .cloned()
            .collect();
        day_activities(matching)
    });

    Ok(SubjectReport {
        subject: subject.to_string(),
        period,
        monthly: monthly_table(&aggregate),
        cards: summary_cards(&aggregate),
        years,
        day_detail,
    })
}

/// Manager view of one employee: the period's activities grouped by date.
pub async fn employee_breakdown(
    store: &dyn ActivityStore,
    subject: &str,
    period: ReportPeriod,
) -> Result<EmployeeBreakdown, StoreError> {
    let rows = store.records_for_subject(subject).await?;

    let mut by_date: BTreeMap<NaiveDate, Vec<ActivityRow>> = BTreeMap::new();
    for row in rows {
        match row.parsed_date() {
            Ok(date) if period.contains(date) => by_date.entry(date).or_default().push(row),
            Ok(_) => {}
            Err(e) => debug!("Skipping row in breakdown: {}", e),
        }
    }

    let days = by_date
        .into_iter()
        .map(|(date, rows)| DayGroup {
            date,
            activities: day_activities(rows),
        })
        .collect();

    Ok(EmployeeBreakdown {
        subject: subject.to_string(),
        period,
        days,
    })
}

/// Writes the monthly table as CSV with a `date,minutes,time` header.
pub fn write_monthly_csv<W: Write>(
    aggregate: &MonthlyAggregate,
    writer: W,
) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let table = monthly_table(aggregate);
    if table.is_empty() {
        // serialize() only emits the header alongside the first row
        csv_writer.write_record(["date", "minutes", "time"])?;
    }
    for row in table {
        csv_writer.serialize(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}
