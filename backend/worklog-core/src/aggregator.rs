// src/aggregator.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::{ActivityRow, ReportPeriod};
use crate::store::{ActivityStore, StoreError};

/// Capacity credited for each active day.
pub const AVAILABLE_HOURS_PER_DAY: i64 = 7;

/// Which worked-hours figure feeds idle time and the ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourBasis {
    /// `total_minutes / 60` as a decimal. Used by the self-service report.
    Fractional,
    /// `total_minutes / 60` floored to whole hours. Used by the fleet rollup.
    WholeHours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityFigures {
    pub worked_hours: Decimal,
    pub idle_hours: Decimal,
    pub productivity_ratio: Decimal,
}

impl ProductivityFigures {
    fn compute(worked: Decimal, available_hours: i64) -> Self {
        let available = Decimal::from(available_hours);
        let idle = (available - worked).max(Decimal::ZERO);
        let ratio = if available > Decimal::ZERO {
            (worked / available * dec!(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Self {
            worked_hours: worked.round_dp(2),
            idle_hours: idle.round_dp(2),
            productivity_ratio: ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAggregate {
    pub subject: String,
    pub period: ReportPeriod,
    pub day_totals: BTreeMap<NaiveDate, i64>,
    pub total_minutes: i64,
    pub active_days: i64,
    pub available_hours: i64,
    pub figures: ProductivityFigures,
}

impl MonthlyAggregate {
    /// Folds a subject's stored rows into the totals for `period`. Rows with
    /// unparseable dates are skipped.
    pub fn from_rows(subject: &str, period: ReportPeriod, rows: &[ActivityRow]) -> Self {
        let mut day_totals: BTreeMap<NaiveDate, i64> = BTreeMap::new();

        for row in rows {
            let date = match row.parsed_date() {
                Ok(date) => date,
                Err(e) => {
                    debug!("Skipping row: {}", e);
                    continue;
                }
            };
            if period.contains(date) {
                *day_totals.entry(date).or_insert(0) += row.duration;
            }
        }
        day_totals.retain(|_, minutes| *minutes > 0);

        let total_minutes: i64 = day_totals.values().sum();
        let active_days = day_totals.len() as i64;
        let available_hours = active_days * AVAILABLE_HOURS_PER_DAY;
        let figures = ProductivityFigures::compute(
            Decimal::from(total_minutes) / dec!(60),
            available_hours,
        );

        Self {
            subject: subject.to_string(),
            period,
            day_totals,
            total_minutes,
            active_days,
            available_hours,
            figures,
        }
    }

    pub fn worked_whole_hours(&self) -> i64 {
        self.total_minutes / 60
    }

    pub fn figures(&self, basis: HourBasis) -> ProductivityFigures {
        match basis {
            HourBasis::Fractional => self.figures,
            HourBasis::WholeHours => ProductivityFigures::compute(
                Decimal::from(self.worked_whole_hours()),
                self.available_hours,
            ),
        }
    }
}

pub async fn aggregate(
    store: &dyn ActivityStore,
    subject: &str,
    period: ReportPeriod,
) -> Result<MonthlyAggregate, StoreError> {
    let rows = store.records_for_subject(subject).await?;
    Ok(MonthlyAggregate::from_rows(subject, period, &rows))
}
