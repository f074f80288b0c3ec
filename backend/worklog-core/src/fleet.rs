// src/fleet.rs
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::aggregator::{aggregate, HourBasis, MonthlyAggregate};
use crate::models::ReportPeriod;
use crate::store::{ActivityStore, AdminRequestSource, StoreError};

/// Subjects carrying this prefix are managers and never appear in the rollup.
pub const MANAGER_PREFIX: &str = "manager_";

pub fn is_manager_subject(subject: &str) -> bool {
    subject.starts_with(MANAGER_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetRow {
    pub subject: String,
    pub productive_hours: i64,
    pub active_days: i64,
    pub available_hours: i64,
    pub idle_hours: i64,
    pub productivity_ratio: Decimal,
}

impl From<&MonthlyAggregate> for FleetRow {
    fn from(aggregate: &MonthlyAggregate) -> Self {
        let productive_hours = aggregate.worked_whole_hours();
        let figures = aggregate.figures(HourBasis::WholeHours);
        Self {
            subject: aggregate.subject.clone(),
            productive_hours,
            active_days: aggregate.active_days,
            available_hours: aggregate.available_hours,
            idle_hours: (aggregate.available_hours - productive_hours).max(0),
            productivity_ratio: figures.productivity_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetOverview {
    pub period: ReportPeriod,
    pub rows: Vec<FleetRow>,
    pub years: Vec<i32>,
    pub pending_requests: i64,
}

/// Aggregates every non-manager subject active in `period`, one tokio task
/// per subject. Rows are merged once all tasks finish and sorted by subject.
pub async fn fleet_aggregate(
    store: Arc<dyn ActivityStore>,
    admin_requests: &dyn AdminRequestSource,
    period: ReportPeriod,
) -> Result<FleetOverview, StoreError> {
    let subjects: Vec<String> = store
        .subjects_active_in(period)
        .await?
        .into_iter()
        .filter(|subject| !is_manager_subject(subject))
        .collect();
    info!("Aggregating {} subject(s) for {}", subjects.len(), period);

    let mut tasks = JoinSet::new();
    for subject in subjects {
        let store = store.clone();
        tasks.spawn(async move { aggregate(store.as_ref(), &subject, period).await });
    }

    let mut rows = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let aggregate = joined.map_err(|e| {
            warn!("Aggregation task failed: {}", e);
            StoreError::Worker(e.to_string())
        })??;
        rows.push(FleetRow::from(&aggregate));
    }
    rows.sort_by(|a, b| a.subject.cmp(&b.subject));

    let mut years = store.distinct_years().await?;
    years.reverse();
    if years.is_empty() {
        years.push(ReportPeriod::current().year);
    }

    let pending_requests = admin_requests.pending_reset_requests().await?;

    Ok(FleetOverview {
        period,
        rows,
        years,
        pending_requests,
    })
}
