// src/api.rs
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::fleet::{fleet_aggregate, FleetOverview};
use crate::models::{BatchSubmission, ReportPeriod, DATE_FORMAT};
use crate::reconciler::{reconcile, ReconcileOutcome};
use crate::report::{
    build_subject_report, day_detail, distinct_years, employee_breakdown, DayActivity,
    EmployeeBreakdown, SubjectReport,
};
use crate::{AppError, AppState};

pub const SUBJECT_HEADER: &str = "x-worklog-subject";
pub const MANAGER_HEADER: &str = "x-worklog-manager";

// --- Identity ---

/// Caller identity as asserted by the upstream identity proxy.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub subject: Option<String>,
    pub is_manager: bool,
}

impl Identity {
    pub fn require_subject(&self) -> Result<&str, AppError> {
        self.subject.as_deref().ok_or(AppError::MissingIdentity)
    }

    pub fn require_manager(&self) -> Result<(), AppError> {
        if self.is_manager {
            Ok(())
        } else {
            Err(AppError::ManagerRequired)
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let subject = parts
            .headers
            .get(SUBJECT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let is_manager = parts
            .headers
            .get(MANAGER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        Ok(Identity {
            subject,
            is_manager,
        })
    }
}

// --- Query Parameters ---

#[derive(Debug, Deserialize, Default)]
pub struct PeriodQuery {
    pub month: Option<String>,
    pub year: Option<String>,
    pub day: Option<String>,
}

impl PeriodQuery {
    fn period(&self) -> Result<ReportPeriod, AppError> {
        Ok(ReportPeriod::from_query(
            self.month.as_deref(),
            self.year.as_deref(),
        )?)
    }

    fn day(&self) -> Result<Option<NaiveDate>, AppError> {
        match self.day.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(day) => parse_date(day).map(Some),
            None => Ok(None),
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| AppError::InvalidDate(value.to_string()))
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_activity(
    State(state): State<AppState>,
    identity: Identity,
    Json(batch): Json<BatchSubmission>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    let subject = identity.require_subject()?;
    let outcome = reconcile(state.store.as_ref(), subject, &batch).await?;
    Ok(Json(outcome))
}

async fn get_report(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<SubjectReport>, AppError> {
    let subject = identity.require_subject()?;
    let period = query.period()?;
    let day = query.day()?;
    let report = build_subject_report(state.store.as_ref(), subject, period, day).await?;
    Ok(Json(report))
}

async fn get_day_detail(
    State(state): State<AppState>,
    identity: Identity,
    Path(date): Path<String>,
) -> Result<Json<Vec<DayActivity>>, AppError> {
    let subject = identity.require_subject()?;
    let date = parse_date(&date)?;
    Ok(Json(day_detail(state.store.as_ref(), subject, date).await?))
}

async fn get_years(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<i32>>, AppError> {
    let subject = identity.require_subject()?;
    Ok(Json(distinct_years(state.store.as_ref(), subject).await?))
}

async fn manager_dashboard(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<FleetOverview>, AppError> {
    identity.require_manager()?;
    let period = query.period()?;
    info!("Building fleet overview for {}", period);
    let overview =
        fleet_aggregate(state.store.clone(), state.admin_requests.as_ref(), period).await?;
    Ok(Json(overview))
}

async fn manager_employee(
    State(state): State<AppState>,
    identity: Identity,
    Path(subject): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Result<Json<EmployeeBreakdown>, AppError> {
    identity.require_manager()?;
    let period = query.period()?;
    Ok(Json(
        employee_breakdown(state.store.as_ref(), &subject, period).await?,
    ))
}

pub fn router(state: AppState) -> Router {
    let manager_routes = Router::new()
        .route("/dashboard", get(manager_dashboard))
        .route("/employees/{subject}", get(manager_employee));

    let api_routes = Router::new()
        .route("/activity", post(submit_activity))
        .route("/activity/{date}", get(get_day_detail))
        .route("/report", get(get_report))
        .route("/years", get(get_years))
        .nest("/manager", manager_routes);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
