// src/main.rs
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use std::{
    fs::File,
    io,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    sync::Arc,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregator;
mod api;
mod cli;
mod config;
mod fleet;
mod interval;
mod models;
mod reconciler;
mod report;
mod store;

#[cfg(test)]
mod reconciler_tests;

use cli::{Cli, Cmds, ExportCmd, PeriodArgs, ReportCmd};
use config::Config;
use interval::IntervalError;
use models::{PeriodError, ReportPeriod};
use reconciler::ReconcileError;
use store::{ActivityStore, AdminRequestSource, SqliteActivityStore, StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Reconcile(#[from] ReconcileError),
    #[error("{0}")]
    Period(#[from] PeriodError),
    #[error("date '{0}' is not a valid YYYY-MM-DD date")]
    InvalidDate(String),
    #[error("Request carries no subject identity")]
    MissingIdentity,
    #[error("Manager privileges required")]
    ManagerRequired,
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn store_unavailable() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        serde_json::json!({ "error": "Activity store unavailable." }),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Reconcile(ReconcileError::InvalidInterval { index, source }) => {
                warn!("Rejected batch: {}", self);
                let mut body = serde_json::json!({
                    "error": source.to_string(),
                    "index": index,
                    "reason": source.kind(),
                });
                if let IntervalError::InvalidTimeFormat { bound, .. } = source {
                    body["bound"] = serde_json::json!(bound);
                }
                (StatusCode::UNPROCESSABLE_ENTITY, body)
            }
            AppError::Reconcile(ReconcileError::EmptySubject) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({ "error": self.to_string(), "reason": "EmptySubject" }),
            ),
            AppError::Reconcile(ReconcileError::Store(e)) | AppError::Store(e) => {
                error!("Store failure: {:?}", e);
                store_unavailable()
            }
            AppError::Period(_) | AppError::InvalidDate(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": self.to_string() }),
            ),
            AppError::MissingIdentity => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": self.to_string() }),
            ),
            AppError::ManagerRequired => (
                StatusCode::FORBIDDEN,
                serde_json::json!({ "error": self.to_string() }),
            ),
            AppError::Config(_) | AppError::TlsConfig(_) | AppError::Io(_) => {
                error!("Error occurred: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "Internal server error." }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ActivityStore>,
    pub admin_requests: Arc<dyn AdminRequestSource>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so CLI output on stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.database_url).context("Failed to load configuration")?;

    let store = Arc::new(
        SqliteActivityStore::connect(&config.database_url, config.max_connections)
            .await
            .context("Failed to open activity store")?,
    );
    let state = AppState {
        store: store.clone(),
        admin_requests: store,
    };

    match cli.command.unwrap_or(Cmds::Serve) {
        Cmds::Serve => serve(&config, state).await?,
        Cmds::Report(cmd) => print_report(&state, cmd).await?,
        Cmds::Fleet(args) => print_fleet(&state, args).await?,
        Cmds::Export(cmd) => export_csv(&state, cmd).await?,
    }

    Ok(())
}

fn load_config(database_url: Option<String>) -> Result<Config, AppError> {
    let mut config = Config::from_env()?;
    if let Some(url) = database_url {
        config.database_url = url;
    }
    Ok(config)
}

fn resolve_bind_address(config: &Config) -> Result<SocketAddr, AppError> {
    let bind_address = config.bind_address();
    bind_address.to_socket_addrs()?.next().ok_or_else(|| {
        AppError::Io(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{} resolves to no address", bind_address),
        ))
    })
}

async fn serve(config: &Config, state: AppState) -> Result<(), AppError> {
    let app = api::router(state);
    let addr = resolve_bind_address(config)?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config =
                RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
                    .await
                    .map_err(|e| {
                        let err_msg = format!("Failed to load TLS cert/key: {}", e);
                        error!("{}", err_msg);
                        AppError::TlsConfig(err_msg)
                    })?;
            info!("TLS configuration loaded from {} and {}", cert_path, key_path);

            info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("Listening on http://{}", addr);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

fn period_from_args(args: &PeriodArgs) -> Result<ReportPeriod, PeriodError> {
    ReportPeriod::from_query(args.month.as_deref(), args.year.as_deref())
}

async fn print_report(state: &AppState, cmd: ReportCmd) -> Result<()> {
    let period = period_from_args(&cmd.period)?;
    let day = cmd.day.as_deref().map(api::parse_date).transpose()?;
    let report =
        report::build_subject_report(state.store.as_ref(), &cmd.subject, period, day).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn print_fleet(state: &AppState, args: PeriodArgs) -> Result<()> {
    let period = period_from_args(&args)?;
    let overview =
        fleet::fleet_aggregate(state.store.clone(), state.admin_requests.as_ref(), period)
            .await?;
    println!("{}", serde_json::to_string_pretty(&overview)?);
    Ok(())
}

async fn export_csv(state: &AppState, cmd: ExportCmd) -> Result<()> {
    let period = period_from_args(&cmd.period)?;
    let aggregate = aggregator::aggregate(state.store.as_ref(), &cmd.subject, period).await?;

    match &cmd.out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            report::write_monthly_csv(&aggregate, file)?;
            info!(
                "Exported {} day(s) for {} ({}) to {}",
                aggregate.day_totals.len(),
                cmd.subject,
                period,
                path.display()
            );
        }
        None => report::write_monthly_csv(&aggregate, io::stdout().lock())?,
    }
    Ok(())
}
