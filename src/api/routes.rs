//! API route definitions.
//!
//! Every analysis handler resolves its window from the query string, runs
//! the section on the blocking pool and wraps the result in the
//! `{ "data": ..., "meta": ... }` envelope.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use super::state::AppState;
use crate::analysis::aggregator;
use crate::analysis::correlation::CorrelationEngine;
use crate::analysis::runner;
use crate::analysis::trend::Bucket;
use crate::config::AnalyticsConfig;
use crate::export;
use crate::logs::{LogFilter, NetworkAction, Table, TimeWindow, WindowError};
use crate::storage::Freshness;

const NO_DATA: &str = "no data available";

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/overview", get(overview))
        .route("/trends", get(trends))
        .route("/anomalies", get(anomalies))
        .route("/alerts", get(alerts))
        .route("/correlation", get(correlation))
        .route("/report", get(report))
        .route("/export/{table}", get(export_table))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl From<WindowError> for ApiError {
    fn from(e: WindowError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(msg) => {
                warn!(error = %msg, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "data": null, "meta": { "error": self.to_string() } });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisQuery {
    start: Option<String>,
    end: Option<String>,
    days: Option<u32>,
    bucket: Option<Bucket>,
    limit: Option<usize>,
    /// Bypass the snapshot cache.
    #[serde(default)]
    fresh: bool,
    user_id: Option<String>,
    function_name: Option<String>,
    action: Option<String>,
}

/// Open-ended windows end at the current minute for cached reads, so
/// repeated requests share a snapshot cache key.
fn window_anchor(now: DateTime<Utc>, freshness: Freshness) -> DateTime<Utc> {
    match freshness {
        Freshness::Exact => now,
        Freshness::Cached => now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now),
    }
}

impl AnalysisQuery {
    fn window(&self, config: &AnalyticsConfig) -> Result<TimeWindow, ApiError> {
        let days = self.days.unwrap_or(config.analysis.window_days);
        Ok(TimeWindow::resolve(
            self.start.as_deref(),
            self.end.as_deref(),
            days,
            window_anchor(Utc::now(), self.freshness()),
        )?)
    }

    fn freshness(&self) -> Freshness {
        if self.fresh {
            Freshness::Exact
        } else {
            Freshness::Cached
        }
    }

    fn config(&self, base: &AnalyticsConfig) -> AnalyticsConfig {
        let mut config = base.clone();
        if let Some(bucket) = self.bucket {
            config.analysis.bucket = bucket;
        }
        config
    }

    fn filter(&self) -> Result<LogFilter, ApiError> {
        let action = self
            .action
            .as_deref()
            .map(str::parse::<NetworkAction>)
            .transpose()
            .map_err(ApiError::BadRequest)?;
        Ok(LogFilter {
            user_id: self.user_id.clone(),
            function_name: self.function_name.clone(),
            action,
        })
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("analysis task failed: {}", e)))
}

fn envelope<T: Serialize>(data: &T, window: &TimeWindow, empty: bool) -> Result<Json<Value>, ApiError> {
    let data = serde_json::to_value(data).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut meta = json!({
        "window": { "start": window.start().to_rfc3339(), "end": window.end().to_rfc3339() },
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    if empty {
        meta["message"] = json!(NO_DATA);
    }
    Ok(Json(json!({ "data": data, "meta": meta })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "db_path": state.store.path().display().to_string(),
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn overview(State(state): State<AppState>, Query(q): Query<AnalysisQuery>) -> Result<Json<Value>, ApiError> {
    let window = q.window(&state.config)?;
    let freshness = q.freshness();
    let store = state.store.clone();
    let metrics = blocking(move || {
        let snapshot = store.snapshot(&window, freshness);
        aggregator::overview(&snapshot.access, &snapshot.execution, &snapshot.network)
    })
    .await?;
    envelope(&metrics, &window, metrics.total_requests == 0)
}

async fn trends(State(state): State<AppState>, Query(q): Query<AnalysisQuery>) -> Result<Json<Value>, ApiError> {
    let window = q.window(&state.config)?;
    let freshness = q.freshness();
    let config = q.config(&state.config);
    let store = state.store.clone();
    let report = blocking(move || runner::trend_section(&store.snapshot(&window, freshness), &config)).await?;
    envelope(&report, &window, report.is_empty())
}

async fn anomalies(State(state): State<AppState>, Query(q): Query<AnalysisQuery>) -> Result<Json<Value>, ApiError> {
    let window = q.window(&state.config)?;
    let freshness = q.freshness();
    let config = q.config(&state.config);
    let store = state.store.clone();
    let flags = blocking(move || runner::anomaly_section(&store.snapshot(&window, freshness), &config)).await?;
    envelope(&flags, &window, flags.is_empty())
}

async fn alerts(State(state): State<AppState>, Query(q): Query<AnalysisQuery>) -> Result<Json<Value>, ApiError> {
    let window = q.window(&state.config)?;
    let freshness = q.freshness();
    let config = q.config(&state.config);
    let store = state.store.clone();
    let alerts = blocking(move || {
        let snapshot = store.snapshot(&window, freshness);
        let flags = runner::anomaly_section(&snapshot, &config);
        runner::alert_section(&snapshot, &config, &flags)
    })
    .await?;
    envelope(&alerts, &window, alerts.is_empty())
}

async fn correlation(State(state): State<AppState>, Query(q): Query<AnalysisQuery>) -> Result<Json<Value>, ApiError> {
    let window = q.window(&state.config)?;
    let limit = q.limit.unwrap_or(state.config.analysis.correlation_limit);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be at least 1".to_string()));
    }
    let store = state.store.clone();
    let view = blocking(move || CorrelationEngine::new(store, limit).correlate(&window)).await?;
    envelope(&view, &window, view.is_empty())
}

async fn report(State(state): State<AppState>, Query(q): Query<AnalysisQuery>) -> Result<Json<Value>, ApiError> {
    let window = q.window(&state.config)?;
    let freshness = q.freshness();
    let config = q.config(&state.config);
    let store = state.store.clone();
    let report = blocking(move || runner::run_report(&store, &window, &config, freshness)).await?;
    envelope(&report, &window, report.is_empty())
}

async fn export_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<AnalysisQuery>,
) -> Result<Response, ApiError> {
    let table: Table = table.parse().map_err(ApiError::BadRequest)?;
    let window = q.window(&state.config)?;
    let filter = q.filter()?;
    let store = state.store.clone();
    let body = blocking(move || {
        let mut buf = Vec::new();
        export::export_table(&store, table, &window, &filter, &mut buf).map(|_| buf)
    })
    .await?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let disposition = format!("attachment; filename=\"{}.csv\"", table.table_name());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
