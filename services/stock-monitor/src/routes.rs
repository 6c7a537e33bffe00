//! HTTP routes for the monitor service.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use crate::data::{CalendarCacheStats, DailySnapshotRow, LocalStorageStats, SnapshotFetch, SnapshotSource};
use crate::error::MonitorError;
use crate::scheduler::{Job, JobStatus, SchedulerError, SchedulerStatus};
use crate::screener::ScreenerResult;
use crate::{MonitorState, STATUS_REPORT_LIMIT};

/// Build the API router.
pub fn router(state: Arc<MonitorState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/stocks/today", get(get_today))
        .route("/api/v1/stocks/update", post(update_stocks))
        .route("/api/v1/stocks/screened", get(get_screened))
        .route("/api/v1/calendar/sync", post(sync_calendar))
        .route("/api/v1/scheduler/status", get(scheduler_status))
        .route("/api/v1/storage/stats", get(storage_stats))
        .with_state(state)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Outcome of a mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Noop,
    Failure,
}

impl From<JobStatus> for OperationStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Succeeded => Self::Success,
            JobStatus::Noop => Self::Noop,
            JobStatus::Failed => Self::Failure,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub status: OperationStatus,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct TodayResponse {
    pub trade_date: NaiveDate,
    pub source: Option<SnapshotSource>,
    pub count: usize,
    pub stocks: Vec<DailySnapshotRow>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub storage: LocalStorageStats,
    pub calendar_cache: CalendarCacheStats,
}

/// Failure response: a status code and a client-safe reason.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        tracing::error!(error = %err, "Request failed");
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.public_message(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = OperationResponse {
            status: OperationStatus::Failure,
            message: self.message,
            data: serde_json::Value::Null,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "stock-monitor".to_string(),
    })
}

/// Resolved trading date with its snapshot; nothing is persisted
pub async fn get_today(
    State(state): State<Arc<MonitorState>>,
) -> Result<Json<TodayResponse>, ApiError> {
    let resolved = state.pipeline.current_snapshot().await?;

    let (stocks, source) = match resolved.fetch {
        SnapshotFetch::Rows { rows, source } => (rows, Some(source)),
        SnapshotFetch::Empty => (Vec::new(), None),
    };

    Ok(Json(TodayResponse {
        trade_date: resolved.trade_date,
        source,
        count: stocks.len(),
        stocks,
    }))
}

/// Run daily ingestion now
pub async fn update_stocks(
    State(state): State<Arc<MonitorState>>,
) -> Result<Json<OperationResponse>, ApiError> {
    run_job(&state, Job::DailyIngestion).await
}

/// Reconcile the trading calendar now
pub async fn sync_calendar(
    State(state): State<Arc<MonitorState>>,
) -> Result<Json<OperationResponse>, ApiError> {
    run_job(&state, Job::CalendarSync).await
}

async fn run_job(state: &MonitorState, job: Job) -> Result<Json<OperationResponse>, ApiError> {
    let execution = state.scheduler.trigger(job).await?;
    let output = execution.result?;

    Ok(Json(OperationResponse {
        status: output.status.into(),
        message: output.message,
        data: output.data,
    }))
}

/// Screen the stored history
pub async fn get_screened(
    State(state): State<Arc<MonitorState>>,
) -> Result<Json<ScreenerResult>, ApiError> {
    let result = state
        .screener
        .run_screen()
        .await
        .map_err(MonitorError::transaction)?;
    Ok(Json(result))
}

/// Scheduler state and recent job reports
pub async fn scheduler_status(State(state): State<Arc<MonitorState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status(STATUS_REPORT_LIMIT).await)
}

/// Store and calendar cache statistics
pub async fn storage_stats(
    State(state): State<Arc<MonitorState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let storage = state
        .storage
        .get_stats()
        .await
        .map_err(MonitorError::transaction)?;

    Ok(Json(StatsResponse {
        storage,
        calendar_cache: state.calendar_cache.stats(),
    }))
}
