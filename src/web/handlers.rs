//! Probe handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use super::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct LivenessReport {
    pub status: &'static str,
}

/// Liveness probe. Degrades to 503 when the database is unreachable.
pub async fn liveness(State(state): State<AppState>) -> ApiResult<LivenessReport> {
    match state.database.ping().await {
        Ok(()) => Ok(Json(ApiResponse::success(LivenessReport {
            status: "healthy",
        }))),
        Err(e) => {
            error!("Liveness probe failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(format!("unhealthy: {}", e))),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    pub armed_jobs: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub last_reconcile: Option<DateTime<Utc>>,
}

/// Keep-alive probe returning scheduler statistics.
pub async fn scheduler_stats(State(state): State<AppState>) -> ApiResult<StatsReport> {
    let stats = state.dispatcher.stats().await;
    let uptime_seconds = (Utc::now() - stats.started_at).num_seconds();
    Ok(Json(ApiResponse::success(StatsReport {
        armed_jobs: stats.armed_jobs,
        started_at: stats.started_at,
        uptime_seconds,
        last_reconcile: stats.last_reconcile,
    })))
}
