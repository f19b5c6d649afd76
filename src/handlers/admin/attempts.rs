use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::{AttemptQuery, AttemptStats, SuspiciousIp, VerificationAttempt};

#[derive(Debug, Serialize)]
pub struct AttemptsResponse {
    pub attempts: Vec<VerificationAttempt>,
    pub total: i64,
}

/// GET /admin/attempts — filtered, paginated attempt log.
pub async fn query_attempts(
    State(state): State<AppState>,
    Query(query): Query<AttemptQuery>,
) -> Result<Json<AttemptsResponse>> {
    let (attempts, total) = state.audit.query(&query)?;
    Ok(Json(AttemptsResponse { attempts, total }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_window_hours")]
    pub hours: i64,
}

fn default_window_hours() -> i64 {
    24
}

/// GET /admin/attempts/stats
pub async fn attempt_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<AttemptStats>> {
    let stats = state.audit.stats(query.hours.clamp(1, 24 * 90))?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct SuspiciousQuery {
    #[serde(default = "default_window_hours")]
    pub hours: i64,
    #[serde(default = "default_min_attempts")]
    pub min_attempts: i64,
}

fn default_min_attempts() -> i64 {
    10
}

/// GET /admin/attempts/suspicious — the abuse-detection signal.
pub async fn suspicious_ips(
    State(state): State<AppState>,
    Query(query): Query<SuspiciousQuery>,
) -> Result<Json<Vec<SuspiciousIp>>> {
    let ips = state
        .audit
        .suspicious_ips(query.hours.clamp(1, 24 * 90), query.min_attempts.max(1))?;
    Ok(Json(ips))
}

#[derive(Debug, Deserialize)]
pub struct PurgeBody {
    pub retention_days: i64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

/// POST /admin/attempts/purge — retention cleanup.
pub async fn purge_attempts(
    State(state): State<AppState>,
    Json(body): Json<PurgeBody>,
) -> Result<Json<PurgeResponse>> {
    let purged = state.audit.purge(body.retention_days)?;
    Ok(Json(PurgeResponse { purged }))
}
