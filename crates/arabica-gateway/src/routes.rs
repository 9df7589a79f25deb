//! API route handlers for the gateway.
//!
//! Every response uses the `{"success": true, ...}` / `{"success": false, "error": "..."}`
//! envelope. Report operations touch the file store, so they run on the blocking pool.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use arabica_core::ArabicaError;
use arabica_scheduler::{LifecycleEngine, ReportKind, ReportStatus};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use super::server::AppState;

/// Error response in the standard envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ArabicaError> for ApiError {
    fn from(err: ArabicaError) -> Self {
        let status = match &err {
            ArabicaError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {err}");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"success": false, "error": self.message}))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn parse_kind(raw: &str) -> Result<ReportKind, ApiError> {
    raw.parse::<ReportKind>().map_err(|_| {
        ApiError::from(ArabicaError::not_found("report kind", raw))
    })
}

/// Run a store-touching engine call off the async workers.
async fn with_engine<T, F>(state: &AppState, kind: &str, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&LifecycleEngine) -> arabica_core::Result<T> + Send + 'static,
{
    let engine = state.engine(parse_kind(kind)?).clone();
    match tokio::task::spawn_blocking(move || f(&engine)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("internal error: {e}"),
        }),
    }
}

/// Health check.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "connections": state.presence.connection_count(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub date: Option<String>,
    pub status: Option<String>,
}

/// List active reports, optionally by `date` (YYYY-MM-DD) and `status`.
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<ReportQuery>,
) -> ApiResult {
    let date = query
        .date
        .as_deref()
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| ArabicaError::Validation(format!("date must be YYYY-MM-DD, got '{d}'")))
        })
        .transpose()?;
    let status = query.status.as_deref().map(str::parse::<ReportStatus>).transpose()?;

    let reports = with_engine(&state, &kind, move |engine| engine.list(date, status)).await?;
    Ok(Json(json!({"success": true, "count": reports.len(), "reports": reports})))
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult {
    let report = with_engine(&state, &kind, move |engine| engine.get(&id)).await?;
    Ok(Json(json!({"success": true, "report": report})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(default)]
    pub employee_id: String,
    #[serde(default)]
    pub employee_name: String,
}

/// Employee submits a pending report for review.
pub async fn submit_report(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let report = with_engine(&state, &kind, move |engine| {
        engine.submit(&id, &body.employee_id, &body.employee_name)
    })
    .await?;
    Ok(Json(json!({"success": true, "report": report})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    #[serde(default)]
    pub admin_name: String,
    #[serde(default)]
    pub rating: Option<u8>,
}

pub async fn approve_report(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
    body: Result<Json<ApproveBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let report = with_engine(&state, &kind, move |engine| {
        engine.approve(&id, &body.admin_name, body.rating)
    })
    .await?;
    Ok(Json(json!({"success": true, "report": report})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectBody {
    #[serde(default)]
    pub admin_name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn reject_report(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
    body: Result<Json<RejectBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let report = with_engine(&state, &kind, move |engine| {
        engine.reject(&id, &body.admin_name, body.reason)
    })
    .await?;
    Ok(Json(json!({"success": true, "report": report})))
}

/// Run one lifecycle tick now.
pub async fn run_tick(State(state): State<Arc<AppState>>, Path(kind): Path<String>) -> ApiResult {
    let engine = state.engine(parse_kind(&kind)?);
    match arabica_scheduler::run_tick(engine).await {
        Some(report) => Ok(Json(json!({"success": true, "tick": report}))),
        None => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "tick crashed, see server logs".into(),
        }),
    }
}

/// Penalty ledger entries for a `YYYY-MM` month.
pub async fn month_penalties(State(state): State<Arc<AppState>>, Path(month): Path<String>) -> ApiResult {
    let ledger = state.ledger.clone();
    let penalties = tokio::task::spawn_blocking(move || ledger.month(&month))
        .await
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("internal error: {e}"),
        })??;
    let total: f64 = penalties
        .iter()
        .filter_map(|p| p.get("points").and_then(Value::as_f64))
        .sum();
    Ok(Json(json!({
        "success": true,
        "count": penalties.len(),
        "totalPoints": total,
        "penalties": penalties,
    })))
}

/// Identities currently connected to the chat socket.
pub async fn online_users(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "users": state.presence.online_users(),
        "connections": state.presence.connection_count(),
    }))
}

/// Recent notifications (last 100).
pub async fn notifications(State(state): State<Arc<AppState>>) -> Json<Value> {
    let history = state.notifier.history();
    Json(json!({"success": true, "count": history.len(), "notifications": history}))
}
