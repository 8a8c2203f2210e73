use crate::AppState;
use crate::auth::ClientId;
use crate::error::ApiError;
use axum::Extension;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use fetchgate_core::BulkSummary;
use fetchgate_fetcher::{BulkFetchRequest, FetchRequest};
use serde::Deserialize;
use serde_json::{Value, json};

pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

impl ListParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "fetchgate",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "features": [
            "response caching",
            "rate limiting",
            "domain filtering",
            "bulk fetching",
            "intelligence recording",
        ],
    }))
}

pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.proxy.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

pub async fn fetch(
    State(state): State<AppState>,
    Extension(ClientId(client)): Extension<ClientId>,
    payload: Result<Json<FetchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let result = state.proxy.fetch(request, &client).await;
    let status = match result.failure {
        Some(kind) => StatusCode::from_u16(kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        None => StatusCode::OK,
    };

    Ok((status, Json(result)).into_response())
}

pub async fn fetch_bulk(
    State(state): State<AppState>,
    Extension(ClientId(client)): Extension<ClientId>,
    payload: Result<Json<BulkFetchRequest>, JsonRejection>,
) -> Result<Json<BulkSummary>, ApiError> {
    let batch = json_body(payload)?;
    let results = state.proxy.bulk_fetch(batch, &client).await;
    Ok(Json(BulkSummary::from_results(&results)))
}

pub async fn list_intelligence(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let recorder = state.proxy.recorder();
    let records = recorder.list(params.limit()).await?;
    let total = recorder.count().await?;

    Ok(Json(json!({
        "total_records": total,
        "records": records,
    })))
}

pub async fn list_blocked(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let recorder = state.proxy.recorder();
    let recent = recorder.blocked(params.limit()).await?;
    let total = recorder.blocked_count().await?;

    Ok(Json(json!({
        "total": total,
        "recent_count": recent.len(),
        "recent": recent,
    })))
}

pub async fn show_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.proxy.config().await.sanitized())
}

pub async fn reload_config(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state
        .proxy
        .reload_config()
        .await
        .map_err(|e| ApiError::Reload(e.to_string()))?;

    Ok(Json(json!({
        "status": "reloaded",
        "config": config.sanitized(),
    })))
}

pub async fn housekeeping(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = state.proxy.housekeeping(None).await?;
    Ok(Json(json!({
        "status": "completed",
        "deleted_records": report.deleted_records,
        "remaining_records": report.remaining_records,
        "expired_cache_entries": report.expired_cache_entries,
    })))
}
