// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// HTTP API
//
// Routes:
//   POST /api/v1/analyses                submit an artifact (202)
//   GET  /api/v1/analyses                caller's history, newest first
//   GET  /api/v1/analyses/{id}           one analysis with its breakdown
//   POST /api/v1/analyses/{id}/cancel    cancel an in-flight analysis
//   GET  /api/v1/credits/balance         current balance
//   POST /api/v1/credits/purchase        add credits
//   GET  /api/v1/credits/transactions    transaction feed, newest first
//
// The caller is identified by the `x-user-id` header (a UUID). Auth proper
// terminates upstream; this service only scopes data per user.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::application::{AnalysisError, AnalysisService};
use crate::domain::analysis::{AnalysisId, Artifact, UserId};
use crate::domain::credit::{LedgerError, TransactionCursor};
use crate::domain::repository::HistoryCursor;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

pub struct AppState {
    pub analysis_service: Arc<dyn AnalysisService>,
}

pub fn app(service: Arc<dyn AnalysisService>) -> Router {
    let state = Arc::new(AppState { analysis_service: service });

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/analyses", post(submit_analysis).get(list_analyses))
        .route("/api/v1/analyses/{id}", get(get_analysis))
        .route("/api/v1/analyses/{id}/cancel", post(cancel_analysis))
        .route("/api/v1/credits/balance", get(get_balance))
        .route("/api/v1/credits/purchase", post(purchase_credits))
        .route("/api/v1/credits/transactions", get(list_transactions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

enum ApiError {
    BadRequest(String),
    Service(AnalysisError),
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ApiError::Service(err) => match err {
                AnalysisError::InsufficientBalance { balance, required } => (
                    StatusCode::PAYMENT_REQUIRED,
                    json!({
                        "error": "insufficient balance",
                        "balance": balance,
                        "required": required,
                    }),
                ),
                AnalysisError::NotFound => {
                    (StatusCode::NOT_FOUND, json!({ "error": "analysis not found" }))
                }
                AnalysisError::AlreadyCompleted(id) => (
                    StatusCode::CONFLICT,
                    json!({ "error": format!("analysis {} already completed", id) }),
                ),
                AnalysisError::NotBillable(id) => (
                    StatusCode::CONFLICT,
                    json!({ "error": format!("analysis {} was not billed", id) }),
                ),
                AnalysisError::Ledger(LedgerError::InvalidAmount(amount)) => (
                    StatusCode::BAD_REQUEST,
                    json!({ "error": format!("invalid amount: {}", amount) }),
                ),
                AnalysisError::Ledger(LedgerError::AccountNotFound(_)) => {
                    (StatusCode::NOT_FOUND, json!({ "error": "account not found" }))
                }
                other => {
                    error!("request failed: {}", other);
                    (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
                }
            },
        };
        (status, Json(body)).into_response()
    }
}

fn caller(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing x-user-id header".to_string()))?;
    Uuid::parse_str(raw)
        .map(UserId)
        .map_err(|_| ApiError::BadRequest("x-user-id must be a UUID".to_string()))
}

fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct SubmitRequest {
    text: String,
    #[serde(default)]
    context: Option<String>,
}

async fn submit_analysis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let artifact = Artifact { text: payload.text, context: payload.context };
    let id = state.analysis_service.submit(user, artifact).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id.to_string(), "status": "pending" })),
    )
        .into_response())
}

async fn get_analysis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    let analysis = state.analysis_service.get(user, AnalysisId(id)).await?;
    Ok(Json(analysis).into_response())
}

async fn cancel_analysis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    state.analysis_service.cancel(user, AnalysisId(id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    before_submitted_at: Option<DateTime<Utc>>,
    before_id: Option<Uuid>,
}

async fn list_analyses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    let cursor = match (query.before_submitted_at, query.before_id) {
        (Some(submitted_at), Some(id)) => {
            Some(HistoryCursor { submitted_at, id: AnalysisId(id) })
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "before_submitted_at and before_id must be supplied together".to_string(),
            ))
        }
    };
    // Fetch one extra row to decide whether another page exists
    let limit = page_limit(query.limit);
    let mut items = state
        .analysis_service
        .history(user, cursor, limit + 1)
        .await?;
    let has_more = items.len() > limit;
    items.truncate(limit);
    let next = if has_more {
        items.last().map(|a| json!({
            "before_submitted_at": a.submitted_at,
            "before_id": a.id,
        }))
    } else {
        None
    };
    Ok(Json(json!({ "items": items, "next": next })).into_response())
}

async fn get_balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    let balance = state.analysis_service.balance(user).await?;
    Ok(Json(json!({ "balance": balance })).into_response())
}

#[derive(Deserialize)]
struct PurchaseRequest {
    amount: i64,
}

async fn purchase_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<PurchaseRequest>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    let balance = state.analysis_service.purchase(user, payload.amount).await?;
    Ok(Json(json!({ "balance": balance })).into_response())
}

#[derive(Deserialize)]
struct TransactionsQuery {
    limit: Option<usize>,
    before_created_at: Option<DateTime<Utc>>,
    before_id: Option<Uuid>,
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TransactionsQuery>,
) -> Result<Response, ApiError> {
    let user = caller(&headers)?;
    let cursor = match (query.before_created_at, query.before_id) {
        (Some(created_at), Some(id)) => Some(TransactionCursor { created_at, id }),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "before_created_at and before_id must be supplied together".to_string(),
            ))
        }
    };
    let page = state
        .analysis_service
        .transactions(user, cursor, page_limit(query.limit))
        .await?;
    Ok(Json(json!({
        "items": page.items,
        "next": page.next.map(|c| json!({
            "before_created_at": c.created_at,
            "before_id": c.id,
        })),
    }))
    .into_response())
}
