//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ServiceState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::engine::checker::CheckReport;
use crate::engine::{AccountChecker, Orchestrator, ReconcileReport, Reconciler, SubmissionReport};
use crate::storage::{BetFilter, Store};
use crate::types::{BetRecord, OverallStatus, Platform, Region, WagerRequest};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub type AppState = Arc<ServiceState>;

pub struct ServiceState {
    pub store: Arc<Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: Arc<Reconciler>,
    pub checker: Arc<AccountChecker>,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BetQuery {
    pub owner: Option<String>,
    pub platform: Option<Platform>,
    pub status: Option<OverallStatus>,
    pub order_code: Option<String>,
    pub region: Option<Region>,
    pub bet_type: Option<String>,
    pub from: Option<chrono::NaiveDate>,
    pub to: Option<chrono::NaiveDate>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BetListResponse {
    pub bets: Vec<BetRecord>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub reconciled: ReconcileReport,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub account_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/bets/submit — place a wager across the owner's accounts.
/// Shape problems are a 400; placement failures come back as a 200 with
/// a structured report.
pub async fn submit_bet(
    State(state): State<AppState>,
    Json(request): Json<WagerRequest>,
) -> Result<Json<SubmissionReport>, (StatusCode, Json<Value>)> {
    if let Err(message) = validate_shape(&request) {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": message }))));
    }
    Ok(Json(state.orchestrator.submit(request).await))
}

/// GET /api/bets — filtered, paginated history. Runs a reconciliation
/// pass first so due settlements appear in the response.
pub async fn list_bets(
    State(state): State<AppState>,
    Query(query): Query<BetQuery>,
) -> Json<BetListResponse> {
    let reconciled = state.reconciler.reconcile_due().await;
    debug!(checked = reconciled.checked, updated = reconciled.updated, "Opportunistic reconcile");

    let filter = BetFilter {
        owner: query.owner,
        platform: query.platform,
        status: query.status,
        order_code: query.order_code,
        region: query.region,
        bet_type: query.bet_type,
        from: query.from,
        to: query.to,
        page: query.page.unwrap_or(0),
        limit: query.limit.unwrap_or(20).clamp(1, 200),
    };
    let (bets, total) = state.store.bets(&filter);
    Json(BetListResponse {
        bets,
        total,
        page: filter.page,
        limit: filter.limit,
        reconciled,
    })
}

/// GET /api/bets/:order_code — one record or 404.
pub async fn get_bet(
    State(state): State<AppState>,
    Path(order_code): Path<String>,
) -> Result<Json<BetRecord>, (StatusCode, Json<Value>)> {
    state.store.bet(&order_code).map(Json).ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no bet with order code {order_code}") })),
    ))
}

/// POST /api/accounts/check — bulk status/balance check.
pub async fn check_accounts(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Json<CheckReport> {
    Json(state.checker.check_accounts(&request.account_ids).await)
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn validate_shape(request: &WagerRequest) -> Result<(), String> {
    if request.owner.trim().is_empty() {
        return Err("owner is required".to_string());
    }
    if request.bet_type.trim().is_empty() {
        return Err("bet type is required".to_string());
    }
    if request.numbers.is_empty() {
        return Err("at least one number is required".to_string());
    }
    if request.channels.is_empty() {
        return Err("at least one channel is required".to_string());
    }
    if request.points <= 0.0 {
        return Err("points must be positive".to_string());
    }
    if request.worker_count == 0 {
        return Err("worker count must be at least 1".to_string());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
