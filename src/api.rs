//! REST API server for the portfolio rebalancer
//!
//! Exposes drift analysis, rebalance execution, and per-account history
//! over HTTP for dashboards and operators.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::RebalanceError;
use crate::service::{AnalyzeRequest, RebalanceRequest, RebalanceService};

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<RebalanceService>,
}

fn error_status(error: &RebalanceError) -> StatusCode {
    match error {
        RebalanceError::InvalidTarget(_) | RebalanceError::Plan(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analysis Endpoint
/// =============================

async fn run_analysis(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(account = %req.account, "Received analyze request");

    match state.service.analyze(req).await {
        Ok(analysis) => (StatusCode::OK, Json(ApiResponse::success(analysis))),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::error(format!("Analysis failed: {}", e))),
        ),
    }
}

/// =============================
/// Rebalance Endpoint
/// =============================

async fn run_rebalance(
    State(state): State<ApiState>,
    Json(req): Json<RebalanceRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(
        account = %req.account,
        dry_run = req.dry_run,
        "Received rebalance request"
    );

    match state.service.rebalance(req).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::error(format!("Rebalance failed: {}", e))),
        ),
    }
}

/// =============================
/// History Endpoint
/// =============================

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn account_history(
    State(state): State<ApiState>,
    Path(account): Path<String>,
    Query(params): Query<HistoryParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let limit = params.limit.unwrap_or(10).min(100);

    match state.service.recent_outcomes(&account, limit).await {
        Ok(outcomes) => (StatusCode::OK, Json(ApiResponse::success(outcomes))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("History lookup failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(service: Arc<RebalanceService>) -> Router {
    let state = ApiState { service };

    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(run_analysis))
        .route("/api/rebalance", post(run_rebalance))
        .route("/api/accounts/:account/history", get(account_history))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(service: Arc<RebalanceService>, port: u16) -> crate::Result<()> {
    let router = create_router(service);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
