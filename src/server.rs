// SPDX-License-Identifier: Apache-2.0

//! HTTP surface: `POST /query`, `GET /` and `GET /metrics`.

use std::io;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use fedquery_core::{FederationError, QueryResult};

use crate::metrics::{self, FederationMetricsSnapshot};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub results: Vec<Map<String, Value>>,
    pub columns: Vec<String>,
    pub execution_time_ms: f64,
    pub timestamp: String,
    pub source_tables: Vec<String>,
}

impl From<QueryResult> for QueryResponse {
    fn from(result: QueryResult) -> Self {
        Self {
            results: result.rows,
            columns: result.columns,
            execution_time_ms: result.execution_time_ms,
            timestamp: chrono::Utc::now().to_rfc3339(),
            source_tables: result.source_tables,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub message: String,
    pub available_tables: Vec<String>,
}

/// Error returned to HTTP clients as `{"detail": "..."}`.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            detail: err.to_string(),
        }
    }
}

/// Malformed bodies, wrong content type and missing fields are all 400.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: format!("Invalid request body: {}", rejection.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_info))
        .route("/query", post(execute_query))
        .route("/metrics", get(metrics_snapshot))
        .with_state(state)
}

async fn execute_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(payload) = payload?;
    let result = state.federator.execute_query(&payload.query).await?;
    Ok(Json(result.into()))
}

async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Distributed Query Service".to_string(),
        available_tables: state
            .federator
            .registry()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

async fn metrics_snapshot() -> Json<FederationMetricsSnapshot> {
    Json(metrics::snapshot())
}

/// Serves until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> io::Result<()> {
    let app = create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
