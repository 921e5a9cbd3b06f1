//! HTTP surface: batch ingest, position queries, anchor listing.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use position_types::{Anchor, BatchValidationError, MeasurementBatch, ResolvedPosition};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::engine::{BatchReport, PositionEngine};
use crate::error::EngineError;

/// Default page size for history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

pub type SharedEngine = Arc<PositionEngine>;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Validation(BatchValidationError),
    AnchorNotFound(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<BatchValidationError> for ApiError {
    fn from(e: BatchValidationError) -> Self {
        Self::Validation(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Engine(e) => match e {
                EngineError::InvalidRange { .. } | EngineError::LimitExceeded { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::PersistenceFailure { .. } | EngineError::Store { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AnchorNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.code(),
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AnchorNotFound(_) => "NOT_FOUND",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Engine(e) => e.to_string(),
            Self::Validation(e) => e.to_string(),
            Self::AnchorNotFound(id) => format!("anchor '{id}' not found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("HTTP {}: {}", status.as_u16(), self.message());
        }
        let body = Json(json!({ "error_code": self.code(), "message": self.message() }));
        (status, body).into_response()
    }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router(engine: SharedEngine) -> Router {
    let api = Router::new()
        .route("/measurements", post(submit_batch))
        .route("/positions/current/:tag_id", get(current_position))
        .route("/positions/history/:tag_id", get(position_history))
        .route("/anchors", get(list_anchors))
        .route("/anchors/:anchor_id", get(get_anchor));

    Router::new()
        .route("/sync", get(time_sync))
        .nest("/api/v1", api)
        .with_state(engine)
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

async fn time_sync() -> Json<Value> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    Json(json!({ "serverTime": now }))
}

async fn submit_batch(
    State(engine): State<SharedEngine>,
    Json(batch): Json<MeasurementBatch>,
) -> Result<(StatusCode, Json<BatchReport>), ApiError> {
    batch.validate()?;
    let report = engine.process_batch(batch).await;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

async fn current_position(
    State(engine): State<SharedEngine>,
    Path(tag_id): Path<String>,
) -> Result<Json<ResolvedPosition>, ApiError> {
    Ok(Json(engine.reader().current(&tag_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub limit: Option<usize>,
}

async fn position_history(
    State(engine): State<SharedEngine>,
    Path(tag_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ResolvedPosition>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let rows = engine
        .reader()
        .history(&tag_id, params.start_time, params.end_time, limit)
        .await?;
    Ok(Json(rows))
}

async fn list_anchors(State(engine): State<SharedEngine>) -> Json<Vec<Anchor>> {
    Json(engine.directory().anchors())
}

async fn get_anchor(
    State(engine): State<SharedEngine>,
    Path(anchor_id): Path<String>,
) -> Result<Json<Anchor>, ApiError> {
    engine
        .directory()
        .anchor(&anchor_id)
        .map(Json)
        .ok_or(ApiError::AnchorNotFound(anchor_id))
}
