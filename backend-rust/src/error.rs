//! Engine and store error taxonomy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the position resolution engine.
///
/// `DegenerateInput` is absorbed by the solver's centroid fallback in normal
/// operation; it only escapes when too few distinct anchors remain after
/// deduplication.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "error_code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineError {
    #[error("tag {tag_id}: only {distinct_anchors} distinct anchors, {required} required")]
    InsufficientData { tag_id: String, distinct_anchors: usize, required: usize },

    #[error("degenerate input: {usable} usable ranges, {required} required")]
    DegenerateInput { usable: usize, required: usize },

    #[error("tag {tag_id}: durable write failed: {reason}")]
    PersistenceFailure { tag_id: String, reason: String },

    #[error("invalid range: from {from} is not before to {to}")]
    InvalidRange { from: DateTime<Utc>, to: DateTime<Utc> },

    #[error("limit {limit} exceeds maximum {max}")]
    LimitExceeded { limit: usize, max: usize },

    #[error("position for tag '{tag_id}' not found")]
    NotFound { tag_id: String },

    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    /// Stable machine-readable code, matching the serialized `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::DegenerateInput { .. } => "DEGENERATE_INPUT",
            Self::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Store { .. } => "STORE",
            Self::Internal { .. } => "INTERNAL",
        }
    }
}

/// Failures reported by a durable store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store call timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("tag {tag_id} already has a different record at {computed_at}")]
    Conflict { tag_id: String, computed_at: DateTime<Utc> },
}
