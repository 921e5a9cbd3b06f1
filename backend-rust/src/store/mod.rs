//! Durable history store collaborator.
//!
//! The engine relies on three properties of every implementation:
//! - `append_position` is all-or-nothing
//! - `query_history` returns records ascending by `computed_at`
//! - records are never updated or deleted by the engine

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use position_types::{MeasurementBatch, ResolvedPosition};

use crate::error::StoreError;

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Append one resolved position. Idempotent on `(tag_id, computed_at)`:
    /// re-appending an identical record is `Ok`, while a different record under
    /// an existing key is `StoreError::Conflict` and nothing is written.
    async fn append_position(&self, position: &ResolvedPosition) -> Result<(), StoreError>;

    /// Records with `computed_at` in `[from, to]`, ascending, at most `limit`.
    async fn query_history(
        &self,
        tag_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ResolvedPosition>, StoreError>;

    /// Most recent record for the tag, if any.
    async fn latest(&self, tag_id: &str) -> Result<Option<ResolvedPosition>, StoreError>;

    /// Keep a raw copy of an ingested batch. Stores without a raw log ignore it.
    async fn append_measurements(&self, _batch: &MeasurementBatch) -> Result<(), StoreError> {
        Ok(())
    }
}
