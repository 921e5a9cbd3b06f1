//! Position queries: current position (cache first) and history ranges.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use position_types::ResolvedPosition;
use tracing::debug;

use crate::cache::FreshnessCache;
use crate::error::{EngineError, StoreError};
use crate::store::PositionStore;

#[derive(Clone)]
pub struct PositionReader {
    store: Arc<dyn PositionStore>,
    cache: Arc<FreshnessCache>,
    store_timeout: Duration,
    history_limit_max: usize,
}

impl PositionReader {
    pub fn new(
        store: Arc<dyn PositionStore>,
        cache: Arc<FreshnessCache>,
        store_timeout: Duration,
        history_limit_max: usize,
    ) -> Self {
        Self { store, cache, store_timeout, history_limit_max }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, StoreError>>) -> Result<T, EngineError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EngineError::Store { reason: e.to_string() }),
            Err(_) => Err(EngineError::Store { reason: StoreError::Timeout.to_string() }),
        }
    }

    /// Cached position, or the newest history record back-filled into the cache.
    pub async fn current(&self, tag_id: &str) -> Result<ResolvedPosition, EngineError> {
        if let Some(hit) = self.cache.get(tag_id) {
            return Ok(hit);
        }

        let Some(stored) = self.bounded(self.store.latest(tag_id)).await? else {
            return Err(EngineError::NotFound { tag_id: tag_id.to_string() });
        };

        // A publish may have raced us; whichever is newer is what the cache holds now.
        let update = self.cache.offer(stored.clone());
        debug!("Back-filled cache for tag {tag_id} ({update:?})");
        Ok(self.cache.get(tag_id).unwrap_or(stored))
    }

    /// Durable records with `computed_at` in `[from, to]`, ascending, at most `limit`.
    pub async fn history(
        &self,
        tag_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ResolvedPosition>, EngineError> {
        if from >= to {
            return Err(EngineError::InvalidRange { from, to });
        }
        if limit > self.history_limit_max {
            return Err(EngineError::LimitExceeded { limit, max: self.history_limit_max });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut rows = self.bounded(self.store.query_history(tag_id, from, to, limit)).await?;
        rows.retain(|p| p.computed_at >= from && p.computed_at <= to);
        rows.sort_by_key(|p| p.computed_at);
        rows.truncate(limit);
        Ok(rows)
    }
}
