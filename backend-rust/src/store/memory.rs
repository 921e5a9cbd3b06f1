use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use position_types::{MeasurementBatch, ResolvedPosition};
use tokio::sync::RwLock;

use super::PositionStore;
use crate::error::StoreError;

type History = HashMap<String, BTreeMap<DateTime<Utc>, ResolvedPosition>>;

/// In-process history store, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    positions: Arc<RwLock<History>>,
    batches: Arc<RwLock<Vec<MeasurementBatch>>>,
    fail_appends: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append_position` fail (persistence-failure tests).
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub async fn position_count(&self) -> usize {
        self.positions.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.read().await.len()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn append_position(&self, position: &ResolvedPosition) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store rejecting writes".into()));
        }
        let mut positions = self.positions.write().await;
        match positions.entry(position.tag_id.clone()).or_default().entry(position.computed_at) {
            Entry::Vacant(slot) => {
                slot.insert(position.clone());
                Ok(())
            }
            Entry::Occupied(existing) if existing.get() == position => Ok(()),
            Entry::Occupied(_) => Err(StoreError::Conflict {
                tag_id: position.tag_id.clone(),
                computed_at: position.computed_at,
            }),
        }
    }

    async fn query_history(
        &self,
        tag_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ResolvedPosition>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let positions = self.positions.read().await;
        Ok(positions
            .get(tag_id)
            .map(|h| h.range(from..=to).take(limit).map(|(_, p)| p.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest(&self, tag_id: &str) -> Result<Option<ResolvedPosition>, StoreError> {
        let positions = self.positions.read().await;
        Ok(positions
            .get(tag_id)
            .and_then(|h| h.values().next_back().cloned()))
    }

    async fn append_measurements(&self, batch: &MeasurementBatch) -> Result<(), StoreError> {
        self.batches.write().await.push(batch.clone());
        Ok(())
    }
}
