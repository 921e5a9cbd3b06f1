//! Position publishing: durable append first, then the freshness cache.

use std::sync::Arc;
use std::time::Duration;

use position_types::ResolvedPosition;
use tracing::{debug, warn};

use crate::cache::{CacheUpdate, FreshnessCache};
use crate::error::{EngineError, StoreError};
use crate::store::PositionStore;

#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn PositionStore>,
    cache: Arc<FreshnessCache>,
    store_timeout: Duration,
}

impl Publisher {
    pub fn new(store: Arc<dyn PositionStore>, cache: Arc<FreshnessCache>, store_timeout: Duration) -> Self {
        Self { store, cache, store_timeout }
    }

    /// Append `position` to history, then offer it to the cache.
    ///
    /// The cache is only touched after the append is confirmed; a failed or
    /// timed-out append leaves it unchanged and is returned as
    /// `PersistenceFailure`.
    pub async fn publish(&self, position: ResolvedPosition) -> Result<CacheUpdate, EngineError> {
        let appended = match tokio::time::timeout(self.store_timeout, self.store.append_position(&position)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        if let Err(e) = appended {
            warn!("Publish failed for tag {} @ {}: {e}", position.tag_id, position.computed_at);
            return Err(EngineError::PersistenceFailure {
                tag_id: position.tag_id,
                reason: e.to_string(),
            });
        }

        let tag_id = position.tag_id.clone();
        let update = self.cache.offer(position);
        debug!("Published tag {tag_id} (cache: {update:?})");
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use position_types::SolveMethod;

    use crate::store::MemoryStore;

    fn position(tag: &str, x: f64, at: DateTime<Utc>) -> ResolvedPosition {
        ResolvedPosition {
            tag_id: tag.into(),
            x,
            y: 0.0,
            z: 0.0,
            computed_at: at,
            accuracy_m: 0.05,
            anchors_used: Default::default(),
            method: SolveMethod::LeastSquares,
            collected_at: None,
        }
    }

    fn make_publisher(store: Arc<dyn PositionStore>) -> (Publisher, Arc<FreshnessCache>) {
        let cache = Arc::new(FreshnessCache::new());
        (Publisher::new(store, cache.clone(), std::time::Duration::from_millis(200)), cache)
    }

    #[tokio::test]
    async fn latest_wins_in_either_arrival_order() {
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::milliseconds(500);

        for reversed in [false, true] {
            let (publisher, cache) = make_publisher(Arc::new(MemoryStore::new()));
            let mut order = vec![position("T1", 1.0, t1), position("T1", 2.0, t2)];
            if reversed {
                order.reverse();
            }
            for p in order {
                publisher.publish(p).await.unwrap();
            }
            assert_eq!(cache.get("T1").map(|p| p.computed_at), Some(t2));
        }
    }

    #[tokio::test]
    async fn failed_append_leaves_cache_untouched() {
        let store = MemoryStore::new();
        let (publisher, cache) = make_publisher(Arc::new(store.clone()));
        let first = position("T1", 1.0, Utc::now());
        publisher.publish(first.clone()).await.unwrap();

        store.fail_appends(true);
        let later = position("T1", 2.0, first.computed_at + ChronoDuration::seconds(1));
        let err = publisher.publish(later).await.unwrap_err();

        assert!(matches!(err, EngineError::PersistenceFailure { ref tag_id, .. } if tag_id == "T1"));
        assert_eq!(cache.get("T1"), Some(first));
    }

    #[tokio::test]
    async fn conflicting_record_is_not_offered_to_cache() {
        let (publisher, cache) = make_publisher(Arc::new(MemoryStore::new()));
        let at = Utc::now();
        let first = position("T1", 1.0, at);
        publisher.publish(first.clone()).await.unwrap();

        let err = publisher.publish(position("T1", 2.0, at)).await.unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_FAILURE");
        assert_eq!(cache.get("T1"), Some(first.clone()));

        // an identical retry is idempotent
        assert_eq!(publisher.publish(first).await.unwrap(), CacheUpdate::Stale);
    }

    struct StalledStore;

    #[async_trait]
    impl PositionStore for StalledStore {
        async fn append_position(&self, _: &ResolvedPosition) -> Result<(), StoreError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(())
        }
        async fn query_history(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: usize,
        ) -> Result<Vec<ResolvedPosition>, StoreError> {
            Ok(Vec::new())
        }
        async fn latest(&self, _: &str) -> Result<Option<ResolvedPosition>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn timed_out_append_is_a_persistence_failure() {
        let (publisher, cache) = make_publisher(Arc::new(StalledStore));
        let err = publisher.publish(position("T1", 1.0, Utc::now())).await.unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_FAILURE");
        assert!(cache.is_empty());
    }
}
