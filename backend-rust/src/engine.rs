//! Batch pipeline: group → solve → publish, one task per tag.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use position_types::{MeasurementBatch, ResolvedPosition};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anchors::AnchorDirectory;
use crate::cache::{CacheUpdate, FreshnessCache};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::grouper::{group_batch, TagGroup};
use crate::publisher::Publisher;
use crate::reader::PositionReader;
use crate::store::PositionStore;
use crate::trilateration::{self, SolverConfig};

// ── Report types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TagStatus {
    Calculated {
        position: ResolvedPosition,
        cache: CacheUpdate,
    },
    InsufficientData {
        distinct_anchors: usize,
        message: String,
    },
    Failed {
        error: EngineError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagOutcome {
    pub tag_id: String,
    #[serde(flatten)]
    pub status: TagStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub gateway_id: String,
    pub collected_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub dropped_measurements: usize,
    pub results: Vec<TagOutcome>,
}

impl BatchReport {
    pub fn calculated(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TagStatus::Calculated { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, TagStatus::Failed { .. }))
            .count()
    }

    pub fn outcome(&self, tag_id: &str) -> Option<&TagOutcome> {
        self.results.iter().find(|r| r.tag_id == tag_id)
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct PositionEngine {
    directory: Arc<dyn AnchorDirectory>,
    store: Arc<dyn PositionStore>,
    publisher: Publisher,
    reader: PositionReader,
    solver: SolverConfig,
    store_timeout: Duration,
    record_raw_measurements: bool,
}

impl PositionEngine {
    pub fn new(config: &EngineConfig, directory: Arc<dyn AnchorDirectory>, store: Arc<dyn PositionStore>) -> Self {
        let cache = Arc::new(FreshnessCache::new());
        Self {
            publisher: Publisher::new(store.clone(), cache.clone(), config.store_timeout),
            reader: PositionReader::new(store.clone(), cache, config.store_timeout, config.history_limit_max),
            directory,
            store,
            solver: config.solver.clone(),
            store_timeout: config.store_timeout,
            record_raw_measurements: config.record_raw_measurements,
        }
    }

    pub fn reader(&self) -> &PositionReader {
        &self.reader
    }

    pub fn directory(&self) -> &dyn AnchorDirectory {
        self.directory.as_ref()
    }

    /// Resolve and publish every tag in `batch`. Tags are independent: one
    /// tag's failure is reported in its outcome and never aborts the others.
    pub async fn process_batch(&self, batch: MeasurementBatch) -> BatchReport {
        let received_at = Utc::now();
        let batch_id = Uuid::new_v4();
        let active = self.directory.active_anchors();

        if self.record_raw_measurements {
            match tokio::time::timeout(self.store_timeout, self.store.append_measurements(&batch)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Raw measurement log failed for batch {batch_id}: {e}"),
                Err(_) => warn!("Raw measurement log timed out for batch {batch_id}"),
            }
        }

        let grouping = group_batch(&batch, &active);
        if grouping.dropped > 0 {
            debug!(
                "Batch {batch_id} from {}: dropped {} measurements (unknown or inactive anchors)",
                batch.gateway_id, grouping.dropped
            );
        }

        let mut slots: Vec<Option<TagOutcome>> = vec![None; grouping.groups.len()];
        let mut tag_ids: Vec<String> = Vec::with_capacity(grouping.groups.len());
        let mut tasks = JoinSet::new();

        for (slot, group) in grouping.groups.into_iter().enumerate() {
            tag_ids.push(group.tag_id.clone());
            if !group.is_ready(self.solver.min_ranges) {
                slots[slot] = Some(insufficient(&group, self.solver.min_ranges));
                continue;
            }
            let publisher = self.publisher.clone();
            let solver = self.solver.clone();
            let collected_at = batch.collected_at;
            tasks.spawn(async move { (slot, resolve_and_publish(group, &solver, collected_at, &publisher).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => slots[slot] = Some(outcome),
                Err(e) => warn!("Solve task in batch {batch_id} did not complete: {e}"),
            }
        }

        let results: Vec<TagOutcome> = slots
            .into_iter()
            .zip(tag_ids)
            .map(|(outcome, tag_id)| {
                outcome.unwrap_or_else(|| TagOutcome {
                    tag_id,
                    status: TagStatus::Failed {
                        error: EngineError::Internal { reason: "solve task aborted".into() },
                    },
                })
            })
            .collect();
        let report = BatchReport {
            batch_id,
            gateway_id: batch.gateway_id,
            collected_at: batch.collected_at,
            received_at,
            dropped_measurements: grouping.dropped,
            results,
        };
        info!(
            "Batch {} from {}: {} tags, {} calculated, {} failed",
            report.batch_id,
            report.gateway_id,
            report.results.len(),
            report.calculated(),
            report.failed()
        );
        report
    }
}

fn insufficient(group: &TagGroup, required: usize) -> TagOutcome {
    let err = EngineError::InsufficientData {
        tag_id: group.tag_id.clone(),
        distinct_anchors: group.distinct_anchors,
        required,
    };
    debug!("{err}");
    TagOutcome {
        tag_id: group.tag_id.clone(),
        status: TagStatus::InsufficientData {
            distinct_anchors: group.distinct_anchors,
            message: err.to_string(),
        },
    }
}

async fn resolve_and_publish(
    group: TagGroup,
    solver: &SolverConfig,
    collected_at: DateTime<Utc>,
    publisher: &Publisher,
) -> TagOutcome {
    let status = match trilateration::resolve(&group.tag_id, &group.ranges, solver) {
        Ok(mut position) => {
            position.collected_at = Some(collected_at.trunc_subsecs(6));
            match publisher.publish(position.clone()).await {
                Ok(cache) => TagStatus::Calculated { position, cache },
                Err(error) => TagStatus::Failed { error },
            }
        }
        Err(error) => {
            warn!("Tag {} could not be solved: {error}", group.tag_id);
            TagStatus::Failed { error }
        }
    };
    TagOutcome { tag_id: group.tag_id, status }
}
