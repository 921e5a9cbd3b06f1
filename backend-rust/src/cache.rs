//! Freshness cache: newest resolved position per tag.
//!
//! The cache is a view over confirmed history. Writers go through
//! [`FreshnessCache::offer`], which compares `computed_at` and writes in one
//! step while holding the entry's shard lock, so an older position can never
//! replace a newer one that readers may already have seen.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use position_types::ResolvedPosition;
use serde::Serialize;

/// Outcome of offering a position to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheUpdate {
    /// No entry existed for the tag
    Inserted,
    /// Displaced an older entry
    Replaced,
    /// An entry at least as new was already cached; nothing written
    Stale,
}

#[derive(Debug, Default)]
pub struct FreshnessCache {
    entries: DashMap<String, ResolvedPosition>,
}

impl FreshnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest-wins compare-and-update for `position.tag_id`.
    pub fn offer(&self, position: ResolvedPosition) -> CacheUpdate {
        match self.entries.entry(position.tag_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(position);
                CacheUpdate::Inserted
            }
            Entry::Occupied(mut slot) => {
                if position.is_newer_than(slot.get()) {
                    slot.insert(position);
                    CacheUpdate::Replaced
                } else {
                    CacheUpdate::Stale
                }
            }
        }
    }

    pub fn get(&self, tag_id: &str) -> Option<ResolvedPosition> {
        self.entries.get(tag_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
