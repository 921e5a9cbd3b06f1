//! Measurement grouping: batch → per-tag range lists.

use std::collections::{HashMap, HashSet};

use position_types::{MeasurementBatch, Vec3};

use crate::trilateration::Range;

/// Ranges for one tag, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct TagGroup {
    pub tag_id: String,
    pub ranges: Vec<Range>,
    /// Number of distinct anchor ids among `ranges`
    pub distinct_anchors: usize,
}

impl TagGroup {
    /// Enough distinct anchors to reach the solver.
    pub fn is_ready(&self, min_ranges: usize) -> bool {
        self.distinct_anchors >= min_ranges
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    /// Groups in order of each tag's first appearance in the batch
    pub groups: Vec<TagGroup>,
    /// Measurements dropped for unknown or inactive anchors
    pub dropped: usize,
}

/// Partition a batch by tag, discarding ranges from anchors absent in
/// `active_anchors` (unknown or inactive).
///
/// Tags whose every range was discarded still get an (empty) group so the
/// caller can report them.
pub fn group_batch(batch: &MeasurementBatch, active_anchors: &HashMap<String, Vec3>) -> Grouping {
    let mut grouping = Grouping::default();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut seen_anchors: Vec<HashSet<&str>> = Vec::new();

    for m in &batch.measurements {
        let slot = *index.entry(m.tag_id.as_str()).or_insert_with(|| {
            grouping.groups.push(TagGroup {
                tag_id: m.tag_id.clone(),
                ranges: Vec::new(),
                distinct_anchors: 0,
            });
            seen_anchors.push(HashSet::new());
            grouping.groups.len() - 1
        });

        let Some(anchor) = active_anchors.get(&m.anchor_id) else {
            grouping.dropped += 1;
            continue;
        };

        let group = &mut grouping.groups[slot];
        group.ranges.push(Range::new(m.anchor_id.clone(), *anchor, m.distance_m));
        if seen_anchors[slot].insert(m.anchor_id.as_str()) {
            group.distinct_anchors += 1;
        }
    }

    grouping
}
