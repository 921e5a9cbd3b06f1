//! # position-types
//!
//! Shared record types for the positioning service.
//!
//! These types are used by:
//! - `backend-rust`: ingesting measurement batches, resolving and publishing positions
//! - `packages/range-simulator`: producing measurement batches from simulated tags
//!
//! ## Coordinate Conventions
//!
//! - **World frame**: local right-hand Cartesian, metres, Z = up
//! - Anchor coordinates and resolved tag positions share the same frame
//!
//! ## Invariants
//! - A batch handed to the engine references ≥ 3 distinct anchors, all distances > 0
//! - A `ResolvedPosition` is immutable once created; `accuracy_m` ≥ 0

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of distinct anchors needed for a 3D fix.
pub const MIN_DISTINCT_ANCHORS: usize = 3;

// ── 3D Vector ─────────────────────────────────────────────────────────────────

/// 3D point or displacement (metres)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self { Self { x, y, z } }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Vec3) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ── Anchor ────────────────────────────────────────────────────────────────────

/// Fixed reference device with a surveyed position.
/// Owned by the anchor registry; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub anchor_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_active", alias = "is_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_calibration: Option<DateTime<Utc>>,
}

fn default_active() -> bool { true }

impl Anchor {
    pub fn new(anchor_id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            x,
            y,
            z,
            active: true,
            description: None,
            last_calibration: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn position(&self) -> Vec3 { Vec3::new(self.x, self.y, self.z) }
}

// ── Range Measurement & Batch ─────────────────────────────────────────────────

/// One anchor→tag distance reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMeasurement {
    pub anchor_id: String,
    pub tag_id: String,
    /// Measured distance in metres, > 0
    pub distance_m: f64,
}

impl RangeMeasurement {
    pub fn new(anchor_id: impl Into<String>, tag_id: impl Into<String>, distance_m: f64) -> Self {
        Self { anchor_id: anchor_id.into(), tag_id: tag_id.into(), distance_m }
    }
}

/// Batch of ranges collected by one gateway over one collection window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementBatch {
    pub gateway_id: String,
    /// Collection time reported by the gateway (sent as `timestamp` on the wire)
    #[serde(alias = "timestamp")]
    pub collected_at: DateTime<Utc>,
    pub measurements: Vec<RangeMeasurement>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchValidationError {
    #[error("gateway_id must not be empty")]
    MissingGateway,
    #[error("batch has {count} measurements, at least {required} required")]
    TooFewMeasurements { count: usize, required: usize },
    #[error("batch references {distinct} distinct anchors, at least {required} required")]
    TooFewAnchors { distinct: usize, required: usize },
    #[error("measurement {index} (anchor {anchor_id}) has invalid distance {distance_m}")]
    InvalidDistance { index: usize, anchor_id: String, distance_m: f64 },
}

impl MeasurementBatch {
    /// Ingestion-time schema check, run before the batch reaches the grouper.
    pub fn validate(&self) -> Result<(), BatchValidationError> {
        if self.gateway_id.trim().is_empty() {
            return Err(BatchValidationError::MissingGateway);
        }
        if self.measurements.len() < MIN_DISTINCT_ANCHORS {
            return Err(BatchValidationError::TooFewMeasurements {
                count: self.measurements.len(),
                required: MIN_DISTINCT_ANCHORS,
            });
        }
        for (index, m) in self.measurements.iter().enumerate() {
            if !m.distance_m.is_finite() || m.distance_m <= 0.0 {
                return Err(BatchValidationError::InvalidDistance {
                    index,
                    anchor_id: m.anchor_id.clone(),
                    distance_m: m.distance_m,
                });
            }
        }
        let distinct = self.distinct_anchor_count();
        if distinct < MIN_DISTINCT_ANCHORS {
            return Err(BatchValidationError::TooFewAnchors {
                distinct,
                required: MIN_DISTINCT_ANCHORS,
            });
        }
        Ok(())
    }

    pub fn distinct_anchor_count(&self) -> usize {
        self.measurements
            .iter()
            .map(|m| m.anchor_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

// ── Resolved Position ─────────────────────────────────────────────────────────

/// How a position estimate was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveMethod {
    /// Full-rank linearized least squares
    LeastSquares,
    /// Coplanar anchors: least squares pinned to the anchor plane
    Planar,
    /// Inverse-distance weighted centroid (degenerate geometry)
    WeightedCentroid,
}

impl SolveMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastSquares => "LEAST_SQUARES",
            Self::Planar => "PLANAR",
            Self::WeightedCentroid => "WEIGHTED_CENTROID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LEAST_SQUARES" => Some(Self::LeastSquares),
            "PLANAR" => Some(Self::Planar),
            "WEIGHTED_CENTROID" => Some(Self::WeightedCentroid),
            _ => None,
        }
    }
}

impl std::fmt::Display for SolveMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A solved tag position. Created only by the solver, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPosition {
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Solver completion time, the "latest wins" ordering key
    pub computed_at: DateTime<Utc>,
    /// Mean absolute range residual (m), or the fixed fallback constant
    pub accuracy_m: f64,
    pub anchors_used: BTreeSet<String>,
    pub method: SolveMethod,
    /// Collection time of the batch this position was solved from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
}

impl ResolvedPosition {
    /// True when `self` should displace `other` in the freshness cache.
    pub fn is_newer_than(&self, other: &ResolvedPosition) -> bool {
        self.computed_at > other.computed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn batch(measurements: Vec<RangeMeasurement>) -> MeasurementBatch {
        MeasurementBatch {
            gateway_id: "gw-1".into(),
            collected_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            measurements,
        }
    }

    #[test]
    fn valid_batch_passes() {
        let b = batch(vec![
            RangeMeasurement::new("A1", "T1", 10.5),
            RangeMeasurement::new("A2", "T1", 12.3),
            RangeMeasurement::new("A3", "T1", 8.7),
        ]);
        assert_eq!(b.validate(), Ok(()));
    }

    #[test]
    fn repeated_anchor_does_not_count_twice() {
        let b = batch(vec![
            RangeMeasurement::new("A1", "T1", 10.5),
            RangeMeasurement::new("A1", "T2", 12.3),
            RangeMeasurement::new("A2", "T1", 8.7),
        ]);
        assert_eq!(
            b.validate(),
            Err(BatchValidationError::TooFewAnchors { distinct: 2, required: 3 })
        );
    }

    #[test]
    fn non_positive_distance_rejected() {
        let b = batch(vec![
            RangeMeasurement::new("A1", "T1", 10.5),
            RangeMeasurement::new("A2", "T1", 0.0),
            RangeMeasurement::new("A3", "T1", 8.7),
        ]);
        assert!(matches!(
            b.validate(),
            Err(BatchValidationError::InvalidDistance { index: 1, .. })
        ));
    }

    #[test]
    fn batch_accepts_timestamp_alias() {
        let json = r#"{
            "gateway_id": "gw-7",
            "timestamp": "2024-05-01T12:00:00Z",
            "measurements": [
                {"anchor_id": "A1", "tag_id": "T1", "distance_m": 1.0}
            ]
        }"#;
        let b: MeasurementBatch = serde_json::from_str(json).unwrap();
        assert_eq!(b.gateway_id, "gw-7");
        assert_eq!(b.collected_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn anchor_defaults_to_active() {
        let a: Anchor = serde_json::from_str(r#"{"anchor_id":"A1","x":1.0,"y":2.0}"#).unwrap();
        assert!(a.active);
        assert_eq!(a.position(), Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn solve_method_round_trips_through_str() {
        for m in [SolveMethod::LeastSquares, SolveMethod::Planar, SolveMethod::WeightedCentroid] {
            assert_eq!(SolveMethod::parse(m.as_str()), Some(m));
        }
    }
}
