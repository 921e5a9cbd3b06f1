//! range_physics.rs: anchor→tag ranging model
//!
//! For every tag and every anchor within `max_range_m`:
//! 1. Compute the true 3D range
//! 2. Drop the reading with probability `dropout_rate`
//! 3. Add zero-mean Gaussian noise (σ = `sigma_m`)
//! 4. Clamp to a small positive floor so the batch stays valid

use chrono::Utc;
use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::Deserialize;

use position_types::{Anchor, MeasurementBatch, RangeMeasurement};

use crate::tag_sim::TagState;

/// Smallest distance ever reported.
const MIN_RANGE_M: f64 = 0.01;

#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    pub sigma_m: f64,
    pub dropout_rate: f64,
    pub max_range_m: f64,
}

pub struct RangeModel {
    noise: Normal<f64>,
    dropout_rate: f64,
    max_range_m: f64,
}

impl RangeModel {
    pub fn new(cfg: &RadioConfig) -> Result<Self, NormalError> {
        Ok(Self {
            noise: Normal::new(0.0, cfg.sigma_m)?,
            dropout_rate: cfg.dropout_rate.clamp(0.0, 1.0),
            max_range_m: cfg.max_range_m,
        })
    }

    /// One batch covering every tag, as a single gateway would report it.
    pub fn generate_batch(
        &self,
        gateway_id: &str,
        tags: &[TagState],
        anchors: &[Anchor],
        rng: &mut impl Rng,
    ) -> MeasurementBatch {
        let mut measurements = Vec::with_capacity(tags.len() * anchors.len());
        for tag in tags {
            for anchor in anchors.iter().filter(|a| a.active) {
                let truth = tag.pos.distance_to(&anchor.position());
                if truth > self.max_range_m {
                    continue;
                }
                if rng.gen_bool(self.dropout_rate) {
                    continue;
                }
                let measured = (truth + self.noise.sample(rng)).max(MIN_RANGE_M);
                measurements.push(RangeMeasurement::new(anchor.anchor_id.clone(), tag.tag_id.clone(), measured));
            }
        }
        MeasurementBatch {
            gateway_id: gateway_id.to_string(),
            collected_at: Utc::now(),
            measurements,
        }
    }
}
