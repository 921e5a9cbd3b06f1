//! tag_sim.rs: tag motion model
//!
//! Each tag walks at constant speed with a randomly drifting heading and
//! reflects off the walls of the configured bounding box. Height drifts
//! slowly inside the same box.

use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::Deserialize;

use position_types::Vec3;

#[derive(Debug, Clone, Deserialize)]
pub struct TagConfig {
    pub count: usize,
    pub id_prefix: String,
    pub speed_mps: f64,
    pub turn_sigma_rad: f64,
    pub bounds_min: [f64; 3],
    pub bounds_max: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct TagState {
    pub tag_id: String,
    /// True position, metres
    pub pos: Vec3,
    /// Heading in the x/y plane, radians
    pub heading_rad: f64,
    /// Vertical speed, m/s
    pub climb_mps: f64,
}

pub struct TagSim {
    pub tags: Vec<TagState>,
    speed_mps: f64,
    turn: Normal<f64>,
    min: Vec3,
    max: Vec3,
}

impl TagSim {
    pub fn new(cfg: &TagConfig, rng: &mut impl Rng) -> Result<Self, NormalError> {
        let min = Vec3::new(cfg.bounds_min[0], cfg.bounds_min[1], cfg.bounds_min[2]);
        let max = Vec3::new(cfg.bounds_max[0], cfg.bounds_max[1], cfg.bounds_max[2]);
        let tags = (0..cfg.count)
            .map(|i| TagState {
                tag_id: format!("{}{}", cfg.id_prefix, i + 1),
                pos: Vec3::new(
                    sample_between(rng, min.x, max.x),
                    sample_between(rng, min.y, max.y),
                    sample_between(rng, min.z, max.z),
                ),
                heading_rad: rng.gen_range(0.0..std::f64::consts::TAU),
                climb_mps: 0.0,
            })
            .collect();
        let turn = Normal::new(0.0, cfg.turn_sigma_rad)?;
        Ok(Self { tags, speed_mps: cfg.speed_mps, turn, min, max })
    }

    /// Advance every tag by `dt` seconds.
    pub fn tick(&mut self, dt: f64, rng: &mut impl Rng) {
        for tag in &mut self.tags {
            tag.heading_rad += self.turn.sample(rng) * dt.sqrt();
            tag.climb_mps = (tag.climb_mps + rng.gen_range(-0.05..0.05)).clamp(-0.2, 0.2);

            let mut next = Vec3::new(
                tag.pos.x + self.speed_mps * tag.heading_rad.cos() * dt,
                tag.pos.y + self.speed_mps * tag.heading_rad.sin() * dt,
                tag.pos.z + tag.climb_mps * dt,
            );

            // Reflect off the walls
            if next.x < self.min.x || next.x > self.max.x {
                tag.heading_rad = std::f64::consts::PI - tag.heading_rad;
                next.x = reflect(next.x, self.min.x, self.max.x);
            }
            if next.y < self.min.y || next.y > self.max.y {
                tag.heading_rad = -tag.heading_rad;
                next.y = reflect(next.y, self.min.y, self.max.y);
            }
            if next.z < self.min.z || next.z > self.max.z {
                tag.climb_mps = -tag.climb_mps;
                next.z = reflect(next.z, self.min.z, self.max.z);
            }
            tag.pos = next;
        }
    }
}

fn sample_between(rng: &mut impl Rng, lo: f64, hi: f64) -> f64 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

/// Mirror `v` back into `[lo, hi]`; clamps if the overshoot exceeds the box.
fn reflect(v: f64, lo: f64, hi: f64) -> f64 {
    let r = if v < lo { 2.0 * lo - v } else if v > hi { 2.0 * hi - v } else { v };
    r.clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cfg() -> TagConfig {
        TagConfig {
            count: 5,
            id_prefix: "T".into(),
            speed_mps: 3.0,
            turn_sigma_rad: 1.0,
            bounds_min: [0.0, 0.0, 0.5],
            bounds_max: [10.0, 10.0, 2.0],
        }
    }

    #[test]
    fn tags_are_named_and_spawned_inside_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let sim = TagSim::new(&cfg(), &mut rng).unwrap();
        let ids: Vec<_> = sim.tags.iter().map(|t| t.tag_id.as_str()).collect();
        assert_eq!(ids, ["T1", "T2", "T3", "T4", "T5"]);
        assert!(sim.tags.iter().all(|t| (0.0..=10.0).contains(&t.pos.x) && (0.5..=2.0).contains(&t.pos.z)));
    }

    #[test]
    fn random_walk_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut sim = TagSim::new(&cfg(), &mut rng).unwrap();
        for _ in 0..2_000 {
            sim.tick(0.5, &mut rng);
            for t in &sim.tags {
                assert!((0.0..=10.0).contains(&t.pos.x), "x out of bounds: {}", t.pos.x);
                assert!((0.0..=10.0).contains(&t.pos.y), "y out of bounds: {}", t.pos.y);
                assert!((0.5..=2.0).contains(&t.pos.z), "z out of bounds: {}", t.pos.z);
            }
        }
    }

    #[test]
    fn reflect_mirrors_overshoot() {
        assert_eq!(reflect(11.0, 0.0, 10.0), 9.0);
        assert_eq!(reflect(-2.0, 0.0, 10.0), 2.0);
        assert_eq!(reflect(-50.0, 0.0, 10.0), 10.0);
    }
}
