//! trilateration.rs: Linearized least-squares multilateration solver
//!
//! Used by the batch pipeline to turn one tag's ranges into a `ResolvedPosition`.
//!
//! Algorithm: difference the sphere equations of *adjacent* ranges (i, i+1):
//!   2(x2-x1)x + 2(y2-y1)y + 2(z2-z1)z = r1²-r2² - x1²+x2² - y1²+y2² - z1²+z2²
//! and solve A·p = B in the least-squares sense via SVD.
//!
//! Rank handling:
//!   - rank 3: plain least-squares solution
//!   - rank 2: anchors are coplanar; the out-of-plane component is unobservable,
//!     so the minimum-norm solution is projected onto the anchor plane
//!   - rank ≤ 1: collinear geometry; inverse-distance weighted centroid fallback
//!
//! Rank is judged against `rank_tolerance × σ_max`. The bound is geometric
//! (default 1e-3), so nearly collinear or nearly coplanar anchor layouts are
//! treated as degenerate instead of amplifying range noise into far-off points.
//!
//! Accuracy is the mean absolute residual |‖p − aᵢ‖ − dᵢ| for solved positions and
//! a fixed constant for the centroid fallback.

use std::collections::BTreeSet;

use chrono::{SubsecRound, Utc};
use nalgebra::{DMatrix, DVector, Vector3};
use position_types::{ResolvedPosition, SolveMethod, Vec3};
use tracing::debug;

use crate::error::EngineError;

// ── Types ─────────────────────────────────────────────────────────────────────

/// One usable range for a tag: anchor id, anchor coordinate, measured distance.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub anchor_id: String,
    pub anchor: Vec3,
    pub distance_m: f64,
}

impl Range {
    pub fn new(anchor_id: impl Into<String>, anchor: Vec3, distance_m: f64) -> Self {
        Self { anchor_id: anchor_id.into(), anchor, distance_m }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Minimum distinct anchors after dedup (default 3)
    pub min_ranges: usize,
    /// ε in the centroid weights 1/(d + ε), guards d → 0
    pub centroid_epsilon_m: f64,
    /// Accuracy reported for centroid fallback positions
    pub fallback_accuracy_m: f64,
    /// Singular values ≤ rank_tolerance × σ_max count as zero (σ_min/σ_max conditioning bound)
    pub rank_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            min_ranges: 3,
            centroid_epsilon_m: 0.001,
            fallback_accuracy_m: 1.5,
            rank_tolerance: 1e-3,
        }
    }
}

/// Solver output before it is stamped into a `ResolvedPosition`.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub position: Vec3,
    pub accuracy_m: f64,
    pub method: SolveMethod,
    pub anchors_used: BTreeSet<String>,
}

// ── Public entry points ───────────────────────────────────────────────────────

/// Solve one tag and stamp the result with the completion time, truncated to
/// microseconds so it survives a round trip through the history store.
pub fn resolve(
    tag_id: &str,
    ranges: &[Range],
    config: &SolverConfig,
) -> Result<ResolvedPosition, EngineError> {
    let solution = solve(ranges, config)?;
    Ok(ResolvedPosition {
        tag_id: tag_id.to_string(),
        x: solution.position.x,
        y: solution.position.y,
        z: solution.position.z,
        computed_at: Utc::now().trunc_subsecs(6),
        accuracy_m: solution.accuracy_m,
        anchors_used: solution.anchors_used,
        method: solution.method,
        collected_at: None,
    })
}

/// Pure solve: no clock, no side effects.
///
/// Fails only with `DegenerateInput` when fewer than `min_ranges` ranges with
/// distinct anchor coordinates remain.
pub fn solve(ranges: &[Range], config: &SolverConfig) -> Result<Solution, EngineError> {
    let ranges = dedup_by_anchor(ranges);
    let required = config.min_ranges.max(1);
    if ranges.len() < required {
        return Err(EngineError::DegenerateInput { usable: ranges.len(), required });
    }

    let anchors_used: BTreeSet<String> = ranges.iter().map(|r| r.anchor_id.clone()).collect();

    if let Some((p, method)) = least_squares(&ranges, config.rank_tolerance) {
        return Ok(Solution {
            position: p,
            accuracy_m: mean_abs_residual(&p, &ranges),
            method,
            anchors_used,
        });
    }

    debug!("Degenerate geometry ({} anchors), using weighted centroid", ranges.len());
    Ok(Solution {
        position: weighted_centroid(&ranges, config.centroid_epsilon_m),
        accuracy_m: config.fallback_accuracy_m,
        method: SolveMethod::WeightedCentroid,
        anchors_used,
    })
}

// ── Linearized least squares ──────────────────────────────────────────────────

/// Keep the first range for each distinct anchor coordinate, in input order.
fn dedup_by_anchor(ranges: &[Range]) -> Vec<&Range> {
    let mut kept: Vec<&Range> = Vec::with_capacity(ranges.len());
    for r in ranges {
        if !kept.iter().any(|k| k.anchor == r.anchor) {
            kept.push(r);
        }
    }
    kept
}

fn to_vector(v: &Vec3) -> Vector3<f64> { Vector3::new(v.x, v.y, v.z) }

/// Build A and B from adjacent pairs.
fn linear_system(ranges: &[&Range]) -> (DMatrix<f64>, DVector<f64>) {
    let rows = ranges.len() - 1;
    let mut a = DMatrix::<f64>::zeros(rows, 3);
    let mut b = DVector::<f64>::zeros(rows);

    for (row, pair) in ranges.windows(2).enumerate() {
        let (p1, r1) = (pair[0].anchor, pair[0].distance_m);
        let (p2, r2) = (pair[1].anchor, pair[1].distance_m);

        a[(row, 0)] = 2.0 * (p2.x - p1.x);
        a[(row, 1)] = 2.0 * (p2.y - p1.y);
        a[(row, 2)] = 2.0 * (p2.z - p1.z);
        b[row] = r1 * r1 - r2 * r2
            - p1.x * p1.x + p2.x * p2.x
            - p1.y * p1.y + p2.y * p2.y
            - p1.z * p1.z + p2.z * p2.z;
    }
    (a, b)
}

/// Returns None when the system is rank ≤ 1 or the solution is not finite.
fn least_squares(ranges: &[&Range], rank_tolerance: f64) -> Option<(Vec3, SolveMethod)> {
    if ranges.len() < 2 {
        return None;
    }
    let (a, b) = linear_system(ranges);
    let svd = a.svd(true, true);

    let sigma_max = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
    if !sigma_max.is_finite() || sigma_max <= 0.0 {
        return None;
    }
    let tol = rank_tolerance * sigma_max;
    let row_space: Vec<usize> = svd
        .singular_values
        .iter()
        .enumerate()
        .filter(|(_, s)| **s > tol)
        .map(|(i, _)| i)
        .collect();

    let p = svd.solve(&b, tol).ok()?;
    let mut p = Vector3::new(p[0], p[1], p[2]);

    let method = match row_space.len() {
        3 => SolveMethod::LeastSquares,
        2 => {
            // Null direction of A = normal of the plane the anchors span
            let v_t = svd.v_t.as_ref()?;
            let row = |i: usize| Vector3::new(v_t[(i, 0)], v_t[(i, 1)], v_t[(i, 2)]);
            let normal = row(row_space[0]).cross(&row(row_space[1]));
            let norm = normal.norm();
            if !norm.is_finite() || norm <= 0.0 {
                return None;
            }
            let normal = normal / norm;
            let on_plane = to_vector(&ranges[0].anchor);
            p += normal * normal.dot(&(on_plane - p));
            SolveMethod::Planar
        }
        _ => return None,
    };

    let p = Vec3::new(p.x, p.y, p.z);
    p.is_finite().then_some((p, method))
}

fn mean_abs_residual(p: &Vec3, ranges: &[&Range]) -> f64 {
    let sum: f64 = ranges
        .iter()
        .map(|r| (p.distance_to(&r.anchor) - r.distance_m).abs())
        .sum();
    sum / ranges.len() as f64
}

// ── Fallback ──────────────────────────────────────────────────────────────────

/// Inverse-distance weighted centroid: Σ(aᵢ/(dᵢ+ε)) / Σ(1/(dᵢ+ε))
///
/// Negative distances count as zero. Non-finite distances, and weights that
/// are not finite and positive, are skipped. With no usable weight the plain
/// anchor mean is used.
fn weighted_centroid(ranges: &[&Range], epsilon: f64) -> Vec3 {
    let mut acc = Vector3::zeros();
    let mut total_weight = 0.0;
    for r in ranges {
        if !r.distance_m.is_finite() {
            continue;
        }
        let w = 1.0 / (r.distance_m.max(0.0) + epsilon);
        if !w.is_finite() || w <= 0.0 {
            continue;
        }
        acc += to_vector(&r.anchor) * w;
        total_weight += w;
    }
    if total_weight <= 0.0 || !total_weight.is_finite() {
        acc = ranges.iter().map(|r| to_vector(&r.anchor)).sum();
        total_weight = ranges.len() as f64;
    }
    let c = acc / total_weight;
    Vec3::new(c.x, c.y, c.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-3;

    fn ranges_to(tag: Vec3, anchors: &[(&str, Vec3)]) -> Vec<Range> {
        anchors
            .iter()
            .map(|(id, a)| Range::new(*id, *a, tag.distance_to(a)))
            .collect()
    }

    fn assert_close(a: Vec3, b: Vec3) {
        assert!(a.distance_to(&b) < TOL, "expected {b:?}, got {a:?}");
    }

    #[test]
    fn recovers_tag_from_four_non_coplanar_anchors() {
        let tag = Vec3::new(3.0, 4.0, 5.0);
        let ranges = ranges_to(tag, &[
            ("A1", Vec3::new(0.0, 0.0, 0.0)),
            ("A2", Vec3::new(10.0, 0.0, 0.0)),
            ("A3", Vec3::new(0.0, 10.0, 0.0)),
            ("A4", Vec3::new(0.0, 0.0, 10.0)),
        ]);
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert_eq!(s.method, SolveMethod::LeastSquares);
        assert_close(s.position, tag);
        assert!(s.accuracy_m < TOL);
    }

    #[test]
    fn recovers_in_plane_tag_from_three_anchors() {
        let tag = Vec3::new(3.0, 4.0, 0.0);
        let ranges = ranges_to(tag, &[
            ("A1", Vec3::new(0.0, 0.0, 0.0)),
            ("A2", Vec3::new(10.0, 0.0, 0.0)),
            ("A3", Vec3::new(0.0, 10.0, 0.0)),
        ]);
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert_eq!(s.method, SolveMethod::Planar);
        assert_close(s.position, tag);
        assert!(s.accuracy_m < TOL);
    }

    #[test]
    fn planar_solution_lies_on_raised_anchor_plane() {
        let tag = Vec3::new(12.0, 7.5, 3.0);
        let ranges = ranges_to(tag, &[
            ("A1", Vec3::new(0.0, 0.0, 3.0)),
            ("A2", Vec3::new(50.0, 0.0, 3.0)),
            ("A3", Vec3::new(25.0, 30.0, 3.0)),
            ("A4", Vec3::new(0.0, 30.0, 3.0)),
        ]);
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert_eq!(s.method, SolveMethod::Planar);
        assert_close(s.position, tag);
    }

    #[test]
    fn collinear_anchors_fall_back_to_centroid() {
        let config = SolverConfig::default();
        let ranges = vec![
            Range::new("A1", Vec3::new(0.0, 0.0, 0.0), 5.0),
            Range::new("A2", Vec3::new(10.0, 0.0, 0.0), 5.0),
            Range::new("A3", Vec3::new(20.0, 0.0, 0.0), 15.0),
        ];
        let s = solve(&ranges, &config).unwrap();
        assert_eq!(s.method, SolveMethod::WeightedCentroid);
        assert_eq!(s.accuracy_m, config.fallback_accuracy_m);
        // weights 1/5.001, 1/5.001, 1/15.001 → pulled toward the first two anchors
        assert!(s.position.x > 0.0 && s.position.x < 10.0);
        assert_eq!(s.position.y, 0.0);
        assert_eq!(s.position.z, 0.0);
    }

    #[test]
    fn nearly_collinear_anchors_fall_back_to_centroid() {
        let config = SolverConfig::default();
        for offset in [1e-3, 1e-6] {
            let ranges = vec![
                Range::new("A1", Vec3::new(0.0, 0.0, 0.0), 5.05),
                Range::new("A2", Vec3::new(10.0, 0.0, 0.0), 5.0),
                Range::new("A3", Vec3::new(20.0, offset, 0.0), 14.95),
            ];
            let s = solve(&ranges, &config).unwrap();
            assert_eq!(s.method, SolveMethod::WeightedCentroid, "offset {offset}: {s:?}");
            assert_eq!(s.accuracy_m, config.fallback_accuracy_m);
            assert!((0.0..=20.0).contains(&s.position.x));
            assert!(s.position.y.abs() <= offset);
        }
    }

    #[test]
    fn centroid_tolerates_negative_and_non_finite_distances() {
        let ranges = vec![
            Range::new("A1", Vec3::new(0.0, 0.0, 0.0), -0.001),
            Range::new("A2", Vec3::new(10.0, 0.0, 0.0), 5.0),
            Range::new("A3", Vec3::new(20.0, 0.0, 0.0), f64::NAN),
        ];
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert_eq!(s.method, SolveMethod::WeightedCentroid);
        assert!(s.position.is_finite(), "{s:?}");
        assert!(s.position.x < 5.0);

        let refs: Vec<&Range> = ranges.iter().collect();
        let mean = weighted_centroid(&refs, 0.0);
        assert!(mean.is_finite());
        assert!(weighted_centroid(&refs[2..], 0.001).x == 20.0);
    }

    #[test]
    fn resolve_stamps_whole_microseconds() {
        let ranges = vec![
            Range::new("A1", Vec3::new(0.0, 0.0, 3.0), 10.5),
            Range::new("A2", Vec3::new(50.0, 0.0, 3.0), 12.3),
            Range::new("A3", Vec3::new(25.0, 30.0, 3.0), 8.7),
        ];
        let p = resolve("T1", &ranges, &SolverConfig::default()).unwrap();
        assert_eq!(p.computed_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn centroid_survives_zero_distance() {
        let ranges = vec![
            Range::new("A1", Vec3::new(0.0, 0.0, 0.0), 0.0),
            Range::new("A2", Vec3::new(1.0, 1.0, 1.0), 0.0),
            Range::new("A3", Vec3::new(2.0, 2.0, 2.0), 0.0),
        ];
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert_eq!(s.method, SolveMethod::WeightedCentroid);
        assert_close(s.position, Vec3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn duplicate_anchor_coordinates_are_ignored() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let ranges = vec![
            Range::new("A1", a, 5.0),
            Range::new("A1", a, 6.0),
            Range::new("A2", Vec3::new(10.0, 0.0, 0.0), 5.0),
        ];
        let err = solve(&ranges, &SolverConfig::default()).unwrap_err();
        assert_eq!(err, EngineError::DegenerateInput { usable: 2, required: 3 });
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let tag = Vec3::new(3.0, 4.0, 0.0);
        let mut ranges = ranges_to(tag, &[
            ("A1", Vec3::new(0.0, 0.0, 0.0)),
            ("A2", Vec3::new(10.0, 0.0, 0.0)),
            ("A3", Vec3::new(0.0, 10.0, 0.0)),
        ]);
        ranges.push(Range::new("A1", Vec3::new(0.0, 0.0, 0.0), 99.0));
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert_close(s.position, tag);
        assert_eq!(s.anchors_used.len(), 3);
    }

    #[test]
    fn accuracy_is_non_negative_with_noisy_ranges() {
        let ranges = vec![
            Range::new("A1", Vec3::new(0.0, 0.0, 0.0), 6.1),
            Range::new("A2", Vec3::new(10.0, 0.0, 0.0), 7.9),
            Range::new("A3", Vec3::new(0.0, 10.0, 0.0), 5.2),
            Range::new("A4", Vec3::new(0.0, 0.0, 10.0), 8.4),
            Range::new("A5", Vec3::new(10.0, 10.0, 10.0), 10.9),
        ];
        let s = solve(&ranges, &SolverConfig::default()).unwrap();
        assert!(s.accuracy_m >= 0.0);
        assert!(s.position.is_finite());
    }

    #[test]
    fn reference_scenario_lands_inside_anchor_bounds() {
        let ranges = vec![
            Range::new("A1", Vec3::new(0.0, 0.0, 3.0), 10.5),
            Range::new("A2", Vec3::new(50.0, 0.0, 3.0), 12.3),
            Range::new("A3", Vec3::new(25.0, 30.0, 3.0), 8.7),
        ];
        let p = resolve("T1", &ranges, &SolverConfig::default()).unwrap();
        assert!(p.x.is_finite() && p.y.is_finite() && p.z.is_finite());
        assert!((0.0..=50.0).contains(&p.x));
        assert!((0.0..=30.0).contains(&p.y));
        assert!((p.z - 3.0).abs() < TOL);
        assert!(p.accuracy_m >= 0.0);
        assert_eq!(p.tag_id, "T1");
        assert_eq!(p.anchors_used.len(), 3);
    }
}
