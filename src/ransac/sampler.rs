//! Geometrically-constrained minimal-set hypothesis generation.
//!
//! Each hypothesis is built from 3 pixel↔mode correspondences drawn at
//! random under colour, minimum-separation and rigidity constraints, then
//! solved for a rigid camera-to-world transform with the Kabsch algorithm.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::config::SamplerConfig;
use crate::forest::PredictionImage;
use crate::frame::FeatureImage;
use crate::ransac::candidate::{InlierSample, PoseCandidate};
use crate::geometry::kabsch;

/// Number of correspondences in a minimal set for 3D rigid alignment.
const MINIMAL_SET_SIZE: usize = 3;

/// An accepted correspondence: pixel, chosen mode, and the cached points.
#[derive(Clone, Copy)]
struct Correspondence {
    pixel_idx: usize,
    mode_idx: usize,
    point_cam: Vector3<f64>,
    point_world: Vector3<f64>,
}

/// Draws minimal correspondence sets and solves them into pose hypotheses.
pub struct HypothesisSampler {
    config: SamplerConfig,
}

impl HypothesisSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    /// Generate up to `initial_candidates` pose hypotheses.
    ///
    /// Hypothesis slots whose sampling budgets run out are dropped, so the
    /// returned pool may be smaller than requested. Each slot runs an
    /// independent, deterministically seeded random stream, making the pool
    /// reproducible regardless of scheduling.
    pub fn generate(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
    ) -> Vec<PoseCandidate> {
        if features.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<PoseCandidate> = (0..self.config.initial_candidates)
            .into_par_iter()
            .filter_map(|slot| {
                let mut rng = StdRng::seed_from_u64(
                    self.config.seed.wrapping_add(slot as u64 + 1),
                );
                self.hypothesize(features, predictions, &mut rng, slot)
            })
            .collect();

        debug!(
            requested = self.config.initial_candidates,
            generated = candidates.len(),
            "generated pose hypotheses"
        );
        candidates
    }

    /// Try to build one hypothesis, retrying the whole minimal set up to the
    /// outer budget.
    fn hypothesize(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
        rng: &mut StdRng,
        slot: usize,
    ) -> Option<PoseCandidate> {
        for _ in 0..self.config.max_outer_iterations {
            let Some(set) = self.draw_minimal_set(features, predictions, rng) else {
                continue;
            };

            let local: Vec<Vector3<f64>> = set.iter().map(|c| c.point_cam).collect();
            let world: Vec<Vector3<f64>> = set.iter().map(|c| c.point_world).collect();
            let Some(pose) = kabsch(&local, &world) else {
                continue;
            };

            let inliers = set
                .iter()
                .map(|c| InlierSample {
                    pixel_idx: c.pixel_idx,
                    mode_idx: Some(c.mode_idx),
                    energy: 0.0,
                })
                .collect();
            return Some(PoseCandidate::new(pose, inliers, slot));
        }
        None
    }

    /// Draw correspondences until 3 are accepted or the inner budget runs out.
    fn draw_minimal_set(
        &self,
        features: &FeatureImage,
        predictions: &PredictionImage,
        rng: &mut StdRng,
    ) -> Option<Vec<Correspondence>> {
        let mut accepted: Vec<Correspondence> = Vec::with_capacity(MINIMAL_SET_SIZE);

        for _ in 0..self.config.max_inner_iterations {
            if accepted.len() == MINIMAL_SET_SIZE {
                break;
            }

            let pixel_idx = rng.gen_range(0..features.len());
            let feature = features.get(pixel_idx);
            let Some(point_cam) = feature.point_cam else {
                continue;
            };

            let prediction = predictions.get(pixel_idx);
            if prediction.is_empty() {
                continue;
            }

            let mode_idx = if self.config.use_all_modes {
                rng.gen_range(0..prediction.num_modes())
            } else {
                0
            };
            let mode = &prediction.modes[mode_idx];

            // The first accepted pixel anchors the hypothesis; require its
            // colour to agree with the chosen mode.
            if accepted.is_empty() && !self.colour_consistent(feature.colour, mode.colour) {
                continue;
            }

            let candidate = Correspondence {
                pixel_idx,
                mode_idx,
                point_cam,
                point_world: mode.position,
            };

            if self.config.check_min_mode_separation
                && !self.far_from_accepted(&candidate, &accepted)
            {
                continue;
            }

            if self.config.check_rigid_transform
                && !self.rigidity_holds(&candidate, &accepted)
            {
                continue;
            }

            accepted.push(candidate);
        }

        (accepted.len() == MINIMAL_SET_SIZE).then_some(accepted)
    }

    fn colour_consistent(&self, pixel: [u8; 3], mode: [u8; 3]) -> bool {
        let tol = self.config.colour_tolerance as i16;
        pixel
            .iter()
            .zip(mode.iter())
            .all(|(&a, &b)| (a as i16 - b as i16).abs() <= tol)
    }

    /// Minimum-separation: the new mode must be far enough from every
    /// already-accepted mode in world space.
    fn far_from_accepted(&self, candidate: &Correspondence, accepted: &[Correspondence]) -> bool {
        accepted.iter().all(|other| {
            (other.point_world - candidate.point_world).norm()
                >= self.config.min_mode_separation
        })
    }

    /// Rigidity: camera-space and world-space pairwise distances must agree
    /// within half the pose-error tolerance, and the camera-space distance
    /// itself must exceed the separation threshold.
    fn rigidity_holds(&self, candidate: &Correspondence, accepted: &[Correspondence]) -> bool {
        accepted.iter().all(|other| {
            let dist_world = (other.point_world - candidate.point_world).norm();
            let dist_local = (other.point_cam - candidate.point_cam).norm();
            dist_local >= self.config.min_mode_separation
                && (dist_local - dist_world).abs()
                    <= 0.5 * self.config.pose_error_tolerance
        })
    }
}
