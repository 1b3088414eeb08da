//! Continuous pose refinement via Levenberg-Marquardt.
//!
//! Minimizes, over the 6-DOF camera-to-world pose, the distance between each
//! supporting pixel's projected camera point and the mean of its best
//! prediction mode. Residuals are Mahalanobis distances under the mode's
//! covariance, or plain Euclidean distances when the full covariance is
//! disabled.

use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use tracing::trace;

use crate::config::RefinerConfig;
use crate::forest::{Mode, PredictionImage};
use crate::frame::FeatureImage;
use crate::geometry::SE3;
use crate::ransac::candidate::PoseCandidate;

/// Fewer correspondences than this leave the 6-DOF problem too close to
/// degenerate to be worth solving.
const MIN_REFINEMENT_PAIRS: usize = 4;

/// One term of the refinement objective.
struct RefinementPair {
    point_cam: nalgebra::Vector3<f64>,
    mode: Mode,
}

/// Levenberg-Marquardt optimizer for a single pose candidate.
pub struct PoseRefiner {
    config: RefinerConfig,
}

impl PoseRefiner {
    pub fn new(config: RefinerConfig) -> Self {
        Self { config }
    }

    /// Refine `candidate.pose` against its current inlier set.
    ///
    /// Returns `Ok(true)` and installs the refined pose only when the final
    /// objective is strictly lower than the initial one; otherwise the pose
    /// is left untouched. A candidate already at a local minimum therefore
    /// reports `Ok(false)` with its pose bit-for-bit unchanged.
    pub fn refine(
        &self,
        candidate: &mut PoseCandidate,
        features: &FeatureImage,
        predictions: &PredictionImage,
    ) -> Result<bool> {
        let pairs = self.collect_pairs(candidate, features, predictions)?;
        if pairs.len() < MIN_REFINEMENT_PAIRS {
            trace!(
                candidate = candidate.id,
                pairs = pairs.len(),
                "too few refinement pairs, keeping pose"
            );
            return Ok(false);
        }

        let mut params = candidate.pose.to_twist();
        let mut residuals = self.residuals(&params, &pairs);
        let mut current_cost = residuals.norm_squared();
        let initial_cost = current_cost;

        let mut lambda = 1e-3;
        let lambda_up = 10.0;
        let lambda_down = 0.1;
        let min_lambda = 1e-10;
        let max_lambda = 1e10;

        for _ in 0..self.config.max_iterations {
            let jacobian = self.jacobian(&params, &pairs);
            let gradient = jacobian.transpose() * &residuals;
            if gradient.norm() < self.config.gradient_tolerance {
                break;
            }

            let jtj = jacobian.transpose() * &jacobian;
            let mut damped_jtj = jtj.clone();
            for i in 0..6 {
                damped_jtj[(i, i)] += lambda * damped_jtj[(i, i)].max(1e-6);
            }

            let delta = match damped_jtj.lu().solve(&(-&gradient)) {
                Some(d) => d,
                None => break,
            };

            let mut trial = params;
            for i in 0..6 {
                trial[i] += delta[i];
            }
            let trial_residuals = self.residuals(&trial, &pairs);
            let trial_cost = trial_residuals.norm_squared();

            if trial_cost < current_cost {
                params = trial;
                residuals = trial_residuals;
                current_cost = trial_cost;
                lambda = (lambda * lambda_down).max(min_lambda);
            } else {
                lambda = (lambda * lambda_up).min(max_lambda);
            }
        }

        if current_cost < initial_cost {
            candidate.pose = SE3::from_twist(&params);
            trace!(
                candidate = candidate.id,
                initial_cost,
                final_cost = current_cost,
                "pose refined"
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Build the refinement set from the candidate's inliers.
    ///
    /// A pixel enters the set only if its projection under the current pose
    /// lands within the inlier threshold of its best mode's mean; outliers of
    /// a roughly-correct pose are excluded rather than dragged along.
    fn collect_pairs(
        &self,
        candidate: &PoseCandidate,
        features: &FeatureImage,
        predictions: &PredictionImage,
    ) -> Result<Vec<RefinementPair>> {
        let mut pairs = Vec::with_capacity(candidate.inliers.len());
        for inlier in &candidate.inliers {
            let point_cam = features
                .get(inlier.pixel_idx)
                .point_cam
                .with_context(|| {
                    format!(
                        "inlier {} references a pixel without valid depth",
                        inlier.pixel_idx
                    )
                })?;
            let projected = candidate.pose.transform_point(&point_cam);

            let prediction = predictions.get(inlier.pixel_idx);
            let mode_idx = prediction.best_mode(&projected).with_context(|| {
                format!("inlier {} references a zero-mode prediction", inlier.pixel_idx)
            })?;
            let mode = &prediction.modes[mode_idx];

            if (projected - mode.position).norm() < self.config.inlier_threshold {
                pairs.push(RefinementPair {
                    point_cam,
                    mode: mode.clone(),
                });
            }
        }
        Ok(pairs)
    }

    fn residuals(&self, twist: &[f64; 6], pairs: &[RefinementPair]) -> DVector<f64> {
        let pose = SE3::from_twist(twist);
        DVector::from_iterator(
            pairs.len(),
            pairs.iter().map(|pair| {
                let projected = pose.transform_point(&pair.point_cam);
                if self.config.use_full_covariance {
                    pair.mode.mahalanobis_sq(&projected).sqrt()
                } else {
                    (projected - pair.mode.position).norm()
                }
            }),
        )
    }

    /// Central-difference Jacobian of the residual vector.
    fn jacobian(&self, twist: &[f64; 6], pairs: &[RefinementPair]) -> DMatrix<f64> {
        let h = self.config.differentiation_step;
        let mut jacobian = DMatrix::zeros(pairs.len(), 6);
        for j in 0..6 {
            let mut forward = *twist;
            let mut backward = *twist;
            forward[j] += h;
            backward[j] -= h;
            let r_forward = self.residuals(&forward, pairs);
            let r_backward = self.residuals(&backward, pairs);
            for i in 0..pairs.len() {
                jacobian[(i, j)] = (r_forward[i] - r_backward[i]) / (2.0 * h);
            }
        }
        jacobian
    }
}
