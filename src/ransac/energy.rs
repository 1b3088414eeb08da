//! Robust evidence energy of a pose hypothesis.

use anyhow::{Context, Result, ensure};

use crate::forest::PredictionImage;
use crate::frame::FeatureImage;
use crate::geometry::SE3;
use crate::ransac::candidate::InlierSample;

/// Floor applied to the normalized likelihood before taking the log.
const MIN_NORMALIZED_LIKELIHOOD: f64 = 1e-6;

/// Score every inlier against `pose` and return the candidate's total energy
/// (mean inlier energy). Each inlier's chosen mode and energy are updated in
/// place.
///
/// Upstream sampling guarantees that every inlier references a valid feature
/// and a prediction with at least one mode; a violation is a programming
/// error and fails loudly instead of biasing the pose estimate.
pub fn compute_pose_energy(
    pose: &SE3,
    inliers: &mut [InlierSample],
    features: &FeatureImage,
    predictions: &PredictionImage,
) -> Result<f64> {
    ensure!(!inliers.is_empty(), "cannot score a candidate without inliers");

    let mut total = 0.0;
    for inlier in inliers.iter_mut() {
        let point_cam = features
            .get(inlier.pixel_idx)
            .point_cam
            .with_context(|| {
                format!("inlier {} references a pixel without valid depth", inlier.pixel_idx)
            })?;
        let projected = pose.transform_point(&point_cam);

        let prediction = predictions.get(inlier.pixel_idx);
        let (mode_idx, score) = prediction
            .best_mode_and_score(&projected)
            .with_context(|| {
                format!("inlier {} references a zero-mode prediction", inlier.pixel_idx)
            })?;
        let mode = &prediction.modes[mode_idx];
        ensure!(
            mode.n_inliers > 0,
            "chosen mode for pixel {} has no training inliers",
            inlier.pixel_idx
        );

        let normalized =
            score / (prediction.num_modes() as f64 * mode.n_inliers as f64);
        let energy = -normalized.max(MIN_NORMALIZED_LIKELIHOOD).log10();

        inlier.mode_idx = Some(mode_idx);
        inlier.energy = energy;
        total += energy;
    }

    Ok(total / inliers.len() as f64)
}
