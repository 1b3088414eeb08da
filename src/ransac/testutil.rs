//! Shared synthetic scenes for RANSAC tests.

use nalgebra::{Matrix3, Vector3};

use crate::forest::{Mode, Prediction, PredictionImage};
use crate::frame::{Feature, FeatureImage};
use crate::geometry::SE3;

/// Standard deviation of the isotropic modes in synthetic scenes.
pub const SCENE_SIGMA: f64 = 0.05;

/// Build a noise-free planar scene observed under `pose` (camera-to-world).
///
/// Pixel (x, y) sees the world point (x*spacing, y*spacing, 1.0); its
/// camera-space point is the world point mapped back through the inverse
/// pose, and its prediction holds a single isotropic mode centred exactly on
/// the world point. Feature and mode colours agree everywhere.
pub fn synthetic_scene(
    width: usize,
    height: usize,
    pose: &SE3,
    spacing: f64,
) -> (FeatureImage, PredictionImage) {
    let world_to_cam = pose.inverse();
    let variance = SCENE_SIGMA * SCENE_SIGMA;

    let mut features = Vec::with_capacity(width * height);
    let mut predictions = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let world = Vector3::new(x as f64 * spacing, y as f64 * spacing, 1.0);
            let cam = world_to_cam.transform_point(&world);
            features.push(Feature {
                point_cam: Some(cam),
                colour: [128, 128, 128],
                descriptor: Vec::new(),
            });
            predictions.push(Prediction {
                modes: vec![Mode {
                    position: world,
                    inv_covariance: Matrix3::identity() / variance,
                    determinant: variance.powi(3),
                    colour: [128, 128, 128],
                    n_inliers: 10,
                }],
            });
        }
    }

    (
        FeatureImage::new(width, height, features),
        PredictionImage::new(width, height, predictions),
    )
}
