//! Relocalization controller.
//!
//! Sits beside an external frame tracker: frames with good tracking feed the
//! forest's online leaf statistics, frames with lost tracking trigger the
//! full relocalization pipeline (forest evaluation, hypothesis sampling,
//! preemptive RANSAC, final pose polish, optional tracker verification).

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::info;

use crate::config::{DowngradePolicy, RelocalizerConfig};
use crate::forest::RegressionForest;
use crate::frame::FeatureImage;
use crate::geometry::SE3;
use crate::ransac::{HypothesisSampler, PoseRefiner, PreemptiveRansac};

/// Tracking verdict for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Pose is trusted; the frame may train the forest.
    Good,
    /// Pose is usable but not trusted enough to train on.
    Poor,
    /// Tracking is lost; the frame needs relocalization.
    Failed,
}

/// External tracker hook: one verification pass from a recovered pose.
pub trait FrameTracker {
    fn track(&mut self, features: &FeatureImage, pose: &SE3) -> (TrackingStatus, SE3);
}

/// Drives the forest and the RANSAC pipeline from per-frame tracking verdicts.
pub struct Relocalizer {
    forest: Arc<RwLock<RegressionForest>>,
    sampler: HypothesisSampler,
    ransac: PreemptiveRansac,
    refiner: PoseRefiner,
    config: RelocalizerConfig,
}

impl Relocalizer {
    pub fn new(forest: Arc<RwLock<RegressionForest>>, config: RelocalizerConfig) -> Self {
        Self {
            forest,
            sampler: HypothesisSampler::new(config.sampler.clone()),
            ransac: PreemptiveRansac::new(config.ransac.clone(), config.refiner.clone()),
            refiner: PoseRefiner::new(config.refiner.clone()),
            config,
        }
    }

    /// Shared handle to the forest, for callers that persist or inspect it.
    pub fn forest(&self) -> &Arc<RwLock<RegressionForest>> {
        &self.forest
    }

    /// Process one tracked frame and return the resulting verdict and pose.
    ///
    /// `Good` frames train the forest and pass through; `Poor` frames pass
    /// through untouched; `Failed` frames attempt relocalization. The
    /// optional `tracker` is only consulted to verify a recovered pose.
    pub fn process_frame(
        &self,
        features: &FeatureImage,
        status: TrackingStatus,
        pose: &SE3,
        tracker: Option<&mut dyn FrameTracker>,
    ) -> Result<(TrackingStatus, SE3)> {
        match status {
            TrackingStatus::Good => {
                self.forest.write().update(features, pose);
                Ok((TrackingStatus::Good, pose.clone()))
            }
            TrackingStatus::Poor => Ok((TrackingStatus::Poor, pose.clone())),
            TrackingStatus::Failed => self.relocalize(features, pose, tracker),
        }
    }

    fn relocalize(
        &self,
        features: &FeatureImage,
        prior_pose: &SE3,
        tracker: Option<&mut dyn FrameTracker>,
    ) -> Result<(TrackingStatus, SE3)> {
        let valid = features.count_valid();
        let required = self.ransac.min_required_valid_pixels();
        if valid < required {
            info!(valid, required, "too few valid pixels, skipping relocalization");
            return Ok((TrackingStatus::Failed, prior_pose.clone()));
        }

        let predictions = self.forest.read().evaluate(features);
        let candidates = self.sampler.generate(features, &predictions);
        let Some(mut winner) = self.ransac.select(features, &predictions, candidates)? else {
            info!("no pose hypothesis survived sampling");
            return Ok((TrackingStatus::Failed, prior_pose.clone()));
        };

        // Final polish over the winner's full inlier history.
        self.refiner.refine(&mut winner, features, &predictions)?;
        info!(
            candidate = winner.id,
            energy = winner.energy,
            inliers = winner.inliers.len(),
            "relocalization recovered a pose"
        );

        let (verdict, pose) = match tracker {
            Some(tracker) => tracker.track(features, &winner.pose),
            None => (TrackingStatus::Good, winner.pose),
        };

        // A pose was found, so the attempt counts as a recovery; the default
        // policy reports Poor regardless of the verification verdict.
        let status = match self.config.downgrade_after_success {
            DowngradePolicy::DowngradeToPoor => TrackingStatus::Poor,
            DowngradePolicy::KeepTrackerVerdict => verdict,
        };
        Ok((status, pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForestConfig, PreemptiveRansacConfig, SamplerConfig};
    use crate::forest::{LeafStatistics, Mode, Tree, TreeNode};
    use crate::frame::Feature;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, UnitQuaternion, Vector3};

    /// Scene where pixel i carries descriptor [i] and the forest routes it to
    /// a dedicated leaf holding one mode at the pixel's true world point.
    fn trained_scene(
        width: usize,
        height: usize,
        pose: &SE3,
        config: &ForestConfig,
    ) -> (FeatureImage, RegressionForest) {
        let n = width * height;
        let world_to_cam = pose.inverse();
        let sigma: f64 = 0.05;
        let variance = sigma * sigma;

        let mut features = Vec::with_capacity(n);
        let mut leaves = Vec::with_capacity(n);
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                let world = Vector3::new(x as f64 * 0.1, y as f64 * 0.1, 1.0);
                features.push(Feature {
                    point_cam: Some(world_to_cam.transform_point(&world)),
                    colour: [128, 128, 128],
                    descriptor: vec![idx as f32],
                });
                leaves.push(LeafStatistics::from_modes(vec![Mode {
                    position: world,
                    inv_covariance: Matrix3::identity() / variance,
                    determinant: variance.powi(3),
                    colour: [128, 128, 128],
                    n_inliers: 10,
                }]));
            }
        }

        // Decision list: node 2k splits on descriptor[0] <= k + 0.5.
        let mut nodes = Vec::with_capacity(2 * n);
        for i in 0..n - 1 {
            nodes.push(TreeNode::Split {
                feature_idx: 0,
                threshold: i as f32 + 0.5,
                left: 2 * i + 1,
                right: 2 * i + 2,
            });
            nodes.push(TreeNode::Leaf(i));
        }
        nodes.push(TreeNode::Leaf(n - 1));

        let forest =
            RegressionForest::new(vec![Tree::new(nodes)], leaves, config.clone()).unwrap();
        (FeatureImage::new(width, height, features), forest)
    }

    fn test_config() -> RelocalizerConfig {
        RelocalizerConfig {
            sampler: SamplerConfig {
                initial_candidates: 32,
                ..SamplerConfig::default()
            },
            ransac: PreemptiveRansacConfig {
                batch_size: 64,
                ..PreemptiveRansacConfig::default()
            },
            ..RelocalizerConfig::default()
        }
    }

    fn relocalizer_for(pose: &SE3, config: RelocalizerConfig) -> (FeatureImage, Relocalizer) {
        let (features, forest) = trained_scene(24, 24, pose, &config.forest);
        (
            features,
            Relocalizer::new(Arc::new(RwLock::new(forest)), config),
        )
    }

    struct VerdictTracker(TrackingStatus);

    impl FrameTracker for VerdictTracker {
        fn track(&mut self, _features: &FeatureImage, pose: &SE3) -> (TrackingStatus, SE3) {
            (self.0, pose.clone())
        }
    }

    #[test]
    fn test_too_few_pixels_stays_failed() {
        let truth = SE3::identity();
        let config = test_config();
        let (_, forest) = trained_scene(4, 4, &truth, &config.forest);
        let relocalizer = Relocalizer::new(Arc::new(RwLock::new(forest)), config);

        // 16 valid pixels against a 64-pixel batch requirement.
        let features = FeatureImage::new(4, 4, vec![Feature::invalid(); 16]);
        let prior = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(9.0, 9.0, 9.0),
        };
        let (status, pose) = relocalizer
            .process_frame(&features, TrackingStatus::Failed, &prior, None)
            .unwrap();
        assert_eq!(status, TrackingStatus::Failed);
        assert_eq!(pose, prior);
    }

    #[test]
    fn test_failed_frame_recovers_pose_as_poor() {
        let truth = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.1, -0.05, 0.15),
            translation: Vector3::new(0.6, -0.2, 0.8),
        };
        let (features, relocalizer) = relocalizer_for(&truth, test_config());

        let (status, pose) = relocalizer
            .process_frame(&features, TrackingStatus::Failed, &SE3::identity(), None)
            .unwrap();
        assert_eq!(status, TrackingStatus::Poor);
        assert_relative_eq!(pose.translation, truth.translation, epsilon = 1e-3);
        assert_relative_eq!(pose.rotation_matrix(), truth.rotation_matrix(), epsilon = 1e-3);
    }

    #[test]
    fn test_keep_tracker_verdict_reports_good() {
        let truth = SE3::identity();
        let config = RelocalizerConfig {
            downgrade_after_success: DowngradePolicy::KeepTrackerVerdict,
            ..test_config()
        };
        let (features, relocalizer) = relocalizer_for(&truth, config);

        let mut tracker = VerdictTracker(TrackingStatus::Good);
        let (status, _) = relocalizer
            .process_frame(
                &features,
                TrackingStatus::Failed,
                &SE3::identity(),
                Some(&mut tracker),
            )
            .unwrap();
        assert_eq!(status, TrackingStatus::Good);
    }

    #[test]
    fn test_failed_verification_still_reports_poor() {
        // Once a pose was recovered, the default policy downgrades to Poor
        // no matter what the verification pass says.
        let truth = SE3::identity();
        let (features, relocalizer) = relocalizer_for(&truth, test_config());

        let mut tracker = VerdictTracker(TrackingStatus::Failed);
        let (status, _) = relocalizer
            .process_frame(
                &features,
                TrackingStatus::Failed,
                &SE3::identity(),
                Some(&mut tracker),
            )
            .unwrap();
        assert_eq!(status, TrackingStatus::Poor);
    }

    #[test]
    fn test_keep_tracker_verdict_reports_failed_verification() {
        let truth = SE3::identity();
        let config = RelocalizerConfig {
            downgrade_after_success: DowngradePolicy::KeepTrackerVerdict,
            ..test_config()
        };
        let (features, relocalizer) = relocalizer_for(&truth, config);

        let mut tracker = VerdictTracker(TrackingStatus::Failed);
        let (status, _) = relocalizer
            .process_frame(
                &features,
                TrackingStatus::Failed,
                &SE3::identity(),
                Some(&mut tracker),
            )
            .unwrap();
        assert_eq!(status, TrackingStatus::Failed);
    }

    #[test]
    fn test_good_frame_trains_the_forest() {
        let truth = SE3::identity();
        let (features, relocalizer) = relocalizer_for(&truth, test_config());

        let before = relocalizer.forest().read().leaf(0).modes()[0].n_inliers;
        let (status, _) = relocalizer
            .process_frame(&features, TrackingStatus::Good, &truth, None)
            .unwrap();
        assert_eq!(status, TrackingStatus::Good);
        let after = relocalizer.forest().read().leaf(0).modes()[0].n_inliers;
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_poor_frame_passes_through() {
        let truth = SE3::identity();
        let (features, relocalizer) = relocalizer_for(&truth, test_config());

        let before = relocalizer.forest().read().leaf(0).modes()[0].n_inliers;
        let pose = SE3 {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::new(1.0, 2.0, 3.0),
        };
        let (status, out) = relocalizer
            .process_frame(&features, TrackingStatus::Poor, &pose, None)
            .unwrap();
        assert_eq!(status, TrackingStatus::Poor);
        assert_eq!(out, pose);
        // Poor frames must not train.
        let after = relocalizer.forest().read().leaf(0).modes()[0].n_inliers;
        assert_eq!(after, before);
    }
}
