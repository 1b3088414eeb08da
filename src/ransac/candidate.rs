//! Pose hypotheses and their supporting correspondences.

use crate::geometry::SE3;

/// A pixel currently supporting a pose hypothesis.
///
/// The mode index and energy are unset until the first scoring pass touches
/// the sample.
#[derive(Debug, Clone)]
pub struct InlierSample {
    /// Linear pixel index into the feature/prediction images.
    pub pixel_idx: usize,
    /// Index of the mode chosen at the last scoring pass.
    pub mode_idx: Option<usize>,
    /// Energy contributed at the last scoring pass.
    pub energy: f64,
}

impl InlierSample {
    /// A freshly sampled, not-yet-scored inlier.
    pub fn unscored(pixel_idx: usize) -> Self {
        Self {
            pixel_idx,
            mode_idx: None,
            energy: 0.0,
        }
    }
}

/// A pose hypothesis: camera-to-world transform plus supporting evidence.
#[derive(Debug, Clone)]
pub struct PoseCandidate {
    /// Camera-to-world rigid transform.
    pub pose: SE3,
    /// Pixels currently supporting this hypothesis.
    pub inliers: Vec<InlierSample>,
    /// Mean inlier energy; meaningful only after scoring the current set.
    pub energy: f64,
    /// Identifier of the hypothesis slot that produced this candidate.
    pub id: usize,
}

impl PoseCandidate {
    pub fn new(pose: SE3, inliers: Vec<InlierSample>, id: usize) -> Self {
        Self {
            pose,
            inliers,
            energy: 0.0,
            id,
        }
    }
}
