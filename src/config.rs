//! Configuration surface for the relocalization pipeline.
//!
//! Each pipeline stage has its own config struct with defaults matching the
//! reference parameterization; `RelocalizerConfig` aggregates them for the
//! controller.

use serde::{Deserialize, Serialize};

/// Configuration for the regression forest evaluation and online update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Maximum number of modes kept per merged per-pixel prediction.
    pub max_modes_per_leaf: usize,
    /// World-space radius within which a new observation is folded into an
    /// existing mode instead of spawning a new one.
    pub mode_merge_radius: f64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            max_modes_per_leaf: 10,
            mode_merge_radius: 0.3,
        }
    }
}

/// Configuration for minimal-set hypothesis sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Number of pose hypotheses requested per relocalization attempt.
    pub initial_candidates: usize,
    /// Minimum world-space distance between modes of accepted correspondences.
    pub min_mode_separation: f64,
    /// Translation tolerance of the rigidity check; local and world pairwise
    /// distances must agree within half of this value.
    pub pose_error_tolerance: f64,
    /// Per-channel colour tolerance for the first accepted correspondence.
    pub colour_tolerance: u8,
    /// Pick the sampled mode uniformly among all modes of the prediction;
    /// when false only the dominant mode is used.
    pub use_all_modes: bool,
    /// Enable the minimum-separation constraint.
    pub check_min_mode_separation: bool,
    /// Enable the pairwise rigidity constraint.
    pub check_rigid_transform: bool,
    /// Correspondence-draw budget for a single hypothesis.
    pub max_inner_iterations: usize,
    /// Whole-hypothesis retry budget before the slot is abandoned.
    pub max_outer_iterations: usize,
    /// Base seed for the per-hypothesis random streams.
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            initial_candidates: 1024,
            min_mode_separation: 0.3,
            pose_error_tolerance: 0.05,
            colour_tolerance: 30,
            use_all_modes: true,
            check_min_mode_separation: true,
            check_rigid_transform: true,
            max_inner_iterations: 6000,
            max_outer_iterations: 20,
            seed: 42,
        }
    }
}

/// Configuration for the preemptive elimination tournament.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreemptiveRansacConfig {
    /// Number of previously-unsampled pixels added per scoring round.
    pub batch_size: usize,
    /// Random-draw budget for a single batch slot before the batch is
    /// returned partially filled.
    pub max_draws_per_slot: usize,
    /// If the initial pool is larger than this, one scoring round is run and
    /// the pool is cut down to this size before the tournament proper.
    pub trim_after_first_scoring: usize,
    /// Re-optimize every surviving candidate's pose each round.
    pub pose_update: bool,
    /// Seed for the batch-sampling random stream.
    pub seed: u64,
}

impl Default for PreemptiveRansacConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_draws_per_slot: 50,
            trim_after_first_scoring: 64,
            pose_update: true,
            seed: 42,
        }
    }
}

/// Configuration for continuous pose refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Maximum distance between a projected inlier and its best mode's mean
    /// for the pair to enter the refinement set.
    pub inlier_threshold: f64,
    /// Maximum number of Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// Step used for numerical differentiation of the residuals.
    pub differentiation_step: f64,
    /// Stop once the gradient norm falls below this value.
    pub gradient_tolerance: f64,
    /// Weight residuals by the mode's inverse covariance (Mahalanobis);
    /// when false plain squared Euclidean distances are minimized.
    pub use_full_covariance: bool,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: 0.2,
            max_iterations: 100,
            differentiation_step: 1e-4,
            gradient_tolerance: 1e-6,
            use_full_covariance: true,
        }
    }
}

/// Aggregated configuration for the relocalization controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelocalizerConfig {
    pub forest: ForestConfig,
    pub sampler: SamplerConfig,
    pub ransac: PreemptiveRansacConfig,
    pub refiner: RefinerConfig,
    /// Report any completed relocalization as `TrackingStatus::Poor`,
    /// whatever the external verification pass says, signalling "recovered
    /// but unverified" to the caller.
    pub downgrade_after_success: DowngradePolicy,
}

/// Policy applied to the tracking status after a successful relocalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DowngradePolicy {
    /// Always report `Poor` once a pose was recovered, even if the
    /// verification pass fails; the pose needs one more verified frame.
    DowngradeToPoor,
    /// Trust the external tracker's verdict as-is.
    KeepTrackerVerdict,
}

impl Default for DowngradePolicy {
    fn default() -> Self {
        Self::DowngradeToPoor
    }
}
