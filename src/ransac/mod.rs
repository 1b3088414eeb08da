//! Hypothesize-and-select pose estimation.
//!
//! `sampler` draws geometrically-constrained minimal sets into pose
//! hypotheses, `preemptive` runs the elimination tournament over them, and
//! `refinement` polishes candidate poses between rounds.

pub mod candidate;
pub mod energy;
pub mod preemptive;
pub mod refinement;
pub mod sampler;

#[cfg(test)]
pub(crate) mod testutil;

pub use candidate::{InlierSample, PoseCandidate};
pub use energy::compute_pose_energy;
pub use preemptive::PreemptiveRansac;
pub use refinement::PoseRefiner;
pub use sampler::HypothesisSampler;
