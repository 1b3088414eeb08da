//! Camera relocalization from per-pixel scene-coordinate regression.
//!
//! A regression forest maps pixel descriptors to multi-modal 3D world-point
//! predictions; geometrically-constrained Kabsch sampling turns them into
//! pose hypotheses; preemptive RANSAC selects a winner under a growing
//! evidence set; Levenberg-Marquardt polishes the pose. The `relocalizer`
//! module ties the pipeline to an external frame tracker.

pub mod config;
pub mod forest;
pub mod frame;
pub mod geometry;
pub mod ransac;
pub mod relocalizer;
