//! Regression forest evaluation and online leaf-statistics update.
//!
//! The forest itself is trained externally; this module routes descriptors
//! through the trained split nodes, merges the reached leaves' mode lists
//! into per-pixel predictions, and folds new world-space observations into
//! leaf statistics while tracking is good.
//!
//! Nodes and leaves are arena-allocated and index-referenced: trees store
//! node indices, split nodes store child indices, leaf nodes store an index
//! into the forest-wide leaf arena.

use anyhow::{Result, ensure};
use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::config::ForestConfig;
use crate::forest::{Mode, Prediction, PredictionImage};
use crate::frame::FeatureImage;
use crate::geometry::SE3;

/// Variance assigned to a freshly spawned mode, before enough observations
/// have accumulated to estimate a covariance.
const INITIAL_MODE_VARIANCE: f64 = 0.0025;

/// Diagonal jitter added when inverting an estimated covariance.
const COVARIANCE_JITTER: f64 = 1e-6;

/// Observations needed before the covariance estimate replaces the initial one.
const MIN_OBSERVATIONS_FOR_COVARIANCE: usize = 3;

/// A node of a trained regression tree.
#[derive(Debug, Clone)]
pub enum TreeNode {
    /// Route left when `descriptor[feature_idx] <= threshold`, right otherwise.
    Split {
        feature_idx: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
    /// Terminal node referencing a leaf in the forest-wide arena.
    Leaf(usize),
}

/// A single trained tree; the root is node 0.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Index of the leaf reached by `descriptor`.
    fn leaf_for(&self, descriptor: &[f32]) -> usize {
        let mut node_idx = 0;
        loop {
            match &self.nodes[node_idx] {
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    let value = descriptor.get(*feature_idx).copied().unwrap_or(0.0);
                    node_idx = if value <= *threshold { *left } else { *right };
                }
                TreeNode::Leaf(leaf_idx) => return *leaf_idx,
            }
        }
    }
}

/// Per-leaf statistics: the mode list plus the running scatter matrices that
/// back the online covariance estimates.
#[derive(Debug, Clone, Default)]
pub struct LeafStatistics {
    modes: Vec<Mode>,
    scatters: Vec<Matrix3<f64>>,
}

impl LeafStatistics {
    /// Build leaf statistics from externally trained modes.
    pub fn from_modes(modes: Vec<Mode>) -> Self {
        let scatters = vec![Matrix3::zeros(); modes.len()];
        Self { modes, scatters }
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    /// Fold a world-space observation into the leaf.
    ///
    /// The nearest mode within the merge radius receives an incremental
    /// mean/covariance update; otherwise a fresh mode is spawned while the
    /// leaf is below the mode cap, else the observation is dropped.
    fn fold_observation(&mut self, world: &Vector3<f64>, colour: [u8; 3], config: &ForestConfig) {
        let nearest = self
            .modes
            .iter()
            .enumerate()
            .map(|(idx, mode)| (idx, (mode.position - world).norm()))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            Some((idx, dist)) if dist < config.mode_merge_radius => {
                self.update_mode(idx, world, colour);
            }
            _ if self.modes.len() < config.max_modes_per_leaf => {
                self.modes.push(Mode {
                    position: *world,
                    inv_covariance: Matrix3::identity() / INITIAL_MODE_VARIANCE,
                    determinant: INITIAL_MODE_VARIANCE.powi(3),
                    colour,
                    n_inliers: 1,
                });
                self.scatters.push(Matrix3::zeros());
            }
            _ => {}
        }
    }

    /// Welford-style update of mean, scatter and colour for one mode.
    fn update_mode(&mut self, idx: usize, world: &Vector3<f64>, colour: [u8; 3]) {
        let mode = &mut self.modes[idx];
        let n_old = mode.n_inliers as f64;
        let n_new = n_old + 1.0;

        let delta_before = world - mode.position;
        mode.position += delta_before / n_new;
        let delta_after = world - mode.position;
        self.scatters[idx] += delta_before * delta_after.transpose();

        for c in 0..3 {
            let blended = (mode.colour[c] as f64 * n_old + colour[c] as f64) / n_new;
            mode.colour[c] = blended.round() as u8;
        }
        mode.n_inliers += 1;

        if mode.n_inliers >= MIN_OBSERVATIONS_FOR_COVARIANCE {
            let covariance = self.scatters[idx] / (mode.n_inliers as f64 - 1.0)
                + Matrix3::identity() * COVARIANCE_JITTER;
            if let Some(inverse) = covariance.try_inverse() {
                mode.inv_covariance = inverse;
                mode.determinant = covariance.determinant();
            }
        }
    }
}

/// A trained regression forest with online-updatable leaf statistics.
pub struct RegressionForest {
    trees: Vec<Tree>,
    leaves: Vec<LeafStatistics>,
    config: ForestConfig,
}

impl RegressionForest {
    /// Assemble a forest from trained trees and leaf statistics.
    ///
    /// Validates that every node reference stays inside the arenas.
    pub fn new(
        trees: Vec<Tree>,
        leaves: Vec<LeafStatistics>,
        config: ForestConfig,
    ) -> Result<Self> {
        ensure!(!trees.is_empty(), "forest needs at least one tree");
        for (tree_idx, tree) in trees.iter().enumerate() {
            ensure!(
                !tree.nodes.is_empty(),
                "tree {} has no nodes",
                tree_idx
            );
            for node in &tree.nodes {
                match node {
                    TreeNode::Split { left, right, .. } => {
                        ensure!(
                            *left < tree.nodes.len() && *right < tree.nodes.len(),
                            "tree {} has an out-of-range child index",
                            tree_idx
                        );
                    }
                    TreeNode::Leaf(leaf_idx) => {
                        ensure!(
                            *leaf_idx < leaves.len(),
                            "tree {} references leaf {} outside the arena",
                            tree_idx,
                            leaf_idx
                        );
                    }
                }
            }
        }
        Ok(Self {
            trees,
            leaves,
            config,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaf(&self, leaf_idx: usize) -> &LeafStatistics {
        &self.leaves[leaf_idx]
    }

    /// Route every pixel's descriptor through the forest and merge the
    /// reached leaves' modes into one prediction per pixel.
    ///
    /// Pixels with invalid features or only empty leaves produce a zero-mode
    /// prediction.
    pub fn evaluate(&self, features: &FeatureImage) -> PredictionImage {
        let predictions: Vec<Prediction> = (0..features.len())
            .into_par_iter()
            .map(|idx| self.predict_pixel(features, idx))
            .collect();
        PredictionImage::new(features.width(), features.height(), predictions)
    }

    fn predict_pixel(&self, features: &FeatureImage, linear_idx: usize) -> Prediction {
        let feature = features.get(linear_idx);
        if !feature.is_valid() {
            return Prediction::empty();
        }

        let mut modes: Vec<Mode> = Vec::new();
        for tree in &self.trees {
            let leaf_idx = tree.leaf_for(&feature.descriptor);
            modes.extend_from_slice(self.leaves[leaf_idx].modes());
        }

        // Keep the dominant modes: descending inlier count, capped.
        modes.sort_by(|a, b| b.n_inliers.cmp(&a.n_inliers));
        modes.truncate(self.config.max_modes_per_leaf);

        Prediction { modes }
    }

    /// Fold each valid feature, transformed into world space via `pose`, into
    /// the statistics of the leaf its descriptor reaches in every tree.
    ///
    /// Intended for frames with confirmed-good tracking only; callers must
    /// not run this concurrently with `evaluate` on the same forest.
    pub fn update(&mut self, features: &FeatureImage, pose: &SE3) {
        let mut folded = 0usize;
        for feature in features.iter() {
            let Some(point_cam) = feature.point_cam else {
                continue;
            };
            let world = pose.transform_point(&point_cam);
            for tree_idx in 0..self.trees.len() {
                let leaf_idx = self.trees[tree_idx].leaf_for(&feature.descriptor);
                self.leaves[leaf_idx].fold_observation(&world, feature.colour, &self.config);
            }
            folded += 1;
        }
        debug!(folded, trees = self.trees.len(), "updated forest leaf statistics");
    }
}
