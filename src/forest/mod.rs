//! Regression forest: per-pixel multi-modal 3D predictions and online
//! leaf-statistics updates.

pub mod mode;
pub mod regression;

pub use mode::{Mode, Prediction, PredictionImage};
pub use regression::{LeafStatistics, RegressionForest, Tree, TreeNode};
