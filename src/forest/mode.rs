//! Multi-modal per-pixel predictions.
//!
//! A leaf's predictive distribution is a small set of 3D Gaussian modes; the
//! per-pixel `Prediction` is the merge of the modes of every leaf the pixel's
//! descriptor reached across the forest.

use nalgebra::{Matrix3, Vector3};

/// Normalizing constant of a 3D Gaussian: (2*pi)^3.
const TWO_PI_CUBED: f64 = 248.05021344239853;

/// One Gaussian component of a leaf's predictive distribution.
#[derive(Debug, Clone)]
pub struct Mode {
    /// Mean world-space position.
    pub position: Vector3<f64>,
    /// Inverse of the positional covariance.
    pub inv_covariance: Matrix3<f64>,
    /// Determinant of the positional covariance.
    pub determinant: f64,
    /// Representative colour of the training observations.
    pub colour: [u8; 3],
    /// Number of training observations folded into this mode.
    pub n_inliers: usize,
}

impl Mode {
    /// Squared Mahalanobis distance of `p` from the mode.
    pub fn mahalanobis_sq(&self, p: &Vector3<f64>) -> f64 {
        let diff = p - self.position;
        diff.dot(&(self.inv_covariance * diff))
    }

    /// Gaussian density of the mode evaluated at `p`.
    pub fn density(&self, p: &Vector3<f64>) -> f64 {
        let normalizer = 1.0 / (TWO_PI_CUBED * self.determinant).sqrt();
        normalizer * (-0.5 * self.mahalanobis_sq(p)).exp()
    }

    /// Evidence-weighted score used for mode selection.
    pub fn score(&self, p: &Vector3<f64>) -> f64 {
        self.n_inliers as f64 * self.density(p)
    }
}

/// The merged set of modes reachable for one pixel across the forest.
///
/// Recomputed on every forest evaluation; a pixel with an invalid feature or
/// only empty leaves gets a zero-mode prediction and is skipped downstream.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub modes: Vec<Mode>,
}

impl Prediction {
    pub fn empty() -> Self {
        Self { modes: Vec::new() }
    }

    pub fn num_modes(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Index of the mode with the highest evidence-weighted score at `p`,
    /// ties resolved by the lowest index. `None` for a zero-mode prediction.
    pub fn best_mode(&self, p: &Vector3<f64>) -> Option<usize> {
        self.best_mode_and_score(p).map(|(idx, _)| idx)
    }

    /// Best mode index together with its raw score at `p`.
    pub fn best_mode_and_score(&self, p: &Vector3<f64>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, mode) in self.modes.iter().enumerate() {
            let score = mode.score(p);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((idx, score)),
            }
        }
        best
    }
}

/// Dense image of per-pixel predictions, addressed by linear pixel index.
#[derive(Debug, Clone)]
pub struct PredictionImage {
    width: usize,
    height: usize,
    predictions: Vec<Prediction>,
}

impl PredictionImage {
    pub fn new(width: usize, height: usize, predictions: Vec<Prediction>) -> Self {
        assert_eq!(predictions.len(), width * height);
        Self {
            width,
            height,
            predictions,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn get(&self, linear_idx: usize) -> &Prediction {
        &self.predictions[linear_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn isotropic_mode(
        position: Vector3<f64>,
        sigma: f64,
        n_inliers: usize,
    ) -> Mode {
        let variance = sigma * sigma;
        Mode {
            position,
            inv_covariance: Matrix3::identity() / variance,
            determinant: variance.powi(3),
            colour: [128, 128, 128],
            n_inliers,
        }
    }

    #[test]
    fn test_mahalanobis_isotropic_matches_euclidean() {
        let mode = isotropic_mode(Vector3::zeros(), 1.0, 1);
        let p = Vector3::new(1.0, 2.0, 2.0);
        assert_relative_eq!(mode.mahalanobis_sq(&p), 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_best_mode_prefers_closest() {
        let prediction = Prediction {
            modes: vec![
                isotropic_mode(Vector3::new(0.0, 0.0, 0.0), 0.1, 5),
                isotropic_mode(Vector3::new(1.0, 0.0, 0.0), 0.1, 5),
            ],
        };
        let near_second = Vector3::new(0.95, 0.0, 0.0);
        assert_eq!(prediction.best_mode(&near_second), Some(1));
    }

    #[test]
    fn test_best_mode_tie_resolves_to_lowest_index() {
        // Two identical modes: scores are exactly equal, index 0 must win.
        let mode = isotropic_mode(Vector3::new(0.5, 0.5, 0.5), 0.2, 3);
        let prediction = Prediction {
            modes: vec![mode.clone(), mode],
        };
        assert_eq!(prediction.best_mode(&Vector3::new(0.4, 0.5, 0.5)), Some(0));
    }

    #[test]
    fn test_zero_mode_prediction_has_no_best() {
        assert_eq!(Prediction::empty().best_mode(&Vector3::zeros()), None);
    }

    #[test]
    fn test_inlier_count_weights_score() {
        let weak = isotropic_mode(Vector3::zeros(), 0.1, 1);
        let strong = isotropic_mode(Vector3::new(0.05, 0.0, 0.0), 0.1, 100);
        let prediction = Prediction {
            modes: vec![weak, strong],
        };
        // The heavily-supported mode wins even though it is slightly farther.
        assert_eq!(prediction.best_mode(&Vector3::zeros()), Some(1));
    }
}
