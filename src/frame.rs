//! Per-pixel input features consumed by the relocalization pipeline.
//!
//! Features are computed by an external extractor; this crate only reads
//! them. A pixel without valid depth carries no camera-space point and is
//! skipped by every downstream stage.

use nalgebra::Vector3;

/// Per-pixel feature: camera-space 3D point, colour, and the descriptor
/// vector used for tree traversal.
#[derive(Debug, Clone)]
pub struct Feature {
    /// Camera-space position of the pixel; `None` when the depth is invalid.
    pub point_cam: Option<Vector3<f64>>,
    /// RGB colour of the pixel.
    pub colour: [u8; 3],
    /// Opaque descriptor routed through the forest's split nodes.
    pub descriptor: Vec<f32>,
}

impl Feature {
    /// A feature without valid depth.
    pub fn invalid() -> Self {
        Self {
            point_cam: None,
            colour: [0; 3],
            descriptor: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.point_cam.is_some()
    }
}

/// Dense image of per-pixel features, addressed by linear pixel index.
#[derive(Debug, Clone)]
pub struct FeatureImage {
    width: usize,
    height: usize,
    features: Vec<Feature>,
}

impl FeatureImage {
    /// Build a feature image; `features` must hold `width * height` entries
    /// in row-major order.
    pub fn new(width: usize, height: usize, features: Vec<Feature>) -> Self {
        assert_eq!(features.len(), width * height);
        Self {
            width,
            height,
            features,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, linear_idx: usize) -> &Feature {
        &self.features[linear_idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Number of pixels carrying a valid camera-space point.
    pub fn count_valid(&self) -> usize {
        self.features.iter().filter(|f| f.is_valid()).count()
    }
}
