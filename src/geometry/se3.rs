//! SE3: 6-DOF rigid transformation (rotation + translation).
//!
//! Poses in this crate are camera-to-world transforms: `p_world = R * p_cam + t`.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// Rigid transformation: rotation + translation.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Construct from a homogeneous 4x4 matrix of form [R | t; 0 | 1].
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let r_block = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);
        Self::from_rt(r_block, translation)
    }

    /// Convert to a homogeneous 4x4 matrix.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let r = self.rotation.to_rotation_matrix().into_inner();
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Inverse transformation: [R^T | -R^T t].
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            translation: -(rot_inv * self.translation),
            rotation: rot_inv,
        }
    }

    /// Compose two transforms: self ∘ other.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Transform a single point: p' = R * p + t.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Rotation matrix of the transform.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Convert to a 6-element twist [axis-angle (3), translation (3)].
    ///
    /// Rotation and translation components are parameterized independently,
    /// which is sufficient for small optimization updates.
    pub fn to_twist(&self) -> [f64; 6] {
        let rot_vec = self.rotation.scaled_axis();
        [
            rot_vec.x,
            rot_vec.y,
            rot_vec.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    /// Construct from a 6-element twist [axis-angle (3), translation (3)].
    pub fn from_twist(twist: &[f64; 6]) -> Self {
        let rot_vec = Vector3::new(twist[0], twist[1], twist[2]);
        Self {
            rotation: UnitQuaternion::from_scaled_axis(rot_vec),
            translation: Vector3::new(twist[3], twist[4], twist[5]),
        }
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_transform() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(SE3::identity().transform_point(&p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.3, -0.2, 0.7),
            translation: Vector3::new(1.0, -2.0, 0.5),
        };
        let p = Vector3::new(0.4, 0.1, 2.0);
        let back = pose.inverse().transform_point(&pose.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_matches_matrix_product() {
        let a = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            translation: Vector3::new(1.0, 0.0, -1.0),
        };
        let b = SE3 {
            rotation: UnitQuaternion::from_euler_angles(-0.2, 0.5, 0.0),
            translation: Vector3::new(0.0, 2.0, 1.0),
        };
        let composed = a.compose(&b);
        let product = a.to_matrix() * b.to_matrix();
        assert_relative_eq!(composed.to_matrix(), product, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.5, 0.1, -0.4),
            translation: Vector3::new(-1.0, 3.0, 2.0),
        };
        let recovered = SE3::from_matrix(pose.to_matrix());
        assert_relative_eq!(pose.translation, recovered.translation, epsilon = 1e-12);
        let r1 = pose.rotation_matrix();
        let r2 = recovered.rotation_matrix();
        assert_relative_eq!(r1, r2, epsilon = 1e-12);
    }

    #[test]
    fn test_twist_roundtrip() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.2, -0.3, 0.1),
            translation: Vector3::new(0.5, 1.5, -2.5),
        };
        let recovered = SE3::from_twist(&pose.to_twist());
        assert_relative_eq!(pose.translation, recovered.translation, epsilon = 1e-12);
        assert_relative_eq!(
            pose.rotation_matrix(),
            recovered.rotation_matrix(),
            epsilon = 1e-12
        );
    }
}
