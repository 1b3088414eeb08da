//! Kabsch algorithm: closed-form least-squares rigid alignment of two
//! matched 3D point sets.
//!
//! Finds the rigid transform T such that `world_i ≈ T * local_i`, via SVD of
//! the cross-covariance matrix, with the reflection case handled explicitly.

use nalgebra::{Matrix3, Vector3};

use super::SE3;

/// Compute the rigid transform mapping `local` onto `world`.
///
/// Returns `None` when fewer than 3 correspondences are given or the SVD
/// fails to produce the factor matrices.
pub fn kabsch(local: &[Vector3<f64>], world: &[Vector3<f64>]) -> Option<SE3> {
    let n = local.len();
    if n < 3 || n != world.len() {
        return None;
    }

    let centroid_local = centroid(local);
    let centroid_world = centroid(world);

    // Cross-covariance matrix H = sum((l_i - cl) * (w_i - cw)^T)
    let mut h = Matrix3::zeros();
    for i in 0..n {
        h += (local[i] - centroid_local) * (world[i] - centroid_world).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    // R = V * U^T
    let mut rotation = v_t.transpose() * u.transpose();

    // Handle the reflection case (det(R) = -1) by flipping the last column of V.
    if rotation.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation = v * u.transpose();
    }

    let translation = centroid_world - rotation * centroid_local;
    Some(SE3::from_rt(rotation, translation))
}

fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}
