//! Geometry utilities: SE3 transforms, Kabsch rigid alignment.

pub mod kabsch;
pub mod se3;

pub use kabsch::kabsch;
pub use se3::SE3;
