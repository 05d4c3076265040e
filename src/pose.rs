use std::ops::Deref;

use nalgebra::{IsometryMatrix3, RealField, Scalar};

/// A rigid transform, rotation stored as a matrix.
///
/// `to_homogeneous()` gives the 4×4 form.
pub type Pose<T> = IsometryMatrix3<T>;

/// The estimated trajectory, index 0 being the first registered frame.
///
/// It grows by exactly one pose per registered frame and is never edited in
/// place. Only [`KissIcp::reset`](crate::KissIcp::reset) clears it.
#[derive(Debug, Clone)]
pub struct PoseLog<T: Scalar> {
    poses: Vec<Pose<T>>,
}

impl<T: Scalar> Default for PoseLog<T> {
    fn default() -> Self {
        Self { poses: Vec::new() }
    }
}

impl<T: Scalar> PoseLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Pose<T>] {
        &self.poses
    }

    pub(crate) fn push(&mut self, pose: Pose<T>) {
        self.poses.push(pose);
    }

    pub(crate) fn clear(&mut self) {
        self.poses.clear();
    }
}

impl<T: RealField> PartialEq for PoseLog<T> {
    fn eq(&self, other: &Self) -> bool {
        self.poses == other.poses
    }
}

impl<T: Scalar> Deref for PoseLog<T> {
    type Target = [Pose<T>];

    fn deref(&self) -> &Self::Target {
        &self.poses
    }
}

impl<T: Scalar> From<Vec<Pose<T>>> for PoseLog<T> {
    fn from(poses: Vec<Pose<T>>) -> Self {
        Self { poses }
    }
}

impl<'a, T: Scalar> IntoIterator for &'a PoseLog<T> {
    type Item = &'a Pose<T>;
    type IntoIter = std::slice::Iter<'a, Pose<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.poses.iter()
    }
}

/// The transform from `from` to `to`, i.e. `from⁻¹ ∘ to`.
#[inline]
pub fn relative<T: RealField + Copy>(from: &Pose<T>, to: &Pose<T>) -> Pose<T> {
    from.inverse() * to
}

/// `pose` composed with itself `exponent` times, identity for 0.
pub fn power<T: RealField + Copy>(pose: &Pose<T>, mut exponent: u32) -> Pose<T> {
    let mut result = Pose::identity();
    let mut base = *pose;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result *= base;
        }
        base *= base;
        exponent >>= 1;
    }
    result
}
