//! Exponential and logarithm maps of SO(3) and SE(3).
//!
//! Tangent vectors of SE(3) are ordered translation first: `[ρ, φ]`.

use nalgebra::{Matrix3, RealField, Rotation3, Translation3, Vector3, Vector6};

use crate::pose::Pose;

/// Below this angle the series expansions are used.
fn small_angle<T: RealField>() -> T {
    nalgebra::convert(1e-6)
}

/// The skew-symmetric matrix `[v]×` with `[v]× u = v × u`.
#[inline]
pub fn skew<T: RealField + Copy>(v: &Vector3<T>) -> Matrix3<T> {
    v.cross_matrix()
}

/// The left Jacobian of SO(3), `V(φ)` in the SE(3) exponential.
///
/// ```text
/// V(φ) = I + (1 - cos θ)/θ² [φ]× + (θ - sin θ)/θ³ [φ]×²
/// ```
pub fn left_jacobian<T: RealField + Copy>(phi: &Vector3<T>) -> Matrix3<T> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < small_angle() {
        return Matrix3::identity() + skew_phi * nalgebra::convert::<f64, T>(0.5);
    }

    let theta_sq = theta * theta;
    let a = (T::one() - theta.cos()) / theta_sq;
    let b = (theta - theta.sin()) / (theta_sq * theta);
    Matrix3::identity() + skew_phi * a + skew_phi * skew_phi * b
}

/// The inverse of [`left_jacobian`].
///
/// ```text
/// V⁻¹(φ) = I - ½[φ]× + (1/θ²)(1 - θ sin θ / (2(1 - cos θ))) [φ]×²
/// ```
pub fn left_jacobian_inv<T: RealField + Copy>(phi: &Vector3<T>) -> Matrix3<T> {
    let theta = phi.norm();
    let skew_phi = skew(phi);
    let half: T = nalgebra::convert(0.5);

    if theta < small_angle() {
        let twelfth: T = nalgebra::convert(1.0 / 12.0);
        return Matrix3::identity() - skew_phi * half + skew_phi * skew_phi * twelfth;
    }

    let theta_sq = theta * theta;
    let two: T = nalgebra::convert(2.0);
    let c = (T::one() - theta * theta.sin() / (two * (T::one() - theta.cos()))) / theta_sq;
    Matrix3::identity() - skew_phi * half + skew_phi * skew_phi * c
}

pub fn se3_exp<T: RealField + Copy>(xi: &Vector6<T>) -> Pose<T> {
    let rho = xi.fixed_rows::<3>(0).into_owned();
    let phi = xi.fixed_rows::<3>(3).into_owned();
    let translation = left_jacobian(&phi) * rho;
    Pose::from_parts(Translation3::from(translation), Rotation3::new(phi))
}

pub fn se3_log<T: RealField + Copy>(pose: &Pose<T>) -> Vector6<T> {
    let phi = pose.rotation.scaled_axis();
    let rho = left_jacobian_inv(&phi) * pose.translation.vector;
    let mut xi = Vector6::zeros();
    xi.fixed_rows_mut::<3>(0).copy_from(&rho);
    xi.fixed_rows_mut::<3>(3).copy_from(&phi);
    xi
}
