//! Motion compensation of a sweep.
//!
//! A spinning LiDAR captures a sweep over a finite time while moving, so the
//! raw points are smeared along the trajectory. Assuming the sensor keeps the
//! velocity of the last registered step, every point is moved to where it
//! would have been observed at the middle of the sweep.

use nalgebra::{Point3, RealField, Scalar};

use crate::{
    config::Config,
    error::{Error, Result},
    lie::{se3_exp, se3_log},
    pose::{Pose, relative},
};

pub trait Deskew<T: Scalar> {
    /// Undistort `frame`. `poses` is the trajectory before this frame and
    /// `timestamps` either empty or one stamp per point.
    fn deskew_scan(
        &self,
        frame: &[Point3<T>],
        poses: &[Pose<T>],
        timestamps: &[T],
        frame_delta_ratio: T,
    ) -> Result<Vec<Point3<T>>>;
}

/// The compensators selectable from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensator {
    /// Leave the frame as it is.
    Stub,
    /// Constant-velocity compensation, see [`MotionCompensator`].
    Motion(MotionCompensator),
}

/// Constant-velocity deskewing on SE(3).
///
/// The velocity is the relative motion of the last two poses, scaled by the
/// ratio of the current and the previous frame delta. Timestamps are
/// normalised to `[0, 1]` over the sweep and the frame is re-expressed at its
/// middle, `0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionCompensator;

impl Compensator {
    pub fn from_config(config: &Config) -> Self {
        if config.data.deskew {
            Self::Motion(MotionCompensator)
        } else {
            Self::Stub
        }
    }
}

impl<T: RealField + Copy> Deskew<T> for Compensator {
    fn deskew_scan(
        &self,
        frame: &[Point3<T>],
        poses: &[Pose<T>],
        timestamps: &[T],
        frame_delta_ratio: T,
    ) -> Result<Vec<Point3<T>>> {
        match self {
            Self::Stub => Ok(frame.to_vec()),
            Self::Motion(compensator) => {
                compensator.deskew_scan(frame, poses, timestamps, frame_delta_ratio)
            }
        }
    }
}

impl<T: RealField + Copy> Deskew<T> for MotionCompensator {
    fn deskew_scan(
        &self,
        frame: &[Point3<T>],
        poses: &[Pose<T>],
        timestamps: &[T],
        frame_delta_ratio: T,
    ) -> Result<Vec<Point3<T>>> {
        if timestamps.is_empty() {
            return Ok(frame.to_vec());
        }
        if timestamps.len() != frame.len() {
            return Err(Error::TimestampMismatch {
                points: frame.len(),
                timestamps: timestamps.len(),
            });
        }
        let [.., start_pose, finish_pose] = poses else {
            return Ok(frame.to_vec());
        };

        let velocity = se3_log(&relative(start_pose, finish_pose)) * frame_delta_ratio;
        let half: T = nalgebra::convert(0.5);

        let corrected = normalized_timestamps(timestamps)
            .zip(frame)
            .map(|(stamp, point)| se3_exp(&(velocity * (stamp - half))) * point)
            .collect();
        Ok(corrected)
    }
}

/// Rescale `timestamps` to `[0, 1]`; a sweep with a single instant maps to `0.5`.
fn normalized_timestamps<T: RealField + Copy>(timestamps: &[T]) -> impl Iterator<Item = T> + '_ {
    let (min, max) = timestamps.iter().fold(
        (timestamps[0], timestamps[0]),
        |(min, max), &stamp| (min.min(stamp), max.max(stamp)),
    );
    let span = max - min;
    let half: T = nalgebra::convert(0.5);
    timestamps.iter().map(move |&stamp| {
        if span > T::zero() {
            (stamp - min) / span
        } else {
            half
        }
    })
}
