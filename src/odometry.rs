//! Frame-to-map odometry in the manner of KISS-ICP.

use std::cmp::Ordering;

use nalgebra::{Point3, RealField, Scalar};
use simba::scalar::SupersetOf;

use crate::{
    config::Config,
    deskew::{Compensator, Deskew},
    downsample::voxel_down_sample,
    error::{Error, Result},
    pose::{Pose, PoseLog, power, relative},
    preprocess::{Preprocess, Preprocessor},
    registration::{Icp, Registration},
    threshold::{Threshold, ThresholdEstimator},
    voxel_map::{LocalMap, VoxelHashMap},
};

/// What is left of a frame after it was registered.
#[derive(Debug, Clone)]
pub struct FrameResult<T: Scalar> {
    /// The deskewed and range-filtered frame, sensor frame.
    pub frame: Vec<Point3<T>>,
    /// The downsampled points the frame was registered with, sensor frame.
    pub source: Vec<Point3<T>>,
    /// The pose appended to the trajectory.
    pub pose: Pose<T>,
}

impl<T: RealField> PartialEq for FrameResult<T> {
    fn eq(&self, other: &Self) -> bool {
        self.frame == other.frame && self.source == other.source && self.pose == other.pose
    }
}

/// One odometry session.
///
/// Frames have to be fed in order; every call to
/// [`register_frame`](Self::register_frame) either appends exactly one pose
/// and updates the threshold and the map, or fails without touching any of
/// them.
///
/// ```text
/// frame ─> deskew ─> preprocess ─┬─ 0.5·voxel ─────────────────────> map update
///                                └─ 1.5·voxel ─> registration ─┬─> threshold update
///             prediction ─> initial guess ──────────┘          └─> pose log
/// ```
pub struct KissIcp<T, M = VoxelHashMap<T>, R = Icp, Th = Threshold<T>>
where
    T: Scalar,
{
    config: Config,
    poses: PoseLog<T>,
    compensator: Compensator,
    preprocessor: Preprocessor<T>,
    threshold: Th,
    local_map: M,
    registration: R,
    prev_frame_delta: T,
    // resolved from config
    voxel_size: T,
    initial_threshold: T,
    min_motion_th: T,
}

impl<T: RealField + Copy> KissIcp<T> {
    /// A session with the collaborators selected by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let local_map = VoxelHashMap::from_config(&config);
        let registration = Icp::new(&config.registration)?;
        let threshold = Threshold::from_config(&config);
        Self::with_components(config, local_map, registration, threshold)
    }
}

impl<T, M, R, Th> KissIcp<T, M, R, Th>
where
    T: RealField + Copy,
    M: LocalMap<T>,
    R: Registration<T, M>,
    Th: ThresholdEstimator<T>,
{
    /// A session with a custom map, solver and threshold estimator. Deskewing
    /// and range filtering still follow `config`.
    pub fn with_components(
        config: Config,
        local_map: M,
        registration: R,
        threshold: Th,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            compensator: Compensator::from_config(&config),
            preprocessor: Preprocessor::from_config(&config),
            voxel_size: nalgebra::convert(config.voxel_size()),
            initial_threshold: nalgebra::convert(config.adaptive_threshold.initial_threshold),
            min_motion_th: nalgebra::convert(config.adaptive_threshold.min_motion_th),
            poses: PoseLog::new(),
            threshold,
            local_map,
            registration,
            prev_frame_delta: T::one(),
            config,
        })
    }

    /// Register a frame one nominal frame delta after the previous one.
    #[inline]
    pub fn register_frame(&mut self, frame: &[Point3<T>], timestamps: &[T]) -> Result<FrameResult<T>> {
        self.register_frame_with_delta(frame, timestamps, T::one())
    }

    /// Register a frame taken `frame_delta` after the previous one, in any
    /// unit as long as it stays the same for the whole session.
    ///
    /// `timestamps` is either empty or holds one stamp per point of `frame`.
    pub fn register_frame_with_delta(
        &mut self,
        frame: &[Point3<T>],
        timestamps: &[T],
        frame_delta: T,
    ) -> Result<FrameResult<T>> {
        if frame_delta.partial_cmp(&T::zero()) != Some(Ordering::Greater) {
            return Err(Error::InvalidFrameDelta {
                frame_delta: SupersetOf::<f64>::to_subset_unchecked(&frame_delta),
            });
        }
        let frame_delta_ratio = frame_delta / self.prev_frame_delta;

        // Deskewing must only see the trajectory up to the previous frame.
        let deskewed = self.compensator.deskew_scan(
            frame,
            &self.poses,
            timestamps,
            frame_delta_ratio,
        )?;
        let frame = self.preprocessor.preprocess(&deskewed);
        let (frame_downsample, source) = self.voxelize(&frame);

        let sigma = self.adaptive_threshold();
        let prediction = self.prediction_model(frame_delta_ratio);
        let last_pose = self.last_pose().copied().unwrap_or_else(Pose::identity);
        let initial_guess = last_pose * prediction;

        let three: T = nalgebra::convert(3.0);
        let new_pose = self.registration.register_frame(
            &source,
            &self.local_map,
            &initial_guess,
            three * sigma,
            sigma / three,
        )?;

        // Nothing below can fail, the frame is committed as a whole.
        self.threshold
            .update_model_deviation(&(initial_guess.inverse() * new_pose));
        self.local_map.update(&frame_downsample, &new_pose);
        self.poses.push(new_pose);
        self.prev_frame_delta = frame_delta;

        tracing::debug!(
            index = self.poses.len() - 1,
            points = frame.len(),
            source = source.len(),
            sigma = SupersetOf::<f64>::to_subset_unchecked(&sigma),
            "registered frame"
        );

        Ok(FrameResult {
            frame,
            source,
            pose: new_pose,
        })
    }

    /// Split a filtered frame into the cloud merged into the map
    /// (`0.5 · voxel_size`) and the coarser cloud registered against it
    /// (`1.5 · voxel_size`), the latter downsampled from the former.
    pub fn voxelize(&self, frame: &[Point3<T>]) -> (Vec<Point3<T>>, Vec<Point3<T>>) {
        let half: T = nalgebra::convert(0.5);
        let one_and_half: T = nalgebra::convert(1.5);
        let frame_downsample = voxel_down_sample(frame, self.voxel_size * half);
        let source = voxel_down_sample(&frame_downsample, self.voxel_size * one_and_half);
        (frame_downsample, source)
    }

    /// The correspondence threshold `sigma` for the next frame.
    ///
    /// Until the sensor has left its start region the configured initial
    /// threshold is used, afterwards the estimator's.
    pub fn adaptive_threshold(&self) -> T {
        if !self.has_moved() {
            return self.initial_threshold;
        }
        self.threshold.threshold()
    }

    /// Whether the latest pose is farther than `5 · min_motion_th` from the
    /// first one. Only the translation counts.
    pub fn has_moved(&self) -> bool {
        let (Some(first), Some(last)) = (self.poses.first(), self.poses.last()) else {
            return false;
        };
        let five: T = nalgebra::convert(5.0);
        relative(first, last).translation.vector.norm() > five * self.min_motion_th
    }

    /// The motion expected until the next frame under constant velocity.
    ///
    /// The last relative motion is repeated `frame_delta_ratio` times, rounded
    /// half to even, or taken once when frames got at least twice as dense.
    pub fn prediction_model(&self, frame_delta_ratio: T) -> Pose<T> {
        let [.., previous, last] = self.poses.as_slice() else {
            return Pose::identity();
        };
        let model = relative(previous, last);

        let half: T = nalgebra::convert(0.5);
        if frame_delta_ratio <= half {
            return model;
        }
        let ratio: f64 = SupersetOf::<f64>::to_subset_unchecked(&frame_delta_ratio);
        power(&model, ratio.round_ties_even() as u32)
    }

    /// Drop the trajectory, the map and everything the threshold has learned.
    pub fn reset(&mut self) {
        self.poses.clear();
        self.local_map.clear();
        self.threshold.reset();
        self.prev_frame_delta = T::one();
        tracing::info!("odometry reset");
    }
}

impl<T: Scalar, M, R, Th> KissIcp<T, M, R, Th> {
    #[inline]
    pub fn poses(&self) -> &PoseLog<T> {
        &self.poses
    }

    #[inline]
    pub fn last_pose(&self) -> Option<&Pose<T>> {
        self.poses.last()
    }

    #[inline]
    pub fn local_map(&self) -> &M {
        &self.local_map
    }

    #[inline]
    pub fn registration(&self) -> &R {
        &self.registration
    }

    #[inline]
    pub fn threshold_estimator(&self) -> &Th {
        &self.threshold
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests;
