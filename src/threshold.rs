//! Correspondence thresholds for registration.

use nalgebra::{RealField, Scalar};
use num_traits::Zero;

use crate::{config::Config, pose::Pose};

pub trait ThresholdEstimator<T: Scalar> {
    /// The current correspondence threshold, `sigma`.
    fn threshold(&self) -> T;

    /// Feed the deviation between the predicted and the registered pose of a frame.
    fn update_model_deviation(&mut self, model_deviation: &Pose<T>);

    /// Forget everything learned so far.
    fn reset(&mut self);
}

/// The estimators selectable from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub enum Threshold<T> {
    Adaptive(AdaptiveThreshold<T>),
    Fixed(FixedThreshold<T>),
}

impl<T: RealField + Copy> Threshold<T> {
    pub fn from_config(config: &Config) -> Self {
        let threshold = &config.adaptive_threshold;
        match threshold.fixed_threshold {
            Some(fixed) => Self::Fixed(FixedThreshold(nalgebra::convert(fixed))),
            None => Self::Adaptive(AdaptiveThreshold::new(
                nalgebra::convert(threshold.initial_threshold),
                nalgebra::convert(threshold.min_motion_th),
                nalgebra::convert(config.data.max_range),
            )),
        }
    }
}

impl<T: RealField + Copy> ThresholdEstimator<T> for Threshold<T> {
    fn threshold(&self) -> T {
        match self {
            Self::Adaptive(adaptive) => adaptive.threshold(),
            Self::Fixed(fixed) => fixed.threshold(),
        }
    }

    fn update_model_deviation(&mut self, model_deviation: &Pose<T>) {
        match self {
            Self::Adaptive(adaptive) => adaptive.update_model_deviation(model_deviation),
            Self::Fixed(fixed) => fixed.update_model_deviation(model_deviation),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Adaptive(adaptive) => adaptive.reset(),
            Self::Fixed(fixed) => fixed.reset(),
        }
    }
}

/// The root mean square of the model errors seen so far.
///
/// The model error of a deviation bounds how far any point within
/// `max_range` is displaced by it:
///
/// ```text
/// e = ‖t‖ + 2 · max_range · sin(θ / 2)
/// ```
///
/// Deviations with `e <= min_motion_th` are treated as noise and skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThreshold<T> {
    initial_threshold: T,
    min_motion_th: T,
    max_range: T,

    model_error_sse2: T,
    num_samples: usize,
}

impl<T: RealField + Copy> AdaptiveThreshold<T> {
    pub fn new(initial_threshold: T, min_motion_th: T, max_range: T) -> Self {
        Self {
            initial_threshold,
            min_motion_th,
            max_range,
            model_error_sse2: Zero::zero(),
            num_samples: 0,
        }
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn model_error(&self, model_deviation: &Pose<T>) -> T {
        let two: T = nalgebra::convert(2.0);
        let theta = model_deviation.rotation.angle();
        let delta_rot = two * self.max_range * (theta / two).sin();
        let delta_trans = model_deviation.translation.vector.norm();
        delta_trans + delta_rot
    }
}

impl<T: RealField + Copy> ThresholdEstimator<T> for AdaptiveThreshold<T> {
    fn threshold(&self) -> T {
        if self.num_samples == 0 {
            return self.initial_threshold;
        }
        let num_samples: T = nalgebra::convert(self.num_samples as f64);
        (self.model_error_sse2 / num_samples).sqrt()
    }

    fn update_model_deviation(&mut self, model_deviation: &Pose<T>) {
        let model_error = self.model_error(model_deviation);
        if model_error > self.min_motion_th {
            self.model_error_sse2 += model_error * model_error;
            self.num_samples += 1;
        }
    }

    fn reset(&mut self) {
        self.model_error_sse2.set_zero();
        self.num_samples = 0;
    }
}

/// A constant threshold, deviations are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedThreshold<T>(pub T);

impl<T: RealField + Copy> ThresholdEstimator<T> for FixedThreshold<T> {
    #[inline]
    fn threshold(&self) -> T {
        self.0
    }

    fn update_model_deviation(&mut self, _model_deviation: &Pose<T>) {}

    fn reset(&mut self) {}
}
