use nalgebra::{Point3, RealField, Scalar};

use crate::config::Config;

pub trait Preprocess<T: Scalar> {
    fn preprocess(&self, frame: &[Point3<T>]) -> Vec<Point3<T>>;
}

/// Range filter in the sensor frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor<T> {
    pub min_range: T,
    pub max_range: T,
}

impl<T: RealField + Copy> Preprocessor<T> {
    pub fn new(min_range: T, max_range: T) -> Self {
        Self {
            min_range,
            max_range,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            nalgebra::convert(config.data.min_range),
            nalgebra::convert(config.data.max_range),
        )
    }
}

impl<T: RealField + Copy> Preprocess<T> for Preprocessor<T> {
    /// Keep the points with `min_range < ‖p‖ < max_range`, in input order.
    fn preprocess(&self, frame: &[Point3<T>]) -> Vec<Point3<T>> {
        frame
            .iter()
            .filter(|point| {
                let range = point.coords.norm();
                range > self.min_range && range < self.max_range
            })
            .copied()
            .collect()
    }
}
