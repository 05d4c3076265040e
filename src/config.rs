//! Odometry configuration.
//!
//! Every section and field carries a default, so a partial YAML document is
//! enough to override only what differs:
//!
//! ```yaml
//! data:
//!   deskew: true
//!   max_range: 80.0
//! mapping:
//!   voxel_size: 1.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub mapping: MappingConfig,
    pub registration: RegistrationConfig,
    pub adaptive_threshold: AdaptiveThresholdConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Compensate the motion of the sensor during one sweep.
    pub deskew: bool,
    /// Points farther than this (sensor frame) are dropped, also the radius of the local map.
    pub max_range: f64,
    /// Points closer than this (sensor frame) are dropped.
    pub min_range: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Voxel size of the local map, `max_range / 100` when unset.
    pub voxel_size: Option<f64>,
    pub max_points_per_voxel: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_num_iterations: usize,
    /// ICP stops once the norm of the increment drops below this.
    pub convergence_criterion: f64,
    /// Worker threads for correspondence search, 0 lets rayon decide.
    pub max_num_threads: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveThresholdConfig {
    /// Disable the adaptive estimator and always use this threshold.
    pub fixed_threshold: Option<f64>,
    /// Threshold used until the sensor has left its start region.
    pub initial_threshold: f64,
    /// Model deviations below this are not considered motion.
    pub min_motion_th: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            deskew: false,
            max_range: 100.0,
            min_range: 5.0,
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            voxel_size: None,
            max_points_per_voxel: 20,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_num_iterations: 500,
            convergence_criterion: 0.0001,
            max_num_threads: 0,
        }
    }
}

impl Default for AdaptiveThresholdConfig {
    fn default() -> Self {
        Self {
            fixed_threshold: None,
            initial_threshold: 2.0,
            min_motion_th: 0.1,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// The voxel size of the local map, resolved against the maximum range.
    #[inline]
    pub fn voxel_size(&self) -> f64 {
        self.mapping
            .voxel_size
            .unwrap_or(self.data.max_range / 100.0)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidConfig(message));

        let DataConfig {
            max_range,
            min_range,
            ..
        } = self.data;
        if !(min_range >= 0.0 && max_range > min_range) {
            return invalid(format!(
                "expected 0 <= min_range < max_range, got min_range = {min_range}, max_range = {max_range}"
            ));
        }

        let voxel_size = self.voxel_size();
        if !(voxel_size > 0.0 && voxel_size.is_finite()) {
            return invalid(format!("voxel_size must be positive, got {voxel_size}"));
        }
        if self.mapping.max_points_per_voxel == 0 {
            return invalid("max_points_per_voxel must be at least 1".to_owned());
        }

        if !(self.registration.convergence_criterion > 0.0) {
            return invalid(format!(
                "convergence_criterion must be positive, got {}",
                self.registration.convergence_criterion
            ));
        }

        let threshold = &self.adaptive_threshold;
        if !(threshold.initial_threshold > 0.0) {
            return invalid(format!(
                "initial_threshold must be positive, got {}",
                threshold.initial_threshold
            ));
        }
        if !(threshold.min_motion_th >= 0.0) {
            return invalid(format!(
                "min_motion_th must not be negative, got {}",
                threshold.min_motion_th
            ));
        }
        match threshold.fixed_threshold {
            Some(fixed) if !(fixed > 0.0) => {
                invalid(format!("fixed_threshold must be positive, got {fixed}"))
            }
            _ => Ok(()),
        }
    }
}
