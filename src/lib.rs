#![deny(clippy::unwrap_used)]
#![deny(clippy::undocumented_unsafe_blocks)]
#![deny(unused_must_use)]
pub mod config;
pub mod deskew;
pub mod downsample;
pub mod error;
pub mod frame;
pub mod lie;
pub mod odometry;
pub mod pose;
pub mod preprocess;
pub mod registration;
pub mod threshold;
pub mod voxel_map;

pub use config::Config;
pub use deskew::{Compensator, Deskew, MotionCompensator};
pub use error::{Error, Result};
pub use odometry::{FrameResult, KissIcp};
pub use pose::{Pose, PoseLog};
pub use preprocess::{Preprocess, Preprocessor};
pub use registration::{Icp, Registration};
pub use threshold::{AdaptiveThreshold, FixedThreshold, Threshold, ThresholdEstimator};
pub use voxel_map::{LocalMap, VoxelHashMap};
