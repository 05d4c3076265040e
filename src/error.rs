use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The frame delta must be strictly positive, checked before any state is touched.
    #[error("frame delta has to be greater than zero, got {frame_delta}")]
    InvalidFrameDelta { frame_delta: f64 },

    /// Per-point timestamps were given but do not line up with the points.
    #[error("got {timestamps} timestamps for {points} points")]
    TimestampMismatch { points: usize, timestamps: usize },

    /// Reported by a registration backend that could not produce a pose.
    #[error("registration failed: {0}")]
    Registration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to build the registration thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
