//! Point-to-point ICP against a [`VoxelHashMap`].

use nalgebra::{Matrix3x6, Matrix6, Point3, RealField, Vector6};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::{
    config::RegistrationConfig,
    error::Result,
    lie::{se3_exp, skew},
    pose::Pose,
    voxel_map::{Correspondence, VoxelHashMap},
};

pub trait Registration<T: RealField, M> {
    /// Align `points`, given in the sensor frame, to `map` starting from
    /// `initial_guess`. Correspondences farther than
    /// `max_correspondence_distance` are ignored, `kernel` scales the robust
    /// weighting of the rest.
    fn register_frame(
        &self,
        points: &[Point3<T>],
        map: &M,
        initial_guess: &Pose<T>,
        max_correspondence_distance: T,
        kernel: T,
    ) -> Result<Pose<T>>;
}

/// Gauss–Newton ICP with a Geman–McClure kernel, the heavy lifting runs on a
/// dedicated rayon pool.
pub struct Icp {
    max_num_iterations: usize,
    convergence_criterion: f64,
    pool: ThreadPool,
}

impl Icp {
    pub fn new(config: &RegistrationConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_num_threads)
            .thread_name(|index| format!("icp-{index}"))
            .build()?;
        Ok(Self {
            max_num_iterations: config.max_num_iterations,
            convergence_criterion: config.convergence_criterion,
            pool,
        })
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl std::fmt::Debug for Icp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Icp")
            .field("max_num_iterations", &self.max_num_iterations)
            .field("convergence_criterion", &self.convergence_criterion)
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

impl<T: RealField + Copy> Registration<T, VoxelHashMap<T>> for Icp {
    fn register_frame(
        &self,
        points: &[Point3<T>],
        map: &VoxelHashMap<T>,
        initial_guess: &Pose<T>,
        max_correspondence_distance: T,
        kernel: T,
    ) -> Result<Pose<T>> {
        if map.is_empty() || points.is_empty() {
            return Ok(*initial_guess);
        }

        let convergence_criterion: T = nalgebra::convert(self.convergence_criterion);
        let mut source: Vec<Point3<T>> = points.iter().map(|point| initial_guess * point).collect();
        let mut estimate = Pose::identity();

        let outcome = self.pool.install(|| {
            for iteration in 1..=self.max_num_iterations {
                let correspondences = map.correspondences(&source, max_correspondence_distance);
                let (jtj, jtr) = build_linear_system(&correspondences, kernel);

                let Some(cholesky) = jtj.cholesky() else {
                    return IcpOutcome::Degenerate {
                        iteration,
                        correspondences: correspondences.len(),
                    };
                };
                let dx = cholesky.solve(&-jtr);
                let increment = se3_exp(&dx);

                source
                    .par_iter_mut()
                    .for_each(|point| *point = increment * *point);
                estimate = increment * estimate;

                if dx.norm() < convergence_criterion {
                    return IcpOutcome::Converged {
                        iteration,
                        correspondences: correspondences.len(),
                    };
                }
            }
            IcpOutcome::Exhausted
        });

        match outcome {
            IcpOutcome::Converged {
                iteration,
                correspondences,
            } => tracing::trace!(iteration, correspondences, "ICP converged"),
            IcpOutcome::Degenerate {
                iteration,
                correspondences,
            } => tracing::warn!(
                iteration,
                correspondences,
                "degenerate ICP system, keeping the current estimate"
            ),
            IcpOutcome::Exhausted => tracing::warn!(
                max_num_iterations = self.max_num_iterations,
                "ICP did not converge"
            ),
        }

        Ok(estimate * initial_guess)
    }
}

enum IcpOutcome {
    Converged {
        iteration: usize,
        correspondences: usize,
    },
    Degenerate {
        iteration: usize,
        correspondences: usize,
    },
    Exhausted,
}

/// Geman–McClure weight of a squared residual.
#[inline]
fn weight<T: RealField + Copy>(kernel: T, residual_squared: T) -> T {
    let denominator = kernel + residual_squared;
    kernel * kernel / (denominator * denominator)
}

/// Accumulate the weighted normal equations `JᵀWJ`, `JᵀWr` of the
/// point-to-point residuals `r = source - target`, with the Jacobian
/// `J = [I | -[source]×]` of a left perturbation.
fn build_linear_system<T: RealField + Copy>(
    correspondences: &[Correspondence<T>],
    kernel: T,
) -> (Matrix6<T>, Vector6<T>) {
    correspondences
        .par_iter()
        .map(|(source, target)| {
            let residual = source.coords - target.coords;
            let mut jacobian = Matrix3x6::<T>::zeros();
            jacobian.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
            jacobian
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&-skew(&source.coords));
            let w = weight(kernel, residual.norm_squared());
            let jacobian_t = jacobian.transpose();
            (&jacobian_t * jacobian * w, jacobian_t * residual * w)
        })
        .reduce(
            || (Matrix6::zeros(), Vector6::zeros()),
            |(jtj_a, jtr_a), (jtj_b, jtr_b)| (jtj_a + jtj_b, jtr_a + jtr_b),
        )
}
