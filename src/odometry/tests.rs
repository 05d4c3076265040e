use std::{cell::RefCell, collections::VecDeque};

use approx::assert_relative_eq;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::*;
use crate::{deskew::MotionCompensator, voxel_map::index::ToVoxelCoord};

#[derive(Default)]
struct RecordingMap {
    updates: Vec<(Vec<Point3<f64>>, Pose<f64>)>,
    clears: usize,
}

impl LocalMap<f64> for RecordingMap {
    fn update(&mut self, points: &[Point3<f64>], pose: &Pose<f64>) {
        self.updates.push((points.to_vec(), *pose));
    }

    fn clear(&mut self) {
        self.clears += 1;
    }
}

struct RecordedCall {
    source: Vec<Point3<f64>>,
    initial_guess: Pose<f64>,
    max_correspondence_distance: f64,
    kernel: f64,
}

/// Hands out scripted poses, or fails once the script is exhausted.
#[derive(Default)]
struct ScriptedSolver {
    script: RefCell<VecDeque<Pose<f64>>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedSolver {
    fn new(poses: impl IntoIterator<Item = Pose<f64>>) -> Self {
        Self {
            script: RefCell::new(poses.into_iter().collect()),
            calls: RefCell::default(),
        }
    }
}

impl Registration<f64, RecordingMap> for ScriptedSolver {
    fn register_frame(
        &self,
        points: &[Point3<f64>],
        _map: &RecordingMap,
        initial_guess: &Pose<f64>,
        max_correspondence_distance: f64,
        kernel: f64,
    ) -> Result<Pose<f64>> {
        self.calls.borrow_mut().push(RecordedCall {
            source: points.to_vec(),
            initial_guess: *initial_guess,
            max_correspondence_distance,
            kernel,
        });
        self.script
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| Error::Registration("script exhausted".to_owned()))
    }
}

struct RecordingThreshold {
    sigma: f64,
    deviations: Vec<Pose<f64>>,
}

impl ThresholdEstimator<f64> for RecordingThreshold {
    fn threshold(&self) -> f64 {
        self.sigma
    }

    fn update_model_deviation(&mut self, model_deviation: &Pose<f64>) {
        self.deviations.push(*model_deviation);
    }

    fn reset(&mut self) {
        self.deviations.clear();
    }
}

type Scripted = KissIcp<f64, RecordingMap, ScriptedSolver, RecordingThreshold>;

fn config() -> Config {
    let mut config = Config::default();
    config.data.min_range = 0.0;
    config
}

fn scripted(config: Config, poses: impl IntoIterator<Item = Pose<f64>>) -> Scripted {
    KissIcp::with_components(
        config,
        RecordingMap::default(),
        ScriptedSolver::new(poses),
        RecordingThreshold {
            sigma: 0.3,
            deviations: Vec::new(),
        },
    )
    .unwrap()
}

fn translation(x: f64, y: f64, z: f64) -> Pose<f64> {
    Pose::new(Vector3::new(x, y, z), Vector3::zeros())
}

fn step() -> Pose<f64> {
    Pose::new(Vector3::new(0.4, 0.1, 0.0), Vector3::new(0.0, 0.0, 0.05))
}

/// A few points on a 0.2 m lattice, all within the default ranges.
fn lattice() -> Vec<Point3<f64>> {
    itertools::iproduct!(0..10, 0..10, 0..3)
        .map(|(x, y, z)| Point3::new(6.0 + 0.2 * x as f64, 0.2 * y as f64, 0.2 * z as f64))
        .collect()
}

#[test]
fn test_non_positive_frame_delta_is_rejected() {
    let mut odometry = scripted(config(), [Pose::identity(), step()]);
    odometry.register_frame(&lattice(), &[]).unwrap();

    for frame_delta in [0.0, -1.0, f64::NAN] {
        let err = odometry
            .register_frame_with_delta(&lattice(), &[], frame_delta)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFrameDelta { .. }));
    }

    assert_eq!(odometry.poses().len(), 1);
    assert_eq!(odometry.local_map().updates.len(), 1);
    assert_eq!(odometry.threshold_estimator().deviations.len(), 1);
    assert_eq!(odometry.registration().calls.borrow().len(), 1);
    assert_eq!(odometry.prev_frame_delta, 1.0);
}

#[test]
fn test_prediction_needs_two_poses() {
    let mut odometry = scripted(config(), []);
    assert_eq!(odometry.prediction_model(1.0), Pose::identity());

    odometry.poses.push(step());
    assert_eq!(odometry.prediction_model(1.0), Pose::identity());
    assert_eq!(odometry.prediction_model(3.0), Pose::identity());
}

#[test]
fn test_first_frame_starts_from_identity() {
    let mut odometry = scripted(config(), [step()]);
    odometry.register_frame(&lattice(), &[]).unwrap();

    let calls = odometry.registration().calls.borrow();
    assert_eq!(calls[0].initial_guess, Pose::identity());
}

#[test]
fn test_prediction_rounds_frame_delta_ratio() {
    let mut odometry = scripted(config(), []);
    odometry.poses = PoseLog::from(vec![Pose::identity(), step()]);

    let step = step();
    let cases = [
        (0.4, step),
        (0.5, step),
        (0.7, step),
        (1.0, step),
        (1.49, step),
        (2.0, step * step),
        // half to even
        (1.5, step * step),
        (2.5, step * step),
        (3.5, step * step * step * step),
        (4.5, step * step * step * step),
    ];
    for (ratio, expected) in cases {
        assert_relative_eq!(
            odometry.prediction_model(ratio).to_homogeneous(),
            expected.to_homogeneous(),
            epsilon = 1e-12
        );
    }
}

#[test]
fn test_prediction_uses_last_two_poses() {
    let mut odometry = scripted(config(), []);
    let start = Pose::new(Vector3::new(3.0, -2.0, 1.0), Vector3::new(0.1, 0.2, 0.3));
    odometry.poses = PoseLog::from(vec![translation(50.0, 0.0, 0.0), start, start * step()]);

    assert_relative_eq!(
        odometry.prediction_model(1.0).to_homogeneous(),
        step().to_homogeneous(),
        epsilon = 1e-12
    );
}

#[test]
fn test_has_moved_is_strict() {
    let mut odometry = scripted(config(), []);
    assert!(!odometry.has_moved());

    odometry.poses = PoseLog::from(vec![Pose::identity(), translation(0.5, 0.0, 0.0)]);
    assert!(!odometry.has_moved());
    assert_eq!(odometry.adaptive_threshold(), 2.0);

    odometry.poses = PoseLog::from(vec![Pose::identity(), translation(0.5 + 1e-9, 0.0, 0.0)]);
    assert!(odometry.has_moved());
    assert_eq!(odometry.adaptive_threshold(), 0.3);
}

#[test]
fn test_has_moved_ignores_rotation_and_intermediate_poses() {
    let mut odometry = scripted(config(), []);
    odometry.poses = PoseLog::from(vec![
        Pose::identity(),
        translation(10.0, 0.0, 0.0),
        Pose::new(Vector3::new(0.1, 0.1, 0.0), Vector3::z() * 1.0),
    ]);
    assert!(!odometry.has_moved());
}

#[test]
fn test_has_moved_is_relative_to_first_pose() {
    let mut odometry = scripted(config(), []);
    let first = Pose::new(Vector3::new(5.0, 5.0, 0.0), Vector3::z() * std::f64::consts::FRAC_PI_2);
    odometry.poses = PoseLog::from(vec![first, first * translation(0.4, 0.0, 0.0)]);
    assert!(!odometry.has_moved());

    odometry.poses.push(first * translation(0.0, 0.6, 0.0));
    assert!(odometry.has_moved());
}

#[test]
fn test_commits_once_per_frame() {
    let new_pose = Pose::new(Vector3::new(0.3, 0.0, 0.1), Vector3::new(0.0, 0.0, 0.02));
    let mut odometry = scripted(config(), [new_pose]);
    let result = odometry.register_frame(&lattice(), &[]).unwrap();

    assert_eq!(result.pose, new_pose);
    assert_eq!(odometry.poses().as_slice(), &[new_pose]);

    let deviations = &odometry.threshold_estimator().deviations;
    assert_eq!(deviations.len(), 1);
    assert_relative_eq!(
        deviations[0].to_homogeneous(),
        new_pose.to_homogeneous(),
        epsilon = 1e-12
    );

    let updates = &odometry.local_map().updates;
    assert_eq!(updates.len(), 1);
    let (frame_downsample, source) = odometry.voxelize(&result.frame);
    assert_eq!(updates[0], (frame_downsample, new_pose));

    let calls = odometry.registration().calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].source, source);
    assert_eq!(result.source, source);
}

#[test]
fn test_threshold_sees_deviation_from_initial_guess() {
    let poses = [Pose::identity(), step(), step() * step() * translation(0.05, 0.0, 0.0)];
    let mut odometry = scripted(config(), poses);
    for _ in 0..3 {
        odometry.register_frame(&lattice(), &[]).unwrap();
    }

    let calls = odometry.registration().calls.borrow();
    let guess = calls[2].initial_guess;
    assert_relative_eq!(
        guess.to_homogeneous(),
        (step() * step()).to_homogeneous(),
        epsilon = 1e-12
    );

    let deviation = odometry.threshold_estimator().deviations[2];
    assert_relative_eq!(
        deviation.to_homogeneous(),
        (guess.inverse() * poses[2]).to_homogeneous(),
        epsilon = 1e-12
    );
    assert_relative_eq!(
        deviation.translation.vector,
        Vector3::new(0.05, 0.0, 0.0),
        epsilon = 1e-12
    );
}

#[test]
fn test_correspondence_bounds_follow_sigma() {
    let mut config = config();
    config.adaptive_threshold.initial_threshold = 1.5;
    let poses = [
        Pose::identity(),
        translation(1.0, 0.0, 0.0),
        translation(2.0, 0.0, 0.0),
    ];
    let mut odometry = scripted(config, poses);
    for _ in 0..3 {
        odometry.register_frame(&lattice(), &[]).unwrap();
    }

    let calls = odometry.registration().calls.borrow();
    for call in &calls[..2] {
        assert_relative_eq!(call.max_correspondence_distance, 4.5);
        assert_relative_eq!(call.kernel, 0.5);
    }
    // moved past 5 · min_motion_th, the estimator takes over
    assert_relative_eq!(calls[2].max_correspondence_distance, 0.9, epsilon = 1e-12);
    assert_relative_eq!(calls[2].kernel, 0.1, epsilon = 1e-12);
}

#[test]
fn test_frame_delta_ratio_scales_prediction() {
    let poses = [Pose::identity(), step(), Pose::identity(), Pose::identity()];
    let mut odometry = scripted(config(), poses);
    odometry.register_frame_with_delta(&lattice(), &[], 0.1).unwrap();
    odometry.register_frame_with_delta(&lattice(), &[], 0.1).unwrap();
    // twice the previous delta, two steps ahead
    odometry.register_frame_with_delta(&lattice(), &[], 0.2).unwrap();
    assert_eq!(odometry.prev_frame_delta, 0.2);

    let calls = odometry.registration().calls.borrow();
    assert_relative_eq!(
        calls[2].initial_guess.to_homogeneous(),
        (step() * step() * step()).to_homogeneous(),
        epsilon = 1e-12
    );
    drop(calls);

    // half the previous delta, the model is taken once
    odometry.register_frame_with_delta(&lattice(), &[], 0.1).unwrap();
    let calls = odometry.registration().calls.borrow();
    let model = relative(&poses[1], &poses[2]);
    assert_relative_eq!(
        calls[3].initial_guess.to_homogeneous(),
        (poses[2] * model).to_homogeneous(),
        epsilon = 1e-12
    );
}

#[test]
fn test_failed_registration_commits_nothing() {
    let mut odometry = scripted(config(), [step()]);
    odometry.register_frame(&lattice(), &[]).unwrap();

    let err = odometry
        .register_frame_with_delta(&lattice(), &[], 2.0)
        .unwrap_err();
    assert!(matches!(err, Error::Registration(_)));

    assert_eq!(odometry.poses().as_slice(), &[step()]);
    assert_eq!(odometry.local_map().updates.len(), 1);
    assert_eq!(odometry.threshold_estimator().deviations.len(), 1);
    assert_eq!(odometry.prev_frame_delta, 1.0);
}

#[test]
fn test_deskew_errors_propagate_before_registration() {
    let mut config = config();
    config.data.deskew = true;
    let mut odometry = scripted(config, [step()]);

    let frame = lattice();
    let err = odometry
        .register_frame(&frame, &vec![0.0; frame.len() - 1])
        .unwrap_err();
    assert!(matches!(err, Error::TimestampMismatch { .. }));

    assert!(odometry.poses().is_empty());
    assert!(odometry.local_map().updates.is_empty());
    assert!(odometry.threshold_estimator().deviations.is_empty());
    assert!(odometry.registration().calls.borrow().is_empty());
}

#[test]
fn test_deskew_uses_poses_before_the_new_one() {
    let mut config = config();
    config.data.deskew = true;
    let new_pose = step() * step() * translation(0.3, -0.2, 0.0);
    let mut odometry = scripted(config.clone(), [Pose::identity(), step(), new_pose]);
    odometry.register_frame(&lattice(), &[]).unwrap();
    odometry.register_frame(&lattice(), &[]).unwrap();
    let poses_before = odometry.poses().as_slice().to_vec();

    let frame = lattice();
    let stamps = (0..frame.len())
        .map(|i| i as f64 / (frame.len() - 1) as f64)
        .collect::<Vec<_>>();
    let result = odometry
        .register_frame_with_delta(&frame, &stamps, 2.0)
        .unwrap();

    let preprocessor = Preprocessor::<f64>::from_config(&config);
    let expected = preprocessor.preprocess(
        &MotionCompensator
            .deskew_scan(&frame, &poses_before, &stamps, 2.0)
            .unwrap(),
    );
    assert_eq!(result.frame, expected);
    assert_ne!(result.frame, frame);

    let with_new_pose = preprocessor.preprocess(
        &MotionCompensator
            .deskew_scan(&frame, &[step(), new_pose], &stamps, 2.0)
            .unwrap(),
    );
    assert_ne!(result.frame, with_new_pose);
}

#[test]
fn test_range_filter_runs_before_downsampling() {
    let mut config = config();
    config.data.min_range = 5.0;
    config.data.max_range = 10.0;
    let mut odometry = scripted(config, [Pose::identity()]);

    let frame = [
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(6.0, 0.0, 0.0),
        Point3::new(0.0, -8.0, 0.0),
        Point3::new(12.0, 0.0, 0.0),
    ];
    let result = odometry.register_frame(&frame, &[]).unwrap();
    assert_eq!(result.frame, vec![frame[1], frame[2]]);
}

#[test]
fn test_source_is_coarsened_from_map_cloud() {
    let mut rng = StdRng::seed_from_u64(7);
    let frame = (0..5000)
        .map(|_| {
            Point3::new(
                rng.random_range(-20.0..20.0),
                rng.random_range(-20.0..20.0),
                rng.random_range(-3.0..3.0),
            )
        })
        .collect::<Vec<_>>();

    let odometry = scripted(config(), []);
    let (frame_downsample, source) = odometry.voxelize(&frame);
    assert!(source.len() < frame_downsample.len());
    assert!(source.iter().all(|point| frame_downsample.contains(point)));

    let fine_voxel = odometry.config().voxel_size() * 0.5;
    let fine_voxels = frame_downsample
        .iter()
        .map(|point| point.as_voxel_coord(fine_voxel))
        .collect::<std::collections::HashSet<_>>();
    assert!(
        source
            .iter()
            .all(|point| fine_voxels.contains(&point.as_voxel_coord(fine_voxel)))
    );
}

#[test]
fn test_reset_starts_a_new_session() {
    let mut odometry = scripted(config(), [step(), step()]);
    odometry.register_frame_with_delta(&lattice(), &[], 0.1).unwrap();
    odometry.reset();

    assert!(odometry.poses().is_empty());
    assert_eq!(odometry.local_map().clears, 1);
    assert!(odometry.threshold_estimator().deviations.is_empty());
    assert_eq!(odometry.prev_frame_delta, 1.0);
    assert_eq!(odometry.adaptive_threshold(), 2.0);
}

/// Samples the floor, the ceiling and the walls of a box room.
fn box_room(rng: &mut StdRng, count: usize) -> Vec<Point3<f64>> {
    (0..count)
        .map(|i| {
            let u = rng.random_range(-10.0..10.0);
            let v = rng.random_range(-10.0..10.0);
            let h = rng.random_range(-2.0..4.0);
            match i % 6 {
                0 => Point3::new(u, v, -2.0),
                1 => Point3::new(u, v, 4.0),
                2 => Point3::new(10.0, u, h),
                3 => Point3::new(-10.0, u, h),
                4 => Point3::new(u, 10.0, h),
                _ => Point3::new(u, -10.0, h),
            }
        })
        .collect()
}

#[test]
fn test_tracks_constant_velocity_in_box_room() {
    let mut rng = StdRng::seed_from_u64(42);
    let room = box_room(&mut rng, 20_000);

    let mut config = Config::default();
    config.data.min_range = 0.0;
    config.data.max_range = 50.0;
    config.registration.max_num_threads = 2;
    let mut odometry = KissIcp::<f64>::new(config).unwrap();

    for index in 0..10 {
        let truth = translation(0.1 * index as f64, 0.0, 0.0);
        let scan = room
            .iter()
            .map(|point| truth.inverse_transform_point(point))
            .collect::<Vec<_>>();
        let result = odometry.register_frame(&scan, &[]).unwrap();
        assert_relative_eq!(
            result.pose.translation.vector,
            truth.translation.vector,
            epsilon = 0.05
        );
    }

    assert_eq!(odometry.poses().len(), 10);
    assert!(odometry.has_moved());
    assert!(!odometry.local_map().is_empty());
}

#[test]
fn test_new_rejects_invalid_config() {
    let mut config = Config::default();
    config.data.min_range = 20.0;
    config.data.max_range = 10.0;
    let err = KissIcp::<f64>::new(config).err().unwrap();
    assert!(matches!(err, Error::InvalidConfig(_)));
}
