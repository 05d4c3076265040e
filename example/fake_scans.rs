use std::f64::consts::TAU;

use itertools::Itertools;
use kiss_odometry::{Config, KissIcp};
use nalgebra::{Point3, Vector3};
use rand::Rng;
use tracing_subscriber::EnvFilter;

const POINTS_PER_SWEEP: usize = 4096;
const SWEEP_PERIOD: f64 = 0.1;

fn main() -> kiss_odometry::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::default();
    config.data.deskew = true;
    config.data.min_range = 0.5;
    config.data.max_range = 30.0;
    let mut odometry = KissIcp::<f64>::new(config)?;

    let velocity = Vector3::new(1.0, 0.3, 0.0);
    let mut rng = rand::rng();

    // a spinning scanner driving through a box room, one sweep per chunk
    let fake_scans = (0..)
        .map(|i| {
            let stamp = i as f64 * SWEEP_PERIOD / POINTS_PER_SWEEP as f64;
            let azimuth = TAU * (i % POINTS_PER_SWEEP) as f64 / POINTS_PER_SWEEP as f64;
            let elevation: f64 = rng.random_range(-0.4..0.4);
            let direction = Vector3::new(
                azimuth.cos() * elevation.cos(),
                azimuth.sin() * elevation.cos(),
                elevation.sin(),
            );
            let origin = Point3::from(velocity * stamp);
            let range = ray_to_room(&origin, &direction) + rng.random::<f64>() * 0.01;
            (stamp, Point3::from(direction * range))
        })
        .chunks(POINTS_PER_SWEEP);

    let steps = option_env!("STEPS")
        .and_then(|s| {
            s.parse()
                .inspect_err(|e| eprintln!("Invalid STEPS: {e}"))
                .ok()
        })
        .unwrap_or(40);

    for (index, sweep) in fake_scans.into_iter().take(steps).enumerate() {
        let (timestamps, frame): (Vec<f64>, Vec<Point3<f64>>) = sweep.unzip();
        let result = odometry.register_frame(&frame, &timestamps)?;

        let truth = velocity * (index as f64 * SWEEP_PERIOD);
        let error = (result.pose.translation.vector - truth).norm();
        tracing::info!(
            index,
            x = result.pose.translation.x,
            y = result.pose.translation.y,
            z = result.pose.translation.z,
            error,
            sigma = odometry.adaptive_threshold(),
        );
    }

    println!("{:?}", odometry.last_pose().map(|pose| pose.translation));
    Ok(())
}

/// Distance from `origin` along `direction` to the walls of a 30 × 20 × 5 m room.
fn ray_to_room(origin: &Point3<f64>, direction: &Vector3<f64>) -> f64 {
    let lower = Vector3::new(-15.0, -10.0, -2.0);
    let upper = Vector3::new(15.0, 10.0, 3.0);
    (0..3)
        .map(|axis| match direction[axis] {
            d if d > 0.0 => (upper[axis] - origin[axis]) / d,
            d if d < 0.0 => (lower[axis] - origin[axis]) / d,
            _ => f64::INFINITY,
        })
        .fold(f64::INFINITY, f64::min)
}
