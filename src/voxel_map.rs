pub mod index;

use nalgebra::{Point3, RealField, Scalar};
use nohash_hasher::IntMap;
use rayon::prelude::*;

use crate::{
    config::Config,
    frame::{BodyPoint, BodyToWorld, Framed, WorldPoint, frames},
    pose::Pose,
};
use index::{ToVoxelCoord, ToVoxelIndex, VoxelIndex, neighborhood};

/// The map a frame is registered against and then merged into.
pub trait LocalMap<T: Scalar> {
    /// Insert `points`, given in the sensor frame, as seen from `pose`.
    fn update(&mut self, points: &[Point3<T>], pose: &Pose<T>);

    fn clear(&mut self);
}

/// A sensor point and its closest map point.
pub type Correspondence<T> = (Point3<T>, WorldPoint<T>);

/// A sparse voxel grid of world points around the sensor.
pub struct VoxelHashMap<T: Scalar> {
    voxels: IntMap<VoxelIndex, VoxelBlock<T>>,
    config: MapConfig<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig<T> {
    pub voxel_size: T,
    /// Voxels farther than this from the sensor are dropped after each update.
    pub max_distance: T,
    /// A voxel stops accepting points once it holds this many.
    pub max_points_per_voxel: usize,
}

struct VoxelBlock<T: Scalar> {
    points: Vec<WorldPoint<T>>,
}

impl<T: Scalar> VoxelBlock<T> {
    fn add_point(&mut self, point: WorldPoint<T>, max_points: usize) {
        if self.points.len() < max_points {
            self.points.push(point);
        }
    }
}

impl<T: RealField + Copy> MapConfig<T> {
    pub fn from_config(config: &Config) -> Self {
        Self {
            voxel_size: nalgebra::convert(config.voxel_size()),
            max_distance: nalgebra::convert(config.data.max_range),
            max_points_per_voxel: config.mapping.max_points_per_voxel,
        }
    }
}

impl<T: Scalar> VoxelHashMap<T> {
    pub fn new(config: MapConfig<T>) -> Self {
        Self {
            voxels: IntMap::default(),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &MapConfig<T> {
        &self.config
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Number of occupied voxels.
    #[inline]
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn num_points(&self) -> usize {
        self.voxels.values().map(|block| block.points.len()).sum()
    }
}

impl<T: RealField + Copy> VoxelHashMap<T> {
    pub fn from_config(config: &Config) -> Self {
        Self::new(MapConfig::from_config(config))
    }

    /// All points of the map, in no particular order.
    pub fn point_cloud(&self) -> Vec<Point3<T>> {
        self.voxels
            .values()
            .flat_map(|block| block.points.iter().map(|point| point.into_inner()))
            .collect()
    }

    pub fn add_points(&mut self, points: impl IntoIterator<Item = WorldPoint<T>>) {
        let voxel_size = self.config.voxel_size;
        let max_points = self.config.max_points_per_voxel;
        for point in points {
            let index = point.as_voxel_index(voxel_size);
            self.voxels
                .entry(index)
                .and_modify(|block| block.add_point(point, max_points))
                .or_insert_with(|| VoxelBlock {
                    points: {
                        let mut points = Vec::with_capacity(max_points);
                        points.push(point);
                        points
                    },
                });
        }
    }

    /// Drop every voxel whose first point lies farther than `max_distance` from `origin`.
    pub fn remove_points_far_from_location(&mut self, origin: &Point3<T>) {
        let max_distance_squared = self.config.max_distance * self.config.max_distance;
        self.voxels.retain(|_, block| {
            block.points.first().is_some_and(|point| {
                (point.coords - origin.coords).norm_squared() <= max_distance_squared
            })
        });
    }

    /// The closest map point to `point` among the 27 voxels around it.
    pub fn nearest_neighbor(&self, point: &Point3<T>) -> Option<(WorldPoint<T>, T)> {
        let coord = point.as_voxel_coord(self.config.voxel_size);
        neighborhood(coord)
            .filter_map(|neighbor| self.voxels.get(&neighbor.to_voxel_index()))
            .flat_map(|block| block.points.iter())
            .map(|candidate| (*candidate, (candidate.coords - point.coords).norm_squared()))
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(candidate, distance_squared)| (candidate, distance_squared.sqrt()))
    }

    /// Pair every point, already in the world frame, with its nearest map
    /// point if that is closer than `max_correspondence_distance`.
    ///
    /// Runs on the current rayon pool.
    pub fn correspondences(
        &self,
        points: &[Point3<T>],
        max_correspondence_distance: T,
    ) -> Vec<Correspondence<T>> {
        points
            .par_iter()
            .filter_map(|point| {
                let (closest, distance) = self.nearest_neighbor(point)?;
                (distance < max_correspondence_distance).then_some((*point, closest))
            })
            .collect()
    }
}

impl<T: RealField + Copy> LocalMap<T> for VoxelHashMap<T> {
    fn update(&mut self, points: &[Point3<T>], pose: &Pose<T>) {
        let body_to_world: BodyToWorld<T> = Framed::new_transform(*pose, frames::Body, frames::World);
        self.add_points(
            points
                .iter()
                .map(|point| BodyPoint::new(*point) * body_to_world),
        );
        self.remove_points_far_from_location(&Point3::from(pose.translation.vector));
    }

    fn clear(&mut self) {
        self.voxels.clear();
    }
}
