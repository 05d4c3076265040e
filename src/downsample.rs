use nalgebra::{Point3, RealField};
use nohash_hasher::IntSet;

use crate::voxel_map::index::{ToVoxelCoord, VoxelIndex};

pub type VoxelGrid = IntSet<VoxelIndex>;

/// Downsample `points` on a voxel grid of `voxel_size`, keeping the first
/// point that falls into each voxel. The input order is preserved, so the
/// result is always a subset of the input.
pub fn voxel_down_sample<T>(points: &[Point3<T>], voxel_size: T) -> Vec<Point3<T>>
where
    T: RealField + Copy,
{
    let mut grid = VoxelGrid::with_capacity_and_hasher(points.len(), Default::default());
    points
        .iter()
        .copied()
        .voxel_grid_downsample(voxel_size, &mut grid)
        .collect()
}

pub trait VoxelDownsample<T>: Iterator<Item = Point3<T>> + Sized
where
    T: RealField + Copy,
{
    /// Downsample the points lazily, remembering the occupied voxels in `grid`.
    ///
    /// Note that `grid` is not cleared before downsampling, voxels already in
    /// it count as occupied. This lets several batches share one grid.
    fn voxel_grid_downsample(
        self,
        voxel_size: T,
        grid: &mut VoxelGrid,
    ) -> impl Iterator<Item = Point3<T>> {
        self.filter(move |point| grid.insert(point.as_voxel_index(voxel_size)))
    }
}

impl<T, I> VoxelDownsample<T> for I
where
    T: RealField + Copy,
    I: Iterator<Item = Point3<T>>,
{
}
