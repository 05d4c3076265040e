use nalgebra::{Point3, RealField, Vector3};
use simba::scalar::SupersetOf;

pub type VoxelCoord = Point3<i64>;
pub type VoxelIndex = <VoxelCoord as ToVoxelIndex>::Index;

pub trait ToVoxelIndex {
    type Index: nohash_hasher::IsEnabled + Eq + std::hash::Hash + Copy;
    fn to_voxel_index(self) -> Self::Index;
}

pub trait ToVoxelCoord<S> {
    fn as_voxel_coord(&self, voxel_size: S) -> VoxelCoord;

    #[inline]
    fn as_voxel_index(&self, voxel_size: S) -> VoxelIndex {
        self.as_voxel_coord(voxel_size).to_voxel_index()
    }
}

impl<T: RealField + Copy> ToVoxelCoord<T> for Point3<T> {
    #[inline]
    fn as_voxel_coord(&self, voxel_size: T) -> VoxelCoord {
        (self / voxel_size).map(|x| {
            let x: f64 = SupersetOf::<f64>::to_subset_unchecked(&x.floor());
            x as i64
        })
    }
}

/// Bits per axis in a packed [`VoxelIndex`].
const AXIS_BITS: u32 = 21;
const AXIS_MASK: i64 = (1 << AXIS_BITS) - 1;

impl ToVoxelIndex for VoxelCoord {
    type Index = u64;
    /// Packs the three coordinates into one integer, two's complement per axis.
    ///
    /// Distinct voxels never share an index as long as every coordinate lies in
    /// `[-2^20, 2^20)`, i.e. within about a thousand kilometres of the origin
    /// for metre-sized voxels.
    #[inline]
    fn to_voxel_index(self) -> Self::Index {
        let axis = |c: i64| (c & AXIS_MASK) as u64;
        (axis(self.x) << (2 * AXIS_BITS)) | (axis(self.y) << AXIS_BITS) | axis(self.z)
    }
}

/// The 27 voxels around (and including) `coord`.
pub fn neighborhood(coord: VoxelCoord) -> impl Iterator<Item = VoxelCoord> {
    itertools::iproduct!(-1..=1, -1..=1, -1..=1).map(move |(x, y, z)| coord + Vector3::new(x, y, z))
}
