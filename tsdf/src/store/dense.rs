//! Dense, fixed-extent voxel grid
use super::{Region, VoxelField};
use crate::voxel::VoxelData;
use nalgebra::Vector3;

/// Dense grid of voxels
///
/// Voxels are stored in a single array, x-major with `z` contiguous:
/// ```text
/// index(x, y, z) = x * (ny * nz) + y * nz + z
/// ```
/// so every `(x, y)` column is a contiguous run and every `x` slab is a
/// disjoint chunk that can be handed to a separate worker.
pub(crate) struct DenseGrid<V> {
    data: Vec<V>,
    resolution: Vector3<usize>,
}

impl<V: VoxelData> DenseGrid<V> {
    /// Builds a new grid, with every voxel unobserved
    pub fn new(resolution: Vector3<u32>) -> Self {
        let resolution = resolution.map(|r| r as usize);
        Self {
            data: vec![V::default(); resolution.iter().product()],
            resolution,
        }
    }

    pub fn resolution(&self) -> Vector3<usize> {
        self.resolution
    }

    /// Number of voxels in a single `x` slab
    pub fn slab_len(&self) -> usize {
        self.resolution.y * self.resolution.z
    }

    /// Converts voxel coordinates into an array index
    ///
    /// Coordinates must be in range; this is only checked in debug builds.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        debug_assert!(
            x < self.resolution.x
                && y < self.resolution.y
                && z < self.resolution.z,
            "voxel ({x}, {y}, {z}) is out of range"
        );
        x * self.slab_len() + y * self.resolution.z + z
    }

    /// Checked conversion from signed coordinates to an array index
    #[inline]
    fn checked_index(&self, ijk: Vector3<i32>) -> Option<usize> {
        let r = self.resolution;
        if ijk.x >= 0
            && ijk.y >= 0
            && ijk.z >= 0
            && (ijk.x as usize) < r.x
            && (ijk.y as usize) < r.y
            && (ijk.z as usize) < r.z
        {
            Some(self.index(ijk.x as usize, ijk.y as usize, ijk.z as usize))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn voxels(&self) -> &[V] {
        &self.data
    }

    pub fn voxels_mut(&mut self) -> &mut [V] {
        &mut self.data
    }

    #[cfg(test)]
    pub fn voxel_mut(&mut self, ijk: Vector3<i32>) -> Option<&mut V> {
        let i = self.checked_index(ijk)?;
        Some(&mut self.data[i])
    }

    /// Marks every voxel as unobserved
    pub fn reset(&mut self) {
        self.data.fill(V::default());
    }
}

impl<V: VoxelData> VoxelField for DenseGrid<V> {
    type Voxel = V;

    #[inline]
    fn voxel(&self, ijk: Vector3<i32>) -> Option<&V> {
        self.checked_index(ijk).map(|i| &self.data[i])
    }

    fn regions(&self) -> Vec<Region> {
        let r = self.resolution.map(|r| r as i32);
        (0..r.x)
            .map(|x| Region {
                min: Vector3::new(x, 0, 0),
                size: Vector3::new(1, r.y, r.z),
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::voxel::Voxel;

    #[test]
    fn layout_is_z_contiguous() {
        let grid = DenseGrid::<Voxel>::new(Vector3::new(3, 4, 5));
        assert_eq!(grid.voxels().len(), 60);
        assert_eq!(grid.slab_len(), 20);
        assert_eq!(grid.index(0, 0, 1), 1);
        assert_eq!(grid.index(0, 1, 0), 5);
        assert_eq!(grid.index(1, 0, 0), 20);
        assert_eq!(grid.index(2, 3, 4), 59);
    }

    #[test]
    fn out_of_range_lookups() {
        let mut grid = DenseGrid::<Voxel>::new(Vector3::new(3, 4, 5));
        assert!(grid.voxel(Vector3::new(-1, 0, 0)).is_none());
        assert!(grid.voxel(Vector3::new(0, 4, 0)).is_none());
        assert!(grid.voxel(Vector3::new(2, 3, 4)).is_some());

        grid.voxel_mut(Vector3::new(1, 2, 3)).unwrap().weight = 3;
        assert_eq!(grid.voxels()[grid.index(1, 2, 3)].weight, 3);
        assert!(grid.observed(Vector3::new(1, 2, 3)).is_some());
        assert!(grid.observed(Vector3::new(1, 2, 2)).is_none());

        grid.reset();
        assert!(grid.voxels().iter().all(|v| *v == Voxel::default()));
    }

    #[test]
    fn regions_cover_grid() {
        let grid = DenseGrid::<Voxel>::new(Vector3::new(3, 4, 5));
        let regions = grid.regions();
        assert_eq!(regions.len(), 3);
        let count: usize = regions.iter().map(|r| r.iter().count()).sum();
        assert_eq!(count, 60);
    }
}
