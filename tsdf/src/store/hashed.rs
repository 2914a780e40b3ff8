//! Sparse voxel storage, allocated one volume unit at a time
use super::{Region, VoxelField};
use crate::{camera::Frustum, voxel::VoxelData};
use nalgebra::{Point3, Vector3};
use std::{
    collections::HashMap,
    hash::{BuildHasherDefault, Hash, Hasher},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Integer coordinates of a volume unit
///
/// Unit `k` holds voxels `k * R .. (k + 1) * R` along each axis, where `R` is
/// the unit resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct UnitKey(pub Vector3<i32>);

impl UnitKey {
    /// Classic spatial hash of the key's coordinates
    #[inline]
    fn spatial_hash(&self) -> u64 {
        let [x, y, z] = [self.0.x, self.0.y, self.0.z].map(|c| c as u32);
        let h = x.wrapping_mul(73856093)
            ^ y.wrapping_mul(19349669)
            ^ z.wrapping_mul(83492791);
        // Spread into the upper bits, which the table uses for its tag bytes
        (h as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Returns a sphere (in meters, in the volume frame) that bounds every
    /// voxel center in this unit
    pub fn bounding_sphere(
        &self,
        unit_resolution: i32,
        voxel_size: f32,
    ) -> (Point3<f32>, f32) {
        let r = unit_resolution;
        let half = (r - 1) as f32 / 2.0;
        let center = (self.0 * r).cast::<f32>().add_scalar(half);
        let radius = 3f32.sqrt() * 0.5 * r as f32 * voxel_size;
        (Point3::from(center * voxel_size), radius)
    }
}

impl Hash for UnitKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.spatial_hash());
    }
}

/// Pass-through hasher for [`UnitKey`], which hashes itself
#[derive(Default)]
pub(crate) struct UnitHasher(u64);

impl Hasher for UnitHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(*b);
        }
    }

    fn write_u64(&mut self, v: u64) {
        self.0 = v;
    }
}

type UnitMap<V> =
    HashMap<UnitKey, VolumeUnit<V>, BuildHasherDefault<UnitHasher>>;

/// Block of `R³` voxels, stored with the same layout as a dense grid
pub(crate) struct VolumeUnit<V> {
    pub voxels: Box<[V]>,
    /// Index of the last integration that touched this unit
    pub last_visited: u64,
    /// Whether the unit was in the frustum of the last integration
    ///
    /// Raycasts leave this flag alone; they only update the grid-wide count
    /// returned by [`HashedGrid::visible`].
    pub is_visible: bool,
    /// Whether any voxel has been observed with a distance below the
    /// truncation band's outer edge
    pub has_surface: bool,
}

impl<V: VoxelData> VolumeUnit<V> {
    fn new(resolution: usize) -> Self {
        Self {
            voxels: vec![V::default(); resolution.pow(3)].into_boxed_slice(),
            last_visited: 0,
            is_visible: false,
            has_surface: false,
        }
    }

    /// Recomputes `has_surface` from the stored voxels
    pub fn update_surface_flag(&mut self) {
        self.has_surface = self
            .voxels
            .iter()
            .any(|v| v.is_observed() && v.tsdf() < 1.0);
    }
}

/// Result of [`HashedGrid::insert`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Inserted {
    /// The unit was already present
    Existing,
    /// A new unit was allocated
    New,
    /// The grid is at capacity and the unit was not allocated
    Full,
}

/// Sparse voxel grid, built from lazily allocated volume units
pub(crate) struct HashedGrid<V> {
    units: UnitMap<V>,
    unit_resolution: i32,
    max_units: Option<usize>,

    /// Integration counter, used to stamp [`VolumeUnit::last_visited`]
    frame: u64,

    /// Number of units seen by the last integration or raycast
    visible: AtomicUsize,
}

impl<V: VoxelData> HashedGrid<V> {
    pub fn new(unit_resolution: u32, max_units: Option<usize>) -> Self {
        Self {
            units: UnitMap::default(),
            unit_resolution: unit_resolution as i32,
            max_units,
            frame: 0,
            visible: AtomicUsize::new(0),
        }
    }

    pub fn unit_resolution(&self) -> i32 {
        self.unit_resolution
    }

    pub fn max_units(&self) -> Option<usize> {
        self.max_units
    }

    /// Number of allocated units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns the key of the unit containing a (continuous) voxel position
    #[inline]
    pub fn key_at(&self, g: &Point3<f32>) -> UnitKey {
        let r = self.unit_resolution as f32;
        UnitKey(g.coords.map(|c| (c / r).floor() as i32))
    }

    /// Splits voxel coordinates into a unit key and an index within the unit
    #[inline]
    pub fn locate(&self, ijk: Vector3<i32>) -> (UnitKey, usize) {
        let r = self.unit_resolution;
        let key = ijk.map(|c| c.div_euclid(r));
        let local = ijk.map(|c| c.rem_euclid(r) as usize);
        let r = r as usize;
        (UnitKey(key), (local.x * r + local.y) * r + local.z)
    }

    /// Allocates a unit if it isn't already present
    pub fn insert(&mut self, key: UnitKey) -> Inserted {
        if self.units.contains_key(&key) {
            Inserted::Existing
        } else if self.max_units.is_some_and(|m| self.units.len() >= m) {
            Inserted::Full
        } else {
            let r = self.unit_resolution as usize;
            self.units.insert(key, VolumeUnit::new(r));
            Inserted::New
        }
    }

    #[cfg(test)]
    pub fn units(&self) -> &UnitMap<V> {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitMap<V> {
        &mut self.units
    }

    /// Advances and returns the integration counter
    pub fn next_frame(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    pub fn visible(&self) -> usize {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, n: usize) {
        self.visible.store(n, Ordering::Relaxed);
    }

    /// Counts allocated units that may be visible in the given frustum
    pub fn count_visible(&self, frustum: &Frustum, voxel_size: f32) -> usize {
        let r = self.unit_resolution;
        self.units
            .keys()
            .filter(|k| {
                let (center, radius) = k.bounding_sphere(r, voxel_size);
                frustum.sees_sphere(&center, radius)
            })
            .count()
    }

    /// Drops every unit
    pub fn reset(&mut self) {
        self.units.clear();
        self.frame = 0;
        self.set_visible(0);
    }
}

impl<V: VoxelData> VoxelField for HashedGrid<V> {
    type Voxel = V;

    #[inline]
    fn voxel(&self, ijk: Vector3<i32>) -> Option<&V> {
        let (key, i) = self.locate(ijk);
        self.units.get(&key).map(|u| &u.voxels[i])
    }

    /// Skips to the far side of the current unit if it is unallocated or has
    /// never seen a surface
    fn skip(&self, g: &Point3<f32>, dir: &Vector3<f32>) -> f32 {
        let key = self.key_at(g);
        if self.units.get(&key).is_some_and(|u| u.has_surface) {
            return 0.0;
        }
        let r = self.unit_resolution as f32;
        let mut t = f32::INFINITY;
        for axis in 0..3 {
            let d = dir[axis];
            let lo = key.0[axis] as f32 * r;
            let exit = if d > 0.0 {
                (lo + r - g[axis]) / d
            } else if d < 0.0 {
                (lo - g[axis]) / d
            } else {
                continue;
            };
            t = t.min(exit);
        }
        // Land just past the boundary
        if t.is_finite() { t.max(0.0) + 1e-3 } else { 0.0 }
    }

    fn regions(&self) -> Vec<Region> {
        let r = self.unit_resolution;
        self.units
            .keys()
            .map(|k| Region {
                min: k.0 * r,
                size: Vector3::repeat(r),
            })
            .collect()
    }
}
