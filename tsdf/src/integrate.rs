//! Fusion of depth (and color) frames into voxel stores
use crate::{
    ThreadPool,
    camera::{Frustum, Intrinsics, nearest_pixel},
    image::{ColorImage, DepthImage},
    pool::{for_each_chunk_mut, map_range},
    settings::DepthRange,
    store::{DenseGrid, HashedGrid, Inserted, UnitKey, VolumeUnit},
    voxel::{Observation, VoxelData},
};
use log::{trace, warn};
use nalgebra::{Isometry3, Point3, Vector3};
use rayon::prelude::*;
use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Per-call state for projecting voxels into a depth frame
///
/// Voxel coordinates are in voxel units of the volume frame; see
/// [`Projector::observe`].
pub(crate) struct Projector<'a> {
    /// Volume frame (in meters) to camera frame
    pub vol_to_cam: Isometry3<f32>,
    pub voxel_size: f32,
    pub truncation: f32,
    pub intrinsics: Intrinsics,
    pub depth: &'a DepthImage,
    pub pixel_norms: &'a DepthImage,
    pub range: DepthRange,
    pub color: Option<(&'a ColorImage, Intrinsics)>,
}

impl Projector<'_> {
    /// Position of a voxel center in camera space
    #[inline]
    fn to_camera(&self, ijk: Vector3<i32>) -> Point3<f32> {
        self.vol_to_cam * Point3::from(ijk.cast::<f32>() * self.voxel_size)
    }

    /// Camera-space offset between consecutive voxels along `z`
    #[inline]
    fn z_step(&self) -> Vector3<f32> {
        self.vol_to_cam.rotation * Vector3::new(0.0, 0.0, self.voxel_size)
    }

    /// Observes a voxel, given its center in camera space
    ///
    /// Returns `None` if the voxel projects off-image, onto an invalid depth
    /// pixel, or lies deeper than the truncation distance behind the surface.
    #[inline]
    pub fn observe(&self, p: &Point3<f32>) -> Option<Observation> {
        if !(p.z > 0.0) {
            return None;
        }
        let (row, col) =
            nearest_pixel(&self.intrinsics.project(p), self.depth.size())?;
        let d = self.depth[(row, col)];
        if !(d > 0.0 && self.range.contains(d)) {
            return None;
        }
        let sdf = (d - p.z) * self.pixel_norms[(row, col)];
        if sdf < -self.truncation {
            return None;
        }
        let tsdf = (sdf / self.truncation).min(1.0);
        let rgb = self.color.and_then(|(image, intrinsics)| {
            let (row, col) =
                nearest_pixel(&intrinsics.project(p), image.size())?;
            Some(image[(row, col)].map(f32::from))
        });
        Some(Observation { tsdf, rgb })
    }

    /// Observes a column of `out.len()` voxels starting at `start` and
    /// stepping along `+z`, folding each valid observation into its voxel
    ///
    /// Returns the number of updated voxels.
    fn fuse_column<V: VoxelData>(
        &self,
        start: Vector3<i32>,
        out: &mut [V],
        max_weight: u32,
    ) -> usize {
        let base = self.to_camera(start);
        let dz = self.z_step();
        let mut n = 0;
        for (z, v) in out.iter_mut().enumerate() {
            let p = base + dz * z as f32;
            if let Some(obs) = self.observe(&p) {
                v.fuse(obs, max_weight);
                n += 1;
            }
        }
        n
    }
}

/// Work counters from a single integration
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct IntegrateStats {
    /// Voxels whose running average was updated
    pub updated: usize,
    /// Volume units inside the camera frustum (hashed only)
    pub visible: usize,
    /// Newly allocated volume units (hashed only)
    pub allocated: usize,
    /// Volume units that could not be allocated (hashed only)
    pub rejected: usize,
}

/// Integrates a frame into every voxel of a dense grid
pub(crate) fn integrate_dense<V: VoxelData>(
    grid: &mut DenseGrid<V>,
    proj: &Projector,
    max_weight: u32,
    threads: Option<&ThreadPool>,
) -> IntegrateStats {
    let res = grid.resolution();
    let slab = grid.slab_len();
    let updated = AtomicUsize::new(0);
    for_each_chunk_mut(threads, grid.voxels_mut(), slab, |x, voxels| {
        let mut n = 0;
        for (y, column) in voxels.chunks_mut(res.z).enumerate() {
            let start = Vector3::new(x as i32, y as i32, 0);
            n += proj.fuse_column(start, column, max_weight);
        }
        updated.fetch_add(n, Ordering::Relaxed);
    });
    IntegrateStats {
        updated: updated.into_inner(),
        ..IntegrateStats::default()
    }
}

/// Finds every volume unit touched by the truncation band of a valid depth
/// pixel
fn touched_units<V: VoxelData>(
    grid: &HashedGrid<V>,
    proj: &Projector,
    threads: Option<&ThreadPool>,
) -> HashSet<UnitKey> {
    let cam_to_vol = proj.vol_to_cam.inverse();
    let scale = 1.0 / proj.voxel_size;
    let unit_size = proj.voxel_size * grid.unit_resolution() as f32;
    let depth = proj.depth;
    let rows = map_range(threads, depth.height(), |row| {
        let mut keys = HashSet::new();
        for col in 0..depth.width() {
            let d = depth[(row, col)];
            if !(d > 0.0 && proj.range.contains(d)) {
                continue;
            }
            let ray = proj.intrinsics.ray(col as f32, row as f32);
            // Sample the band at half-unit spacing along the ray
            let step = 0.5 * unit_size / ray.norm();
            let z0 = (d - proj.truncation).max(proj.range.near);
            let z1 = d + proj.truncation;
            let n = ((z1 - z0) / step).ceil() as usize;
            for i in 0..=n {
                let z = (z0 + step * i as f32).min(z1);
                let p = cam_to_vol * Point3::from(ray * z);
                keys.insert(grid.key_at(&(p * scale)));
            }
        }
        keys
    });
    let mut out = HashSet::new();
    for r in rows {
        out.extend(r);
    }
    out
}

/// Integrates a frame into a hashed grid
///
/// Units touched by the truncation band are allocated first (serially);
/// then every unit inside the camera frustum is updated in parallel.
pub(crate) fn integrate_hashed<V: VoxelData>(
    grid: &mut HashedGrid<V>,
    proj: &Projector,
    max_weight: u32,
    threads: Option<&ThreadPool>,
) -> IntegrateStats {
    let mut stats = IntegrateStats::default();
    for key in touched_units(grid, proj, threads) {
        match grid.insert(key) {
            Inserted::New => stats.allocated += 1,
            Inserted::Full => stats.rejected += 1,
            Inserted::Existing => (),
        }
    }
    if stats.rejected > 0 {
        warn!(
            "volume unit limit ({}) reached; dropped {} new units",
            grid.max_units().unwrap_or_default(),
            stats.rejected
        );
    }

    let frame = grid.next_frame();
    let r = grid.unit_resolution();
    let frustum = Frustum {
        local_to_camera: proj.vol_to_cam,
        intrinsics: proj.intrinsics,
        size: proj.depth.size(),
        far: proj.range.far + proj.truncation,
    };
    let visible = AtomicUsize::new(0);
    let updated = AtomicUsize::new(0);

    let run = |(key, unit): (&UnitKey, &mut VolumeUnit<V>)| {
        let (center, radius) = key.bounding_sphere(r, proj.voxel_size);
        unit.is_visible = frustum.sees_sphere(&center, radius);
        if !unit.is_visible {
            return;
        }
        unit.last_visited = frame;
        let mut n = 0;
        for (i, column) in unit.voxels.chunks_mut(r as usize).enumerate() {
            let x = i as i32 / r;
            let y = i as i32 % r;
            let start = key.0 * r + Vector3::new(x, y, 0);
            n += proj.fuse_column(start, column, max_weight);
        }
        unit.update_surface_flag();
        visible.fetch_add(1, Ordering::Relaxed);
        updated.fetch_add(n, Ordering::Relaxed);
    };
    if let Some(threads) = threads {
        threads.run(|| grid.units_mut().par_iter_mut().for_each(run));
    } else {
        grid.units_mut().iter_mut().for_each(run);
    }

    stats.visible = visible.into_inner();
    stats.updated = updated.into_inner();
    grid.set_visible(stats.visible);
    trace!(
        "frame {frame}: {} of {} units visible",
        stats.visible,
        grid.len()
    );
    stats
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{image::ImageSize, store::VoxelField, voxel::Voxel};
    use approx::assert_relative_eq;

    /// Camera at the origin looking down `+z` at a wall 1 m away
    fn wall(size: ImageSize) -> (DepthImage, DepthImage, Intrinsics) {
        let intrinsics = Intrinsics::centered(50.0, size);
        let depth = DepthImage::filled(size, 1.0);
        let norms = intrinsics.pixel_norms(size);
        (depth, norms, intrinsics)
    }

    fn projector<'a>(
        depth: &'a DepthImage,
        norms: &'a DepthImage,
        intrinsics: Intrinsics,
        vol_to_cam: Isometry3<f32>,
    ) -> Projector<'a> {
        Projector {
            vol_to_cam,
            voxel_size: 0.05,
            truncation: 0.2,
            intrinsics,
            depth,
            pixel_norms: norms,
            range: DepthRange::default(),
            color: None,
        }
    }

    #[test]
    fn observe_wall() {
        let size = ImageSize::new(32, 32);
        let (depth, norms, intrinsics) = wall(size);
        let proj =
            projector(&depth, &norms, intrinsics, Isometry3::identity());

        let at = |z: f32| proj.observe(&Point3::new(0.0, 0.0, z));
        // In front of the surface, within and beyond the truncation band
        assert_relative_eq!(at(0.9).unwrap().tsdf, 0.5, epsilon = 1e-3);
        assert_eq!(at(0.5).unwrap().tsdf, 1.0);
        // Behind the surface
        assert_relative_eq!(at(1.1).unwrap().tsdf, -0.5, epsilon = 1e-3);
        assert!(at(1.3).is_none());
        // Behind the camera and off-image
        assert!(at(-1.0).is_none());
        assert!(proj.observe(&Point3::new(5.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn observe_skips_invalid_depth() {
        let size = ImageSize::new(32, 32);
        let (mut depth, norms, intrinsics) = wall(size);
        let p = Point3::new(0.0, 0.0, 0.9);
        let (row, col) =
            nearest_pixel(&intrinsics.project(&p), size).unwrap();
        for bad in [0.0, -1.0, f32::NAN, 10.0] {
            depth[(row, col)] = bad;
            let proj =
                projector(&depth, &norms, intrinsics, Isometry3::identity());
            assert!(proj.observe(&p).is_none(), "{bad} should be skipped");
        }
    }

    #[test]
    fn dense_wall() {
        let size = ImageSize::new(32, 32);
        let (depth, norms, intrinsics) = wall(size);
        // Grid spans [-0.2, 0.2] in x and y, [0.5, 1.5] in z
        let mut grid = DenseGrid::<Voxel>::new(Vector3::new(9, 9, 21));
        let vol_to_cam = Isometry3::translation(-0.2, -0.2, 0.5);
        let proj = projector(&depth, &norms, intrinsics, vol_to_cam);
        let stats = integrate_dense(&mut grid, &proj, 8, None);
        assert!(stats.updated > 0);

        // The voxel at the center of the wall is on the surface
        let v = grid.voxel(Vector3::new(4, 4, 10)).unwrap();
        assert_eq!(v.weight, 1);
        assert!(v.tsdf.abs() < 1e-5);
        // Deep behind the wall, nothing is observed
        assert!(grid.observed(Vector3::new(4, 4, 20)).is_none());

        let mut par = DenseGrid::<Voxel>::new(Vector3::new(9, 9, 21));
        let par_stats =
            integrate_dense(&mut par, &proj, 8, Some(&ThreadPool::Global));
        assert_eq!(stats.updated, par_stats.updated);
        assert_eq!(grid.voxels(), par.voxels());
    }

    #[test]
    fn hashed_wall() {
        let size = ImageSize::new(32, 32);
        let (depth, norms, intrinsics) = wall(size);
        let mut grid = HashedGrid::<Voxel>::new(4, None);
        let proj =
            projector(&depth, &norms, intrinsics, Isometry3::identity());
        let stats = integrate_hashed(&mut grid, &proj, 8, None);
        assert!(stats.allocated > 0);
        assert_eq!(stats.allocated, grid.len());
        assert_eq!(stats.rejected, 0);
        assert!(stats.visible > 0);
        assert_eq!(grid.visible(), stats.visible);

        // Voxel 20 along z is at 1 m, on the wall
        let v = grid.voxel(Vector3::new(0, 0, 20)).unwrap();
        assert_eq!(v.weight, 1);
        assert!(v.tsdf.abs() < 1e-5);
        assert!(grid.units().values().any(|u| u.has_surface));
        assert!(grid.units().values().all(|u| u.last_visited <= 1));

        // A second pass allocates nothing new
        let again = integrate_hashed(&mut grid, &proj, 8, None);
        assert_eq!(again.allocated, 0);
        assert_eq!(grid.voxel(Vector3::new(0, 0, 20)).unwrap().weight, 2);
    }

    #[test]
    fn hashed_capacity() {
        let size = ImageSize::new(32, 32);
        let (depth, norms, intrinsics) = wall(size);
        let mut grid = HashedGrid::<Voxel>::new(4, Some(3));
        let proj =
            projector(&depth, &norms, intrinsics, Isometry3::identity());
        let stats = integrate_hashed(&mut grid, &proj, 8, None);
        assert_eq!(grid.len(), 3);
        assert_eq!(stats.allocated, 3);
        assert!(stats.rejected > 0);
    }
}
