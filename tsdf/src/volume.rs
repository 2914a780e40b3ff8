//! The [`Volume`] type, which owns a voxel store and its settings
use crate::{
    Error,
    camera::Frustum,
    fetch::{PointCloud, fetch, fetch_normals},
    frame::Frame,
    image::{ColorImage, DepthImage, ImageSize},
    integrate::{Projector, integrate_dense, integrate_hashed},
    raycast::{RaycastImage, Raycaster, raycast},
    settings::{VolumeKind, VolumeSettings},
    store::{DenseGrid, HashedGrid, VoxelField, tsdf_at},
    voxel::{ColorVoxel, Voxel, VoxelData},
};
use log::debug;
use nalgebra::{Isometry3, Point3, Vector3};
use std::time::Instant;

/// Storage for each [`VolumeKind`]
enum Store {
    Dense(DenseGrid<Voxel>),
    Hashed(HashedGrid<Voxel>),
    Color(DenseGrid<ColorVoxel>),
}

/// Runs `$body` with `$grid` bound to whichever store is active
macro_rules! with_store {
    ($store:expr, $grid:ident => $body:expr) => {
        match $store {
            Store::Dense($grid) => $body,
            Store::Hashed($grid) => $body,
            Store::Color($grid) => $body,
        }
    };
}

/// Stored state of a single voxel, as returned by [`Volume::voxel`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VoxelSample {
    /// Normalized signed distance in `[-1, 1]`; meaningless if `weight == 0`
    pub tsdf: f32,
    /// Number of (capped) observations
    pub weight: u32,
    /// Running color average, for volumes that track color
    pub rgb: Option<[f32; 3]>,
}

fn sample_of<V: VoxelData>(v: &V) -> VoxelSample {
    VoxelSample {
        tsdf: v.tsdf(),
        weight: v.weight(),
        rgb: v.rgb(),
    }
}

/// Truncated signed distance volume
///
/// Depth frames are fused with [`integrate`](Volume::integrate) (or its color
/// and [`Frame`] variants); the fused surface is queried by
/// [`raycast`](Volume::raycast) from a virtual camera or extracted directly
/// with [`fetch_points_normals`](Volume::fetch_points_normals).
///
/// Every pose passed to a volume is a camera-to-world transform, and every
/// point or normal returned by a volume is in the world frame.
///
/// Integration takes `&mut self`, while queries take `&self`; the borrow
/// checker therefore rules out raycasting during integration.
pub struct Volume {
    settings: VolumeSettings,
    /// Ray length table for `settings.frame_size`
    pixel_norms: DepthImage,
    store: Store,
    /// Number of integrated frames since construction or reset
    frames: usize,
}

impl Volume {
    /// Builds an empty volume, validating its settings
    pub fn new(settings: VolumeSettings) -> Result<Self, Error> {
        settings.validate()?;
        let store = match settings.kind {
            VolumeKind::Tsdf => {
                Store::Dense(DenseGrid::new(settings.resolution))
            }
            VolumeKind::HashTsdf => Store::Hashed(HashedGrid::new(
                settings.unit_resolution,
                settings.max_volume_units,
            )),
            VolumeKind::ColorTsdf => {
                Store::Color(DenseGrid::new(settings.resolution))
            }
        };
        let pixel_norms =
            settings.depth_intrinsics.pixel_norms(settings.frame_size);
        debug!(
            "built {} volume with {} m voxels",
            settings.kind, settings.voxel_size
        );
        Ok(Self {
            settings,
            pixel_norms,
            store,
            frames: 0,
        })
    }

    /// Returns the settings used to build this volume
    pub fn settings(&self) -> &VolumeSettings {
        &self.settings
    }

    /// Returns the kind of storage used by this volume
    pub fn kind(&self) -> VolumeKind {
        self.settings.kind
    }

    /// Number of frames integrated since construction or the last reset
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Checks whether no frame has been integrated since construction or the
    /// last reset
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Fuses a depth frame, taken from the given camera-to-world pose
    ///
    /// The depth map must match the settings' `frame_size`; pixels that are
    /// non-positive, NaN, or outside the depth range are ignored.
    ///
    /// Color volumes require a color image; use
    /// [`integrate_color`](Self::integrate_color) instead.
    pub fn integrate(
        &mut self,
        depth: &DepthImage,
        pose: &Isometry3<f32>,
    ) -> Result<(), Error> {
        if self.kind().has_color() {
            return Err(Error::MissingColor);
        }
        self.fuse(depth, None, pose)
    }

    /// Fuses a depth frame and a pixel-aligned color image
    ///
    /// Volumes that don't track color ignore the color image.
    pub fn integrate_color(
        &mut self,
        depth: &DepthImage,
        color: &ColorImage,
        pose: &Isometry3<f32>,
    ) -> Result<(), Error> {
        if color.size() != depth.size() {
            return Err(Error::BadImageSize(color.size(), depth.size()));
        }
        if self.kind().has_color() {
            self.fuse(depth, Some(color), pose)
        } else {
            debug!("{} volume ignores color images", self.kind());
            self.fuse(depth, None, pose)
        }
    }

    /// Fuses the depth (and color, if present) images of a [`Frame`]
    pub fn integrate_frame(
        &mut self,
        frame: &Frame,
        pose: &Isometry3<f32>,
    ) -> Result<(), Error> {
        let depth = frame.depth.as_ref().ok_or(Error::MissingDepth)?;
        match &frame.image {
            Some(image) => self.integrate_color(depth, image, pose),
            None => self.integrate(depth, pose),
        }
    }

    fn fuse(
        &mut self,
        depth: &DepthImage,
        color: Option<&ColorImage>,
        pose: &Isometry3<f32>,
    ) -> Result<(), Error> {
        let s = &self.settings;
        if depth.size() != s.frame_size {
            return Err(Error::BadImageSize(depth.size(), s.frame_size));
        }
        let start = Instant::now();
        let proj = Projector {
            vol_to_cam: pose.inverse() * s.pose,
            voxel_size: s.voxel_size,
            truncation: s.truncation_distance,
            intrinsics: s.depth_intrinsics,
            depth,
            pixel_norms: &self.pixel_norms,
            range: s.depth_range,
            color: color.map(|c| (c, s.color_intrinsics)),
        };
        let threads = s.threads.as_ref();
        let w = s.max_weight;
        let stats = match &mut self.store {
            Store::Dense(g) => integrate_dense(g, &proj, w, threads),
            Store::Hashed(g) => integrate_hashed(g, &proj, w, threads),
            Store::Color(g) => integrate_dense(g, &proj, w, threads),
        };
        self.frames += 1;
        debug!(
            "integrated frame {} in {:?}: {} voxels updated",
            self.frames,
            start.elapsed(),
            stats.updated
        );
        if self.kind().is_hashed() {
            debug!(
                "{} new units ({} total, {} visible)",
                stats.allocated,
                self.total_volume_units(),
                stats.visible
            );
        }
        Ok(())
    }

    /// Raycasts at the settings' default raycast size
    pub fn raycast(&self, pose: &Isometry3<f32>) -> RaycastImage {
        let mut out =
            RaycastImage::new(self.settings.raycast_size, self.has_color());
        self.cast(pose, &mut out);
        out
    }

    /// Raycasts at a custom size
    ///
    /// The raycast intrinsics are scaled so that the field of view matches
    /// the default raycast size.
    pub fn raycast_with_size(
        &self,
        pose: &Isometry3<f32>,
        size: ImageSize,
    ) -> Result<RaycastImage, Error> {
        if size.is_empty() {
            return Err(Error::EmptyImage);
        }
        let mut out = RaycastImage::new(size, self.has_color());
        self.cast(pose, &mut out);
        Ok(out)
    }

    /// Raycasts into an existing output image, overwriting every pixel
    ///
    /// The output must have color channels if and only if this volume tracks
    /// color, and all of its images must be the same size.
    pub fn raycast_into(
        &self,
        pose: &Isometry3<f32>,
        out: &mut RaycastImage,
    ) -> Result<(), Error> {
        let size = out.size();
        if size.is_empty() {
            return Err(Error::EmptyImage);
        }
        match (&out.colors, self.has_color()) {
            (Some(_), false) => return Err(Error::NoColor),
            (None, true) => return Err(Error::MissingColor),
            _ => (),
        }
        let colors = out.colors.as_ref().map(|c| c.size());
        for s in std::iter::once(out.normals.size()).chain(colors) {
            if s != size {
                return Err(Error::BadImageSize(s, size));
            }
        }
        self.cast(pose, out);
        Ok(())
    }

    /// Raycasts into a [`Frame`], replacing its points, normals, and colors
    ///
    /// If `size` is `None`, the settings' default raycast size is used.
    pub fn raycast_frame(
        &self,
        pose: &Isometry3<f32>,
        size: Option<ImageSize>,
        frame: &mut Frame,
    ) -> Result<(), Error> {
        let size = size.unwrap_or(self.settings.raycast_size);
        let out = self.raycast_with_size(pose, size)?;
        frame.set_raycast(out);
        Ok(())
    }

    fn cast(&self, pose: &Isometry3<f32>, out: &mut RaycastImage) {
        let s = &self.settings;
        let start = Instant::now();
        let size = out.size();
        let sx = size.width() as f32 / s.raycast_size.width() as f32;
        let sy = size.height() as f32 / s.raycast_size.height() as f32;
        let bounds = match &self.store {
            Store::Dense(g) => Some(g.resolution()),
            Store::Color(g) => Some(g.resolution()),
            Store::Hashed(_) => None,
        };
        let caster = Raycaster {
            cam_to_vol: s.pose.inverse() * pose,
            vol_to_world: s.pose,
            intrinsics: s.raycast_intrinsics.scaled(sx, sy),
            voxel_size: s.voxel_size,
            truncation: s.truncation_distance,
            step_factor: s.raycast_step_factor,
            range: s.depth_range,
            bounds: bounds.map(|r| r.map(|r| r as f32 - 1.0)),
        };
        if let Store::Hashed(g) = &self.store {
            let frustum = Frustum {
                local_to_camera: caster.cam_to_vol.inverse(),
                intrinsics: caster.intrinsics,
                size,
                far: s.depth_range.far,
            };
            g.set_visible(g.count_visible(&frustum, s.voxel_size));
        }
        let threads = s.threads.as_ref();
        let n =
            with_store!(&self.store, g => raycast(g, &caster, out, threads));
        debug!(
            "raycast {size} in {:?}: {n} valid pixels",
            start.elapsed()
        );
    }

    /// Extracts a point cloud of every zero crossing in the volume
    ///
    /// The cloud never carries colors; use
    /// [`fetch_points_normals_colors`](Self::fetch_points_normals_colors) for
    /// color volumes.
    pub fn fetch_points_normals(&self) -> PointCloud {
        let mut out = self.fetch_all();
        out.colors = None;
        out
    }

    /// Extracts a point cloud of every zero crossing, with colors
    ///
    /// Returns [`Error::NoColor`] if this volume doesn't track color.
    pub fn fetch_points_normals_colors(&self) -> Result<PointCloud, Error> {
        if !self.has_color() {
            return Err(Error::NoColor);
        }
        Ok(self.fetch_all())
    }

    fn fetch_all(&self) -> PointCloud {
        let s = &self.settings;
        let start = Instant::now();
        let threads = s.threads.as_ref();
        let out = with_store!(&self.store, g => {
            fetch(g, s.voxel_size, &s.pose, threads)
        });
        debug!("fetched {} points in {:?}", out.len(), start.elapsed());
        out
    }

    /// Evaluates surface normals at world-frame points
    ///
    /// Points where the normal is undefined get a NaN normal.
    pub fn fetch_normals(&self, points: &[Point3<f32>]) -> Vec<Vector3<f32>> {
        let s = &self.settings;
        let threads = s.threads.as_ref();
        with_store!(&self.store, g => {
            fetch_normals(g, points, s.voxel_size, &s.pose, threads)
        })
    }

    /// Marks every voxel as unobserved, dropping all hashed volume units
    pub fn reset(&mut self) {
        match &mut self.store {
            Store::Dense(g) => g.reset(),
            Store::Hashed(g) => g.reset(),
            Store::Color(g) => g.reset(),
        }
        self.frames = 0;
    }

    /// Number of volume units inside the frustum of the most recent
    /// integration or raycast
    ///
    /// Dense volumes are a single unit and always report 1.
    pub fn visible_blocks(&self) -> usize {
        match &self.store {
            Store::Hashed(g) => g.visible(),
            Store::Dense(..) | Store::Color(..) => 1,
        }
    }

    /// Number of allocated volume units
    ///
    /// Dense volumes are a single unit and always report 1.
    pub fn total_volume_units(&self) -> usize {
        match &self.store {
            Store::Hashed(g) => g.len(),
            Store::Dense(..) | Store::Color(..) => 1,
        }
    }

    /// Looks up a voxel by integer index
    ///
    /// Returns `None` outside of a dense grid or in an unallocated unit.
    pub fn voxel(&self, index: Vector3<i32>) -> Option<VoxelSample> {
        with_store!(&self.store, g => g.voxel(index).map(sample_of))
    }

    /// Samples the interpolated signed distance (normalized to `[-1, 1]`) at
    /// a world-frame point
    ///
    /// Returns `None` if any of the surrounding voxels is unobserved.
    pub fn sample(&self, p: &Point3<f32>) -> Option<f32> {
        let s = &self.settings;
        let g = (s.pose.inverse() * p) / s.voxel_size;
        with_store!(&self.store, grid => tsdf_at(grid, &g))
    }

    fn has_color(&self) -> bool {
        self.kind().has_color()
    }
}
