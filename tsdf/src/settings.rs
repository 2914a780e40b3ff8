//! Volume configuration
use crate::{Error, ThreadPool, camera::Intrinsics, image::ImageSize};
use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};

/// Storage and fusion flavor of a [`Volume`](crate::Volume)
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum VolumeKind {
    /// Dense, fixed-extent grid of distance samples
    Tsdf,
    /// Sparse grid of volume units, allocated on demand
    HashTsdf,
    /// Dense grid of distance and color samples
    ColorTsdf,
}

impl VolumeKind {
    /// Checks whether this kind of volume is backed by hashed volume units
    pub fn is_hashed(&self) -> bool {
        matches!(self, VolumeKind::HashTsdf)
    }

    /// Checks whether this kind of volume fuses color
    pub fn has_color(&self) -> bool {
        matches!(self, VolumeKind::ColorTsdf)
    }
}

/// Range of depth values (in meters) that are accepted during integration
///
/// The far value also bounds raycasting.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    /// Smallest accepted depth
    pub near: f32,
    /// Largest accepted depth
    pub far: f32,
}

impl DepthRange {
    /// Checks whether a depth value lies within the range
    #[inline]
    pub fn contains(&self, d: f32) -> bool {
        d >= self.near && d <= self.far
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            near: 0.0,
            far: 4.0,
        }
    }
}

/// Settings for a [`Volume`](crate::Volume)
///
/// Settings are fixed when the volume is built.  Use
/// [`VolumeSettings::new`] for per-kind presets, then override individual
/// fields:
///
/// ```
/// use tsdf::{VolumeKind, VolumeSettings};
/// let settings = VolumeSettings {
///     max_weight: 16,
///     ..VolumeSettings::new(VolumeKind::HashTsdf)
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeSettings {
    /// Storage flavor
    pub kind: VolumeKind,

    /// Edge length of a voxel, in meters
    pub voxel_size: f32,

    /// Truncation distance, in meters
    ///
    /// Signed distances are clamped to `±truncation_distance` and stored
    /// normalized to `[-1, 1]`.  This must be larger than `voxel_size`.
    pub truncation_distance: f32,

    /// Number of voxels along each axis (dense volumes only)
    pub resolution: Vector3<u32>,

    /// Number of voxels along each edge of a volume unit (hashed volumes only)
    pub unit_resolution: u32,

    /// Maximum number of allocated volume units (hashed volumes only)
    ///
    /// Once the cap is reached, new units are dropped (with a warning) and
    /// integration continues into existing units.
    pub max_volume_units: Option<usize>,

    /// Saturation bound for per-voxel integration weights
    pub max_weight: u32,

    /// Fraction of the truncation distance to advance per raycast step in
    /// free space, in `(0, 1]`
    pub raycast_step_factor: f32,

    /// Pose of the volume origin, as a volume-to-world transform
    ///
    /// Voxel `(i, j, k)` is centered at `(i, j, k) * voxel_size` in the volume
    /// frame.
    pub pose: Isometry3<f32>,

    /// Size of depth (and color) images passed to integration
    pub frame_size: ImageSize,

    /// Intrinsics of the depth camera
    pub depth_intrinsics: Intrinsics,

    /// Intrinsics of the color camera, which shares the depth camera's pose
    pub color_intrinsics: Intrinsics,

    /// Default size of raycast output
    pub raycast_size: ImageSize,

    /// Intrinsics used for raycasting at `raycast_size`
    ///
    /// Raycasts at other sizes scale these intrinsics proportionally.
    pub raycast_intrinsics: Intrinsics,

    /// Valid depth range during integration
    pub depth_range: DepthRange,

    /// Thread pool to use for integration, raycasting, and extraction
    ///
    /// If this is `None`, then work is done on the calling thread; otherwise,
    /// the provided pool is used.
    #[serde(skip, default = "default_threads")]
    pub threads: Option<ThreadPool>,
}

fn default_threads() -> Option<ThreadPool> {
    Some(ThreadPool::Global)
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self::new(VolumeKind::Tsdf)
    }
}

impl VolumeSettings {
    /// Builds the preset settings for the given kind of volume
    ///
    /// Dense presets cover a 3 m cube (128³ voxels) placed in front of a
    /// camera at the world origin; the hashed preset uses 3 / 512 m voxels in
    /// 16³ units.  All presets assume a 640×480 camera with a 525 px focal
    /// length.
    pub fn new(kind: VolumeKind) -> Self {
        let intrinsics = Intrinsics::default();
        let (voxel_size, step, pose) = match kind {
            VolumeKind::Tsdf | VolumeKind::ColorTsdf => (
                3.0 / 128.0,
                0.75,
                Isometry3::translation(-1.5, -1.5, 0.5),
            ),
            VolumeKind::HashTsdf => (3.0 / 512.0, 0.5, Isometry3::identity()),
        };
        Self {
            kind,
            voxel_size,
            truncation_distance: 7.0 * voxel_size,
            resolution: Vector3::repeat(128),
            unit_resolution: 16,
            max_volume_units: None,
            max_weight: 64,
            raycast_step_factor: step,
            pose,
            frame_size: ImageSize::default(),
            depth_intrinsics: intrinsics,
            color_intrinsics: intrinsics,
            raycast_size: ImageSize::default(),
            raycast_intrinsics: intrinsics,
            depth_range: DepthRange::default(),
            threads: default_threads(),
        }
    }

    /// Checks the settings for consistency
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.voxel_size > 0.0 && self.voxel_size.is_finite()) {
            return Err(Error::BadVoxelSize(self.voxel_size));
        }
        if !(self.truncation_distance > self.voxel_size
            && self.truncation_distance.is_finite())
        {
            return Err(Error::BadTruncation(
                self.truncation_distance,
                self.voxel_size,
            ));
        }
        if self.kind.is_hashed() {
            if self.unit_resolution == 0 {
                return Err(Error::BadUnitResolution);
            }
        } else if self.resolution.iter().any(|r| *r == 0) {
            return Err(Error::BadResolution);
        }
        if self.max_weight == 0 {
            return Err(Error::BadMaxWeight);
        }
        if !(self.raycast_step_factor > 0.0 && self.raycast_step_factor <= 1.0)
        {
            return Err(Error::BadStepFactor(self.raycast_step_factor));
        }
        let DepthRange { near, far } = self.depth_range;
        if !(near >= 0.0 && far > near && far.is_finite()) {
            return Err(Error::BadDepthRange(near, far));
        }
        if [
            &self.depth_intrinsics,
            &self.color_intrinsics,
            &self.raycast_intrinsics,
        ]
        .iter()
        .any(|i| !i.is_valid())
        {
            return Err(Error::BadIntrinsics);
        }
        if self.frame_size.is_empty() || self.raycast_size.is_empty() {
            return Err(Error::EmptyImage);
        }
        Ok(())
    }
}
