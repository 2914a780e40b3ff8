//! `tsdf` fuses posed depth (and color) frames into a volumetric truncated
//! signed distance function, and renders or extracts the fused surface.
//!
//! A **TSDF volume** stores, for each voxel, a running average of the signed
//! distance to the nearest observed surface.  Distances are positive in free
//! space and negative behind surfaces; they're truncated to a narrow band
//! around the surface and stored normalized to `[-1, 1]`.  Alongside each
//! distance, a voxel keeps an observation count (its **weight**), and color
//! volumes also keep a running RGB average.
//!
//! # Volume kinds
//! Three storage flavors are selected by [`VolumeKind`]:
//! - [`VolumeKind::Tsdf`] is a dense, fixed-extent grid
//! - [`VolumeKind::HashTsdf`] is a sparse grid of **volume units** (blocks of
//!   voxels), allocated as surfaces are observed and indexed by a spatial
//!   hash, so it covers unbounded space
//! - [`VolumeKind::ColorTsdf`] is a dense grid that also fuses color
//!
//! All three share the same API through [`Volume`].
//!
//! # Conventions
//! - Camera space looks down `+z`, with `+x` right and `+y` down in the image
//! - Every pose is a **camera-to-world** [`Isometry3`](nalgebra::Isometry3)
//! - Every point and normal returned by a volume is in the **world** frame
//! - The volume itself is placed in the world by
//!   [`VolumeSettings::pose`]; voxel `(i, j, k)` is centered at
//!   `(i, j, k) * voxel_size` in the volume's frame
//! - Invalid output pixels and normals are NaN in every channel
//!
//! # Quick tour
//! ```
//! use tsdf::{ImageSize, Intrinsics, Volume, VolumeKind, VolumeSettings};
//! use tsdf::scene::Scene;
//! use nalgebra::{Isometry3, Point3};
//!
//! let size = ImageSize::new(64, 48);
//! let intrinsics = Intrinsics::centered(60.0, size);
//! let settings = VolumeSettings {
//!     voxel_size: 0.02,
//!     truncation_distance: 0.08,
//!     frame_size: size,
//!     depth_intrinsics: intrinsics,
//!     raycast_size: size,
//!     raycast_intrinsics: intrinsics,
//!     ..VolumeSettings::new(VolumeKind::HashTsdf)
//! };
//! let mut volume = Volume::new(settings)?;
//!
//! // Fuse a synthetic depth frame of a sphere
//! let pose = Isometry3::identity();
//! let scene = Scene::new().sphere(Point3::new(0.0, 0.0, 1.5), 0.4, [255; 3]);
//! let depth = scene.render_depth(&pose, &intrinsics, size, None);
//! volume.integrate(&depth, &pose)?;
//!
//! // Render it back from the same viewpoint
//! let out = volume.raycast(&pose);
//! assert!(out.valid_count() > 0);
//!
//! // Extract every surface crossing in the volume
//! let cloud = volume.fetch_points_normals();
//! assert!(!cloud.is_empty());
//! # Ok::<(), tsdf::Error>(())
//! ```
#![warn(missing_docs)]

mod camera;
mod error;
mod fetch;
mod frame;
mod image;
mod integrate;
mod pool;
mod raycast;
mod settings;
mod store;
mod volume;
mod voxel;

pub mod scene;

pub use camera::Intrinsics;
pub use error::Error;
pub use fetch::PointCloud;
pub use frame::Frame;
pub use image::{
    ColorImage, DepthImage, Image, ImageSize, NormalImage, PointImage,
    RgbImage,
};
pub use pool::ThreadPool;
pub use raycast::RaycastImage;
pub use settings::{DepthRange, VolumeKind, VolumeSettings};
pub use volume::{Volume, VoxelSample};
