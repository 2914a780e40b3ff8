//! Module containing the universal error type
use crate::image::ImageSize;
use thiserror::Error;

/// Universal error type for volume construction and queries
#[derive(Error, Debug)]
pub enum Error {
    /// Voxel size must be positive and finite
    #[error("voxel size must be positive and finite (got {0})")]
    BadVoxelSize(f32),

    /// Truncation distance must be larger than a single voxel
    #[error("truncation distance ({0}) must exceed voxel size ({1})")]
    BadTruncation(f32, f32),

    /// Dense grid resolution has a zero axis
    #[error("grid resolution must be non-zero on every axis")]
    BadResolution,

    /// Hashed volume units must contain at least one voxel
    #[error("volume unit resolution must be non-zero")]
    BadUnitResolution,

    /// Integration weight cap must allow at least one observation
    #[error("max weight must be at least 1")]
    BadMaxWeight,

    /// Raycast step factor is outside of `(0, 1]`
    #[error("raycast step factor must be in (0, 1] (got {0})")]
    BadStepFactor(f32),

    /// Depth clip range is empty or negative
    #[error("bad depth range [{0}, {1}]")]
    BadDepthRange(f32, f32),

    /// Camera intrinsics have a non-positive or non-finite focal length
    #[error("intrinsics must have positive, finite focal lengths")]
    BadIntrinsics,

    /// Image has zero width or height
    #[error("image size must be non-zero")]
    EmptyImage,

    /// Image size does not match the size required by the operation
    #[error("image size ({0}) does not match expected size ({1})")]
    BadImageSize(ImageSize, ImageSize),

    /// Pixel buffer length does not match the image size
    #[error("pixel buffer length ({0}) does not match image size ({1})")]
    BadImageData(usize, ImageSize),

    /// Color volumes must be integrated with a color image
    #[error("color volume requires a color image")]
    MissingColor,

    /// Frame has no depth image to integrate
    #[error("frame has no depth image")]
    MissingDepth,

    /// Point cloud channels have different lengths
    #[error(
        "point cloud has {0} points but {1} normals and {2:?} colors"
    )]
    BadCloud(usize, usize, Option<usize>),

    /// Color output was requested from a volume that does not track color
    #[error("volume does not track color")]
    NoColor,

    /// IO error; see inner code for details
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
