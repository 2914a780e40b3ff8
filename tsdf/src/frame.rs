//! Bundles of input images and raycast output
use crate::{
    image::{ColorImage, DepthImage, NormalImage, PointImage, RgbImage},
    raycast::RaycastImage,
};

/// Container for one frame's worth of images
///
/// A frame is used both as integration input (`depth`, and `image` for
/// color volumes) and as an output sink for
/// [`Volume::raycast_frame`](crate::Volume::raycast_frame), which fills
/// `points`, `normals`, and (for color volumes) `colors`.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    /// Depth map in meters
    pub depth: Option<DepthImage>,
    /// Color image aligned with `depth`
    pub image: Option<ColorImage>,
    /// Raycast points in the world frame
    pub points: Option<PointImage>,
    /// Raycast normals in the world frame
    pub normals: Option<NormalImage>,
    /// Raycast colors
    pub colors: Option<RgbImage>,
}

impl Frame {
    /// Builds a frame holding only a depth map
    pub fn from_depth(depth: DepthImage) -> Self {
        Self {
            depth: Some(depth),
            ..Self::default()
        }
    }

    /// Attaches a color image to the frame
    pub fn with_image(self, image: ColorImage) -> Self {
        Self {
            image: Some(image),
            ..self
        }
    }

    /// Replaces the frame's raycast output
    pub(crate) fn set_raycast(&mut self, r: RaycastImage) {
        self.points = Some(r.points);
        self.normals = Some(r.normals);
        self.colors = r.colors;
    }
}
