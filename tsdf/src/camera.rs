//! Pinhole camera model and view frustum tests
//!
//! Camera space follows the usual computer-vision convention: `+x` points
//! right in the image, `+y` points down, and `+z` looks forward.
use crate::image::{DepthImage, ImageSize};
use nalgebra::{Isometry3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics (focal lengths and principal point, in pixels)
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Horizontal focal length
    pub fx: f32,
    /// Vertical focal length
    pub fy: f32,
    /// Principal point, x coordinate
    pub cx: f32,
    /// Principal point, y coordinate
    pub cy: f32,
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::new(525.0, 525.0, 319.5, 239.5)
    }
}

impl Intrinsics {
    /// Builds a new set of intrinsics
    pub const fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Builds intrinsics with square pixels and a centered principal point
    pub fn centered(focal: f32, size: ImageSize) -> Self {
        Self::new(
            focal,
            focal,
            (size.width() as f32 - 1.0) / 2.0,
            (size.height() as f32 - 1.0) / 2.0,
        )
    }

    /// Projects a camera-space point into pixel coordinates
    #[inline]
    pub fn project(&self, p: &Point3<f32>) -> Point2<f32> {
        Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        )
    }

    /// Returns the (non-normalized) ray through a pixel, with `z = 1`
    #[inline]
    pub fn ray(&self, u: f32, v: f32) -> Vector3<f32> {
        Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0)
    }

    /// Rescales the intrinsics for an image resized by `(sx, sy)`
    ///
    /// The image edges stay fixed, so the field of view is unchanged.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(
            self.fx * sx,
            self.fy * sy,
            (self.cx + 0.5) * sx - 0.5,
            (self.cy + 0.5) * sy - 0.5,
        )
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
            && self.cx.is_finite()
            && self.cy.is_finite()
    }

    /// Builds the per-pixel ray-length table `sqrt(x² + y² + 1)`
    ///
    /// Multiplying a depth difference along `z` by this factor gives the
    /// distance along the pixel's ray.
    pub(crate) fn pixel_norms(&self, size: ImageSize) -> DepthImage {
        let mut out = DepthImage::new(size);
        out.apply_effect(|x, y| self.ray(x as f32, y as f32).norm(), None);
        out
    }
}

/// Rounds a projected position to the nearest pixel, if it lands in bounds
///
/// Returns `(row, column)`
#[inline]
pub(crate) fn nearest_pixel(
    px: &Point2<f32>,
    size: ImageSize,
) -> Option<(usize, usize)> {
    let u = px.x.round();
    let v = px.y.round();
    if u >= 0.0
        && v >= 0.0
        && u < size.width() as f32
        && v < size.height() as f32
    {
        Some((v as usize, u as usize))
    } else {
        None
    }
}

/// Camera frustum expressed relative to some local frame
pub(crate) struct Frustum {
    /// Transform from the local frame into camera space
    pub local_to_camera: Isometry3<f32>,
    pub intrinsics: Intrinsics,
    pub size: ImageSize,
    pub far: f32,
}

impl Frustum {
    /// Conservative test for whether a sphere (in local coordinates) may be
    /// visible to the camera
    pub fn sees_sphere(&self, center: &Point3<f32>, radius: f32) -> bool {
        let p = self.local_to_camera * center;
        if p.z - radius > self.far || p.z + radius <= 0.0 {
            return false;
        }
        if p.z <= radius {
            // The camera is (nearly) inside the sphere
            return true;
        }
        let px = self.intrinsics.project(&p);
        let depth = p.z - radius;
        let mx = self.intrinsics.fx * radius / depth;
        let my = self.intrinsics.fy * radius / depth;
        px.x >= -mx
            && px.y >= -my
            && px.x <= self.size.width() as f32 + mx
            && px.y <= self.size.height() as f32 + my
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn project_then_ray() {
        let intr = Intrinsics::default();
        let p = Point3::new(0.3, -0.2, 1.7);
        let px = intr.project(&p);
        let q = Point3::from(intr.ray(px.x, px.y) * p.z);
        assert_relative_eq!(p, q, epsilon = 1e-5);
    }

    #[test]
    fn scaled_keeps_field_of_view() {
        let intr = Intrinsics::default();
        let half = intr.scaled(0.5, 0.5);
        assert_eq!(half.fx, 262.5);
        assert_eq!(half.cx, 159.5);
        assert_eq!(half.cy, 119.5);

        // The corner ray is unchanged
        let a = intr.ray(-0.5, -0.5);
        let b = half.ray(-0.5, -0.5);
        assert_relative_eq!(a, b, epsilon = 1e-6);
    }

    #[test]
    fn pixel_norms_at_principal_point() {
        let intr = Intrinsics::new(100.0, 100.0, 2.0, 1.0);
        let norms = intr.pixel_norms(ImageSize::new(5, 3));
        assert_eq!(norms[(1, 2)], 1.0);
        assert_relative_eq!(
            norms[(0, 0)],
            (0.0004f32 + 0.0001 + 1.0).sqrt(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn nearest_pixel_bounds() {
        let size = ImageSize::new(4, 3);
        assert_eq!(nearest_pixel(&Point2::new(0.4, 0.4), size), Some((0, 0)));
        assert_eq!(nearest_pixel(&Point2::new(3.4, 2.4), size), Some((2, 3)));
        assert_eq!(nearest_pixel(&Point2::new(3.5, 0.0), size), None);
        assert_eq!(nearest_pixel(&Point2::new(-0.6, 0.0), size), None);
        assert_eq!(nearest_pixel(&Point2::new(f32::NAN, 0.0), size), None);
    }

    #[test]
    fn frustum_culling() {
        let f = Frustum {
            local_to_camera: Isometry3::identity(),
            intrinsics: Intrinsics::default(),
            size: ImageSize::default(),
            far: 4.0,
        };
        assert!(f.sees_sphere(&Point3::new(0.0, 0.0, 2.0), 0.1));
        assert!(!f.sees_sphere(&Point3::new(0.0, 0.0, -2.0), 0.1));
        assert!(!f.sees_sphere(&Point3::new(0.0, 0.0, 5.0), 0.1));
        assert!(!f.sees_sphere(&Point3::new(10.0, 0.0, 1.0), 0.1));
        assert!(f.sees_sphere(&Point3::new(0.0, 0.0, 0.05), 0.1));
    }
}
