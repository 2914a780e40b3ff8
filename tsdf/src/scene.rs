//! Synthetic scenes of analytic shapes, rendered into depth and color frames
//!
//! Scenes are sphere-traced on the CPU; they're meant for tests, benchmarks,
//! and demos, not for speed.
//!
//! ```
//! use tsdf::{ImageSize, Intrinsics, scene::Scene};
//! use nalgebra::{Isometry3, Point3};
//!
//! let scene = Scene::new().sphere(Point3::new(0.0, 0.0, 2.0), 0.5, [255; 3]);
//! let size = ImageSize::new(32, 24);
//! let depth = scene.render_depth(
//!     &Isometry3::identity(),
//!     &Intrinsics::centered(30.0, size),
//!     size,
//!     None,
//! );
//! assert!((depth[(11, 15)] - 1.5).abs() < 0.01);
//! assert_eq!(depth[(0, 0)], 0.0);
//! ```
use crate::{
    ThreadPool,
    camera::Intrinsics,
    image::{ColorImage, DepthImage, ImageSize},
};
use nalgebra::{Isometry3, Point3, Unit, Vector3};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Analytic shape with an exact (or conservative) distance function
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Primitive {
    /// Solid sphere
    Sphere {
        /// Center position
        center: Point3<f32>,
        /// Radius, in meters
        radius: f32,
    },
    /// Half-space behind the plane `normal · p = offset`
    Plane {
        /// Outward-facing normal
        normal: Unit<Vector3<f32>>,
        /// Signed offset of the plane along its normal
        offset: f32,
    },
}

impl Primitive {
    /// Signed distance from `p` to the primitive's surface
    pub fn distance(&self, p: &Point3<f32>) -> f32 {
        match self {
            Primitive::Sphere { center, radius } => {
                (p - center).norm() - radius
            }
            Primitive::Plane { normal, offset } => {
                normal.dot(&p.coords) - offset
            }
        }
    }
}

/// Collection of colored primitives, plus optional depth noise
#[derive(Clone, Debug, Default)]
pub struct Scene {
    primitives: Vec<(Primitive, [u8; 3])>,
    /// Amplitude of uniform noise added to valid depth pixels, in meters
    noise: f32,
    seed: u64,
}

/// Maximum number of sphere-tracing steps per ray
const MAX_STEPS: usize = 256;

/// Distance at which a ray is considered to have hit a surface
const EPSILON: f32 = 1e-5;

/// Maximum ray length, in meters
const MAX_DEPTH: f32 = 20.0;

impl Scene {
    /// Builds an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a primitive with the given color
    pub fn with(mut self, p: Primitive, color: [u8; 3]) -> Self {
        self.primitives.push((p, color));
        self
    }

    /// Adds a sphere with the given color
    pub fn sphere(
        self,
        center: Point3<f32>,
        radius: f32,
        color: [u8; 3],
    ) -> Self {
        self.with(Primitive::Sphere { center, radius }, color)
    }

    /// Adds uniform noise in `[-amplitude, amplitude]` to every valid depth
    /// pixel, drawn from a seeded generator
    pub fn with_noise(self, amplitude: f32, seed: u64) -> Self {
        Self {
            noise: amplitude,
            seed,
            ..self
        }
    }

    /// Two spheres resting above a floor
    ///
    /// The floor is the plane `y = 0.5` (with `+y` pointing down, as in
    /// camera space); the large sphere is centered 2 m in front of the
    /// origin.
    pub fn spheres_on_plane() -> Self {
        Self::new()
            .with(
                Primitive::Plane {
                    normal: Unit::new_normalize(-Vector3::y()),
                    offset: -0.5,
                },
                [120, 120, 120],
            )
            .sphere(Point3::new(0.0, 0.0, 2.0), 0.5, [200, 80, 40])
            .sphere(Point3::new(0.6, 0.35, 1.7), 0.15, [40, 160, 220])
    }

    /// Returns the distance to the nearest primitive and its index
    fn nearest(&self, p: &Point3<f32>) -> Option<(f32, usize)> {
        self.primitives
            .iter()
            .enumerate()
            .map(|(i, (prim, _))| (prim.distance(p), i))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Sphere-traces a ray, returning the hit distance and primitive index
    fn trace(
        &self,
        origin: &Point3<f32>,
        dir: &Vector3<f32>,
    ) -> Option<(f32, usize)> {
        let mut t = 0.0;
        for _ in 0..MAX_STEPS {
            let (d, i) = self.nearest(&(origin + dir * t))?;
            if d < EPSILON {
                return Some((t, i));
            }
            t += d;
            if t > MAX_DEPTH {
                break;
            }
        }
        None
    }

    /// Casts the ray through pixel `(x, y)` for a camera-to-world pose
    ///
    /// Returns the hit's depth along the camera's `z` axis, and the index of
    /// the primitive that was hit.
    fn pixel(
        &self,
        pose: &Isometry3<f32>,
        intrinsics: &Intrinsics,
        x: usize,
        y: usize,
    ) -> Option<(f32, usize)> {
        let ray = intrinsics.ray(x as f32, y as f32);
        let norm = ray.norm();
        let dir = pose.rotation * (ray / norm);
        let origin = Point3::from(pose.translation.vector);
        self.trace(&origin, &dir).map(|(t, i)| (t / norm, i))
    }

    /// Renders a depth map, with 0 marking pixels that miss every primitive
    pub fn render_depth(
        &self,
        pose: &Isometry3<f32>,
        intrinsics: &Intrinsics,
        size: ImageSize,
        threads: Option<&ThreadPool>,
    ) -> DepthImage {
        let mut out = DepthImage::new(size);
        out.apply_effect(
            |x, y| self.pixel(pose, intrinsics, x, y).map_or(0.0, |(d, _)| d),
            threads,
        );
        if self.noise > 0.0 {
            let mut rng = StdRng::seed_from_u64(self.seed);
            for d in out.iter_mut().filter(|d| **d > 0.0) {
                *d += rng.gen_range(-self.noise..=self.noise);
            }
        }
        out
    }

    /// Renders a color image of flat-shaded primitives on a black background
    pub fn render_color(
        &self,
        pose: &Isometry3<f32>,
        intrinsics: &Intrinsics,
        size: ImageSize,
        threads: Option<&ThreadPool>,
    ) -> ColorImage {
        let mut out = ColorImage::new(size);
        out.apply_effect(
            |x, y| {
                self.pixel(pose, intrinsics, x, y)
                    .map_or([0; 3], |(_, i)| self.primitives[i].1)
            },
            threads,
        );
        out
    }

    /// Builds `count` camera-to-world poses evenly spaced on a circle around
    /// `center`, each looking at `center`
    ///
    /// The circle has the given radius in the `xz` plane and sits `height`
    /// above the center (i.e. towards `-y`).  The first pose is directly in
    /// front of the center, on the `-z` side.
    pub fn orbit(
        center: &Point3<f32>,
        radius: f32,
        height: f32,
        count: usize,
    ) -> Vec<Isometry3<f32>> {
        (0..count)
            .map(|i| {
                let a = std::f32::consts::TAU * i as f32 / count as f32;
                let eye = center
                    + Vector3::new(
                        radius * a.sin(),
                        -height,
                        -radius * a.cos(),
                    );
                Isometry3::face_towards(&eye, center, &Vector3::y())
            })
            .collect()
    }
}
