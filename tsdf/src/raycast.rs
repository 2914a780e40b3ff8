//! Sphere-traced rendering of the zero crossing
use crate::{
    ThreadPool,
    camera::Intrinsics,
    image::{Image, ImageSize, NormalImage, PointImage, RgbImage},
    settings::DepthRange,
    store::{VoxelField, normal_at, rgb_at, tsdf_at},
    voxel::VoxelData,
};
use nalgebra::{Isometry3, Point3, Vector3};

/// Output of a raycast: per-pixel points, normals, and (optionally) colors
///
/// Points and normals are in the world frame.  Pixels where no surface was
/// found are NaN in every channel of every image.
#[derive(Clone, Debug, PartialEq)]
pub struct RaycastImage {
    /// Surface position seen through each pixel
    pub points: PointImage,
    /// Unit surface normal at each point
    pub normals: NormalImage,
    /// Interpolated colors, present only for volumes that track color
    pub colors: Option<RgbImage>,
}

const INVALID: [f32; 3] = [f32::NAN; 3];

impl RaycastImage {
    /// Builds an image with every pixel invalid
    pub fn new(size: ImageSize, with_color: bool) -> Self {
        Self {
            points: Image::filled(size, INVALID),
            normals: Image::filled(size, INVALID),
            colors: with_color.then(|| Image::filled(size, INVALID)),
        }
    }

    /// Returns the size of every image
    pub fn size(&self) -> ImageSize {
        self.points.size()
    }

    /// Counts pixels with a valid point
    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| !p[0].is_nan()).count()
    }

    /// Marks every pixel as invalid
    fn clear(&mut self) {
        for img in [&mut self.points, &mut self.normals]
            .into_iter()
            .chain(self.colors.as_mut())
        {
            img.iter_mut().for_each(|p| *p = INVALID);
        }
    }
}

/// Surface hit for a single pixel, in the world frame
#[derive(Copy, Clone, Debug)]
struct Hit {
    point: Point3<f32>,
    normal: Vector3<f32>,
    rgb: Option<[f32; 3]>,
}

/// Smallest march step, in voxels
const MIN_STEP: f32 = 0.5;

/// Ray marcher for a single camera pose
pub(crate) struct Raycaster {
    /// Camera frame to volume frame (in meters)
    pub cam_to_vol: Isometry3<f32>,
    /// Volume frame to world frame
    pub vol_to_world: Isometry3<f32>,
    pub intrinsics: Intrinsics,
    pub voxel_size: f32,
    pub truncation: f32,
    pub step_factor: f32,
    pub range: DepthRange,
    /// Upper corner of a dense grid, in voxels; `None` for unbounded grids
    pub bounds: Option<Vector3<f32>>,
}

/// Clips a ray against the box `[0, hi]`, returning the `t` interval inside
fn clip_box(
    origin: &Point3<f32>,
    dir: &Vector3<f32>,
    hi: &Vector3<f32>,
) -> Option<(f32, f32)> {
    let mut t0 = f32::NEG_INFINITY;
    let mut t1 = f32::INFINITY;
    for a in 0..3 {
        if dir[a] == 0.0 {
            if origin[a] < 0.0 || origin[a] > hi[a] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / dir[a];
        let ta = -origin[a] * inv;
        let tb = (hi[a] - origin[a]) * inv;
        t0 = t0.max(ta.min(tb));
        t1 = t1.min(ta.max(tb));
    }
    (t0 <= t1).then_some((t0, t1))
}

impl Raycaster {
    /// Marches the ray through pixel `(u, v)`
    fn cast<F: VoxelField>(&self, field: &F, u: f32, v: f32) -> Option<Hit> {
        let s = self.voxel_size;
        let dir_cam = self.intrinsics.ray(u, v).normalize();

        // Everything below is in voxel units of the volume frame
        let origin = Point3::from(self.cam_to_vol.translation.vector / s);
        let dir = self.cam_to_vol.rotation * dir_cam;
        let mut t_start = self.range.near / dir_cam.z / s;
        let mut t_end = self.range.far / dir_cam.z / s;
        if let Some(hi) = &self.bounds {
            let (t0, t1) = clip_box(&origin, &dir, hi)?;
            t_start = t_start.max(t0);
            t_end = t_end.min(t1);
        }

        let trunc = self.truncation / s;
        let mut prev: Option<(f32, f32)> = None;
        let mut t = t_start;
        while t <= t_end {
            let g = origin + dir * t;
            let Some(f) = tsdf_at(field, &g) else {
                prev = None;
                t += field.skip(&g, &dir).max(MIN_STEP);
                continue;
            };
            match prev {
                Some((tp, fp)) if fp > 0.0 && f <= 0.0 => {
                    return self.refine(field, &origin, &dir, (tp, fp), (t, f));
                }
                // Leaving a surface from behind
                Some((_, fp)) if fp <= 0.0 && f > 0.0 => return None,
                _ => (),
            }
            let step = if f > 0.0 {
                let step = (f * trunc * self.step_factor).max(MIN_STEP);
                if f >= 1.0 {
                    step.max(field.skip(&g, &dir))
                } else {
                    step
                }
            } else {
                MIN_STEP
            };
            prev = Some((t, f));
            t += step;
        }
        None
    }

    /// Locates the zero crossing between two samples, then evaluates the
    /// surface there
    fn refine<F: VoxelField>(
        &self,
        field: &F,
        origin: &Point3<f32>,
        dir: &Vector3<f32>,
        (mut t0, mut f0): (f32, f32),
        (mut t1, mut f1): (f32, f32),
    ) -> Option<Hit> {
        // Linear interpolation, then a few rounds of regula falsi
        let mut t = t0 + (t1 - t0) * f0 / (f0 - f1);
        for _ in 0..3 {
            let Some(f) = tsdf_at(field, &(origin + dir * t)) else {
                break;
            };
            if f.abs() < 1e-4 {
                break;
            } else if f > 0.0 {
                (t0, f0) = (t, f);
            } else {
                (t1, f1) = (t, f);
            }
            t = t0 + (t1 - t0) * f0 / (f0 - f1);
        }

        let g = origin + dir * t;
        tsdf_at(field, &g)?;
        let normal = normal_at(field, &g)?;
        let rgb = if F::Voxel::HAS_COLOR {
            Some(rgb_at(field, &g)?)
        } else {
            None
        };
        Some(Hit {
            point: self.vol_to_world * Point3::from(g.coords * self.voxel_size),
            normal: self.vol_to_world.rotation * normal,
            rgb,
        })
    }
}

/// Raycasts every pixel of `out`, returning the number of valid pixels
///
/// Every pixel is overwritten; pixels without a surface are set to NaN.
pub(crate) fn raycast<F: VoxelField>(
    field: &F,
    caster: &Raycaster,
    out: &mut RaycastImage,
    threads: Option<&ThreadPool>,
) -> usize {
    let mut hits: Image<Option<Hit>> = Image::new(out.size());
    hits.apply_effect(
        |x, y| caster.cast(field, x as f32, y as f32),
        threads,
    );

    out.clear();
    let mut count = 0;
    for (i, hit) in hits.iter().enumerate() {
        let Some(hit) = hit else {
            continue;
        };
        out.points[i] = hit.point.into();
        out.normals[i] = hit.normal.into();
        if let (Some(colors), Some(rgb)) = (out.colors.as_mut(), hit.rgb) {
            colors[i] = rgb;
        }
        count += 1;
    }
    count
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        store::{DenseGrid, HashedGrid, UnitKey},
        voxel::Voxel,
    };
    use approx::assert_relative_eq;

    #[test]
    fn clip_box_intervals() {
        let hi = Vector3::repeat(10.0);
        let o = Point3::new(-5.0, 5.0, 5.0);
        let (t0, t1) = clip_box(&o, &Vector3::x(), &hi).unwrap();
        assert_eq!((t0, t1), (5.0, 15.0));
        assert!(clip_box(&o, &Vector3::y(), &hi).is_none());

        let o = Point3::new(5.0, 5.0, 5.0);
        let (t0, t1) = clip_box(&o, &-Vector3::z(), &hi).unwrap();
        assert_eq!((t0, t1), (-5.0, 5.0));
    }

    /// Fills every voxel with a plane at `z = plane` (in voxels), seen with
    /// a truncation band of 4 voxels
    fn fill_plane(plane: f32) -> impl Fn(Vector3<i32>) -> Voxel {
        move |ijk| Voxel {
            tsdf: ((plane - ijk.z as f32) / 4.0).clamp(-1.0, 1.0),
            weight: 1,
        }
    }

    fn caster(bounds: Option<Vector3<f32>>) -> Raycaster {
        Raycaster {
            cam_to_vol: Isometry3::translation(0.8, 0.8, -0.5),
            vol_to_world: Isometry3::translation(-0.8, -0.8, 0.5),
            intrinsics: Intrinsics::centered(20.0, ImageSize::new(16, 16)),
            voxel_size: 0.1,
            truncation: 0.4,
            step_factor: 0.75,
            range: DepthRange::default(),
            bounds,
        }
    }

    #[test]
    fn dense_plane() {
        let mut grid = DenseGrid::<Voxel>::new(Vector3::repeat(16));
        let f = fill_plane(10.25);
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let ijk = Vector3::new(x, y, z);
                    *grid.voxel_mut(ijk).unwrap() = f(ijk);
                }
            }
        }
        let caster = caster(Some(Vector3::repeat(15.0)));
        let mut out = RaycastImage::new(ImageSize::new(16, 16), false);
        let n = raycast(&grid, &caster, &mut out, None);
        assert!(n > 0);
        assert_eq!(n, out.valid_count());
        assert!(out.colors.is_none());

        // The plane sits at z = 1.025 m in the volume frame, and the volume
        // frame is offset by 0.5 m along z in the world frame
        for (p, n) in out.points.iter().zip(out.normals.iter()) {
            if p[0].is_nan() {
                assert!(n[0].is_nan());
                continue;
            }
            assert_relative_eq!(p[2], 1.025 + 0.5, epsilon = 1e-3);
            assert_relative_eq!(n[2], -1.0, epsilon = 1e-3);
        }

        let mut par = RaycastImage::new(ImageSize::new(16, 16), false);
        raycast(&grid, &caster, &mut par, Some(&ThreadPool::Global));
        assert_eq!(format!("{out:?}"), format!("{par:?}"));
    }

    #[test]
    fn empty_grid_is_invalid() {
        let grid = HashedGrid::<Voxel>::new(8, None);
        let mut out = RaycastImage::new(ImageSize::new(16, 16), true);
        out.points[0] = [1.0, 2.0, 3.0];
        let n = raycast(&grid, &caster(None), &mut out, None);
        assert_eq!(n, 0);
        assert_eq!(out.valid_count(), 0);
        assert!(out.colors.unwrap().iter().all(|c| c[0].is_nan()));
    }

    #[test]
    fn hashed_plane_skips_empty_units() {
        let mut grid = HashedGrid::<Voxel>::new(4, None);
        let f = fill_plane(10.25);
        for x in -1..5 {
            for y in -1..5 {
                for z in 0..4 {
                    let key = UnitKey(Vector3::new(x, y, z));
                    grid.insert(key);
                    let unit = grid.units_mut().get_mut(&key).unwrap();
                    for (i, v) in unit.voxels.iter_mut().enumerate() {
                        let local = Vector3::new(i / 16, (i / 4) % 4, i % 4);
                        *v = f(key.0 * 4 + local.map(|c| c as i32));
                    }
                    unit.update_surface_flag();
                }
            }
        }
        let mut out = RaycastImage::new(ImageSize::new(16, 16), false);
        let n = raycast(&grid, &caster(None), &mut out, None);
        assert!(n > 0);
        for p in out.points.iter().filter(|p| !p[0].is_nan()) {
            assert_relative_eq!(p[2], 1.025 + 0.5, epsilon = 1e-3);
        }
    }
}
