//! Voxel storage and field sampling
//!
//! Both stores address voxels by integer coordinates in the volume frame,
//! scaled so that voxel `(i, j, k)` sits at `(i, j, k)`.  Continuous positions
//! in these units are sampled by trilinear interpolation between the eight
//! surrounding voxel centers.
use crate::voxel::VoxelData;
use nalgebra::{Point3, Vector3};

mod dense;
mod hashed;

pub(crate) use dense::DenseGrid;
pub(crate) use hashed::{HashedGrid, Inserted, UnitKey, VolumeUnit};

/// Axis-aligned block of voxels, used to split up full scans
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Region {
    /// Lowest voxel coordinate in the region
    pub min: Vector3<i32>,
    /// Number of voxels along each axis
    pub size: Vector3<i32>,
}

impl Region {
    /// Iterates over every voxel coordinate in the region, `z` fastest
    pub fn iter(&self) -> impl Iterator<Item = Vector3<i32>> + '_ {
        let s = self.size;
        (0..s.x).flat_map(move |x| {
            (0..s.y).flat_map(move |y| {
                (0..s.z).map(move |z| self.min + Vector3::new(x, y, z))
            })
        })
    }
}

/// Read access to a grid of voxels
pub(crate) trait VoxelField: Sync {
    type Voxel: VoxelData;

    /// Looks up a voxel by integer coordinates
    ///
    /// Returns `None` for coordinates outside of a dense grid, or in an
    /// unallocated hashed unit.
    fn voxel(&self, ijk: Vector3<i32>) -> Option<&Self::Voxel>;

    /// Looks up a voxel, filtering out unobserved voxels
    #[inline]
    fn observed(&self, ijk: Vector3<i32>) -> Option<&Self::Voxel> {
        self.voxel(ijk).filter(|v| v.is_observed())
    }

    /// Returns a distance (in voxels) that a ray at `g` traveling along `dir`
    /// can skip without missing any surface
    ///
    /// The default implementation has no acceleration structure and returns 0.
    fn skip(&self, _g: &Point3<f32>, _dir: &Vector3<f32>) -> f32 {
        0.0
    }

    /// Splits the set of stored voxels into regions for a full scan
    fn regions(&self) -> Vec<Region>;
}

/// Corner offsets for trilinear interpolation, with `x` in bit 0, `y` in bit
/// 1, and `z` in bit 2
const CORNERS: [[i32; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// Collects the eight observed voxels around `g`, along with the fractional
/// position within their cell
///
/// Returns `None` if any of the eight is unobserved.
#[inline]
fn cell<F: VoxelField>(
    field: &F,
    g: &Point3<f32>,
) -> Option<([F::Voxel; 8], Vector3<f32>)> {
    if !g.iter().all(|c| c.is_finite()) {
        return None;
    }
    let base = g.map(f32::floor);
    let frac = g - base;
    let b = Vector3::new(base.x as i32, base.y as i32, base.z as i32);
    let mut out = [F::Voxel::default(); 8];
    for (o, [dx, dy, dz]) in out.iter_mut().zip(CORNERS) {
        *o = *field.observed(b + Vector3::new(dx, dy, dz))?;
    }
    Some((out, frac))
}

/// Trilinear blend of eight corner values (ordered as [`CORNERS`])
#[inline]
fn trilinear(v: [f32; 8], t: &Vector3<f32>) -> f32 {
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let c00 = lerp(v[0], v[1], t.x);
    let c10 = lerp(v[2], v[3], t.x);
    let c01 = lerp(v[4], v[5], t.x);
    let c11 = lerp(v[6], v[7], t.x);
    let c0 = lerp(c00, c10, t.y);
    let c1 = lerp(c01, c11, t.y);
    lerp(c0, c1, t.z)
}

/// Samples the normalized signed distance at a continuous position
#[inline]
pub(crate) fn tsdf_at<F: VoxelField>(
    field: &F,
    g: &Point3<f32>,
) -> Option<f32> {
    let (vs, t) = cell(field, g)?;
    Some(trilinear(vs.map(|v| v.tsdf()), &t))
}

/// Samples color at a continuous position
///
/// Returns `None` if the field does not track color or any corner is
/// unobserved.
pub(crate) fn rgb_at<F: VoxelField>(
    field: &F,
    g: &Point3<f32>,
) -> Option<[f32; 3]> {
    if !F::Voxel::HAS_COLOR {
        return None;
    }
    let (vs, t) = cell(field, g)?;
    let mut out = [0.0; 3];
    for (c, o) in out.iter_mut().enumerate() {
        *o = trilinear(vs.map(|v| v.rgb().map_or(0.0, |rgb| rgb[c])), &t);
    }
    Some(out)
}

/// Estimates the surface normal as the normalized central-difference
/// gradient of the interpolated field, with taps one voxel away on each axis
///
/// Returns `None` if any tap touches an unobserved voxel or the gradient
/// vanishes.
pub(crate) fn normal_at<F: VoxelField>(
    field: &F,
    g: &Point3<f32>,
) -> Option<Vector3<f32>> {
    let mut grad = Vector3::zeros();
    for axis in 0..3 {
        let mut d = Vector3::zeros();
        d[axis] = 1.0;
        let hi = tsdf_at(field, &(g + d))?;
        let lo = tsdf_at(field, &(g - d))?;
        grad[axis] = hi - lo;
    }
    let norm = grad.norm();
    if norm > 1e-6 && norm.is_finite() {
        Some(grad / norm)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::voxel::Voxel;
    use approx::assert_relative_eq;

    /// Builds an 8³ grid holding the planar field `f = (n · p - d) / 16`
    fn planar(n: Vector3<f32>, d: f32) -> DenseGrid<Voxel> {
        let mut grid = DenseGrid::<Voxel>::new(Vector3::new(8, 8, 8));
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    let p = Vector3::new(x as f32, y as f32, z as f32);
                    let v = grid.voxel_mut(Vector3::new(x, y, z)).unwrap();
                    v.tsdf = (n.dot(&p) - d) / 16.0;
                    v.weight = 1;
                }
            }
        }
        grid
    }

    #[test]
    fn trilinear_is_exact_for_linear_fields() {
        let n = Vector3::new(1.0, 2.0, -0.5).normalize();
        let grid = planar(n, 1.0);
        for p in [
            Point3::new(3.25, 2.5, 4.75),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(5.9, 3.1, 2.2),
        ] {
            let expected = (n.dot(&p.coords) - 1.0) / 16.0;
            let got = tsdf_at(&grid, &p).unwrap();
            assert_relative_eq!(got, expected, epsilon = 1e-5);
            let normal = normal_at(&grid, &p).unwrap();
            assert_relative_eq!(normal, n, epsilon = 1e-5);
        }
    }

    #[test]
    fn unobserved_taps_invalidate() {
        let n = Vector3::new(0.0, 0.0, 1.0);
        let mut grid = planar(n, 3.0);
        let p = Point3::new(3.5, 3.5, 3.5);
        assert!(tsdf_at(&grid, &p).is_some());
        assert!(normal_at(&grid, &p).is_some());

        // Clear a voxel used by the +x normal tap, but not the center cell
        grid.voxel_mut(Vector3::new(5, 3, 3)).unwrap().weight = 0;
        assert!(tsdf_at(&grid, &p).is_some());
        assert!(normal_at(&grid, &p).is_none());

        // Positions at the edge of the grid need out-of-bounds neighbors
        assert!(tsdf_at(&grid, &Point3::new(7.5, 0.0, 0.0)).is_none());
        assert!(tsdf_at(&grid, &Point3::new(f32::NAN, 0.0, 0.0)).is_none());
    }

    #[test]
    fn region_iteration_order() {
        let r = Region {
            min: Vector3::new(1, 2, 3),
            size: Vector3::new(2, 1, 2),
        };
        let out: Vec<_> = r.iter().collect();
        assert_eq!(
            out,
            vec![
                Vector3::new(1, 2, 3),
                Vector3::new(1, 2, 4),
                Vector3::new(2, 2, 3),
                Vector3::new(2, 2, 4),
            ]
        );
    }
}
