//! Surface extraction by scanning voxel edges for zero crossings
use crate::{
    Error, ThreadPool,
    pool::map_range,
    store::{Region, VoxelField, normal_at},
    voxel::VoxelData,
};
use nalgebra::{Isometry3, Point3, Vector3};
use std::io::{BufWriter, Write};

/// Unordered set of surface points with normals (and optionally colors)
///
/// Points and normals are in the world frame; `normals[i]` and `colors[i]`
/// belong to `points[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    /// Surface points
    pub points: Vec<Point3<f32>>,
    /// Unit normals, estimated from the field's gradient
    pub normals: Vec<Vector3<f32>>,
    /// Per-point RGB in `[0, 255]`, present only for volumes that track color
    pub colors: Option<Vec<[f32; 3]>>,
}

impl PointCloud {
    /// Returns the number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Checks whether the cloud has no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Writes a binary PLY to the given output
    ///
    /// Each vertex carries a position and normal as `float` properties, plus
    /// `uchar` colors if the cloud has them.  Returns [`Error::BadCloud`]
    /// (without writing anything) if the channels differ in length.
    pub fn write_ply<F: std::io::Write>(
        &self,
        out: &mut F,
    ) -> Result<(), Error> {
        let colors = self.colors.as_ref().map(|c| c.len());
        if self.normals.len() != self.len()
            || colors.is_some_and(|c| c != self.len())
        {
            return Err(Error::BadCloud(
                self.len(),
                self.normals.len(),
                colors,
            ));
        }
        let mut out = BufWriter::new(out);
        writeln!(out, "ply")?;
        writeln!(out, "format binary_little_endian 1.0")?;
        writeln!(out, "comment exported by tsdf")?;
        writeln!(out, "element vertex {}", self.len())?;
        for p in ["x", "y", "z", "nx", "ny", "nz"] {
            writeln!(out, "property float {p}")?;
        }
        if self.colors.is_some() {
            for p in ["red", "green", "blue"] {
                writeln!(out, "property uchar {p}")?;
            }
        }
        writeln!(out, "end_header")?;

        for (i, (p, n)) in self.points.iter().zip(&self.normals).enumerate() {
            for v in p.iter().chain(n.iter()) {
                out.write_all(&v.to_le_bytes())?;
            }
            if let Some(colors) = &self.colors {
                let rgb = colors[i].map(|c| c.round().clamp(0.0, 255.0) as u8);
                out.write_all(&rgb)?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// Surface sample in voxel units of the volume frame
struct Crossing {
    g: Point3<f32>,
    normal: Vector3<f32>,
    rgb: Option<[f32; 3]>,
}

/// Finds zero crossings on the `+x`, `+y`, and `+z` edges leaving each
/// observed voxel in a region
fn scan<F: VoxelField>(field: &F, region: &Region) -> Vec<Crossing> {
    let mut out = vec![];
    for ijk in region.iter() {
        let Some(v0) = field.observed(ijk) else {
            continue;
        };
        let f0 = v0.tsdf();
        for axis in 0..3 {
            let mut e = Vector3::zeros();
            e[axis] = 1;
            let Some(v1) = field.observed(ijk + e) else {
                continue;
            };
            let f1 = v1.tsdf();
            if (f0 > 0.0) == (f1 > 0.0) {
                continue;
            }
            let t = f0 / (f0 - f1);
            let g = Point3::from(ijk.cast::<f32>() + e.cast::<f32>() * t);
            let Some(normal) = normal_at(field, &g) else {
                continue;
            };
            let rgb = v0.rgb().zip(v1.rgb()).map(|(a, b)| {
                std::array::from_fn(|c| a[c] + (b[c] - a[c]) * t)
            });
            out.push(Crossing { g, normal, rgb });
        }
    }
    out
}

/// Extracts every zero crossing in the field
pub(crate) fn fetch<F: VoxelField>(
    field: &F,
    voxel_size: f32,
    vol_to_world: &Isometry3<f32>,
    threads: Option<&ThreadPool>,
) -> PointCloud {
    let regions = field.regions();
    let found = map_range(threads, regions.len(), |i| scan(field, &regions[i]));

    let n = found.iter().map(|r| r.len()).sum();
    let mut out = PointCloud {
        points: Vec::with_capacity(n),
        normals: Vec::with_capacity(n),
        colors: F::Voxel::HAS_COLOR.then(|| Vec::with_capacity(n)),
    };
    for c in found.into_iter().flatten() {
        out.points.push(vol_to_world * Point3::from(c.g.coords * voxel_size));
        out.normals.push(vol_to_world.rotation * c.normal);
        if let (Some(colors), Some(rgb)) = (out.colors.as_mut(), c.rgb) {
            colors.push(rgb);
        }
    }
    out
}

/// Evaluates the field's normal at arbitrary world-frame points
///
/// Points where the normal is undefined (or which are themselves NaN) get a
/// NaN normal.
pub(crate) fn fetch_normals<F: VoxelField>(
    field: &F,
    points: &[Point3<f32>],
    voxel_size: f32,
    vol_to_world: &Isometry3<f32>,
    threads: Option<&ThreadPool>,
) -> Vec<Vector3<f32>> {
    let world_to_vol = vol_to_world.inverse();
    let scale = 1.0 / voxel_size;
    map_range(threads, points.len(), |i| {
        let g = (world_to_vol * points[i]) * scale;
        normal_at(field, &g)
            .map(|n| vol_to_world.rotation * n)
            .unwrap_or_else(|| Vector3::repeat(f32::NAN))
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        store::DenseGrid,
        voxel::{ColorVoxel, Voxel},
    };
    use approx::assert_relative_eq;

    /// 8³ grid with a plane at `x = 3.25` voxels
    fn plane() -> DenseGrid<ColorVoxel> {
        let mut grid = DenseGrid::<ColorVoxel>::new(Vector3::repeat(8));
        for x in 0..8 {
            for y in 0..8 {
                for z in 0..8 {
                    let v = grid.voxel_mut(Vector3::new(x, y, z)).unwrap();
                    v.tsdf = (3.25 - x as f32) / 4.0;
                    v.weight = 1;
                    v.rgb = [x as f32 * 10.0, 0.0, 255.0];
                }
            }
        }
        grid
    }

    #[test]
    fn plane_crossings() {
        let grid = plane();
        let pose = Isometry3::translation(1.0, 0.0, 0.0);
        let cloud = fetch(&grid, 0.5, &pose, None);

        // Normals are only defined away from the y / z faces of the grid
        assert_eq!(cloud.len(), 5 * 5);
        let colors = cloud.colors.as_ref().unwrap();
        for ((p, n), c) in cloud.points.iter().zip(&cloud.normals).zip(colors)
        {
            assert_relative_eq!(p.x, 1.0 + 3.25 * 0.5, epsilon = 1e-5);
            assert_relative_eq!(*n, -Vector3::x(), epsilon = 1e-5);
            assert_relative_eq!(c[0], 32.5, epsilon = 1e-4);
        }

        let par = fetch(&grid, 0.5, &pose, Some(&ThreadPool::Global));
        assert_eq!(cloud, par);

        let normals = fetch_normals(
            &grid,
            &[cloud.points[0], Point3::new(f32::NAN, 0.0, 0.0)],
            0.5,
            &pose,
            None,
        );
        assert_relative_eq!(normals[0], cloud.normals[0], epsilon = 1e-6);
        assert!(normals[1].iter().all(|c| c.is_nan()));
    }

    #[test]
    fn unobserved_grid_is_empty() {
        let grid = DenseGrid::<Voxel>::new(Vector3::repeat(4));
        let cloud = fetch(&grid, 0.1, &Isometry3::identity(), None);
        assert!(cloud.is_empty());
        assert!(cloud.colors.is_none());
    }

    #[test]
    fn ply_header() {
        let cloud = PointCloud {
            points: vec![Point3::new(1.0, 2.0, 3.0)],
            normals: vec![Vector3::z()],
            colors: Some(vec![[255.0, 0.5, 300.0]]),
        };
        let mut out = vec![];
        cloud.write_ply(&mut out).unwrap();
        let header = b"end_header\n";
        let end = out
            .windows(header.len())
            .position(|w| w == header)
            .unwrap()
            + header.len();
        let text = std::str::from_utf8(&out[..end]).unwrap();
        assert!(text.contains("element vertex 1\n"));
        assert!(text.contains("property uchar red\n"));
        assert_eq!(out.len() - end, 6 * 4 + 3);
        assert_eq!(&out[end..end + 4], &1f32.to_le_bytes());
        assert_eq!(&out[out.len() - 3..], &[255, 1, 255]);
    }

    #[test]
    fn ply_rejects_mismatched_channels() {
        let points = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let short_normals = PointCloud {
            points: points.clone(),
            normals: vec![Vector3::z()],
            colors: None,
        };
        let mut out = vec![];
        assert!(matches!(
            short_normals.write_ply(&mut out),
            Err(Error::BadCloud(2, 1, None))
        ));
        assert!(out.is_empty());

        let short_colors = PointCloud {
            points,
            normals: vec![Vector3::z(); 2],
            colors: Some(vec![[0.0; 3]]),
        };
        assert!(matches!(
            short_colors.write_ply(&mut out),
            Err(Error::BadCloud(2, 2, Some(1)))
        ));
        assert!(out.is_empty());
    }
}
