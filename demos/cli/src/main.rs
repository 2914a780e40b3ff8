use std::{num::NonZeroUsize, path::PathBuf, time::Instant};

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;
use nalgebra::{Isometry3, Point3, Vector3, Vector4};

use tsdf::{
    ImageSize, RaycastImage, ThreadPool, Volume, VolumeKind, VolumeSettings,
    scene::Scene,
};

/// Fuses a synthetic scene into a TSDF volume, then renders and exports it
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Kind of volume to build
    #[clap(short, long, value_enum, default_value_t = Kind::Dense)]
    kind: Kind,

    /// Number of depth frames, taken on a circle around the scene
    #[clap(short, long, default_value_t = 16)]
    frames: usize,

    /// Amplitude of uniform noise added to each depth frame, in meters
    #[clap(long, default_value_t = 0.0)]
    noise: f32,

    /// Number of threads to use (1 runs everything on the calling thread)
    #[clap(short, long)]
    threads: Option<NonZeroUsize>,

    /// Number of times to repeat the raycast (for benchmarking)
    #[clap(short = 'N', default_value_t = 1)]
    n: usize,

    /// Raycast image width, in pixels
    #[clap(long, default_value_t = 640)]
    width: u32,

    /// Raycast image height, in pixels
    #[clap(long, default_value_t = 480)]
    height: u32,

    /// Name of a `.png` file to write with the shaded raycast
    #[clap(short, long)]
    out: Option<PathBuf>,

    /// Name of a `.ply` file to write with the extracted point cloud
    #[clap(long)]
    cloud: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Dense,
    Hashed,
    Color,
}

impl From<Kind> for VolumeKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Dense => VolumeKind::Tsdf,
            Kind::Hashed => VolumeKind::HashTsdf,
            Kind::Color => VolumeKind::ColorTsdf,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Shades a raycast with a few point lights attached to the camera
///
/// Invalid pixels are left transparent; color volumes tint the shading by
/// their fused color.
fn shade(image: &RaycastImage, view: &Isometry3<f32>) -> Vec<u8> {
    // Light positions in camera space, with intensity in `w`
    let lights = [
        Vector4::new(5.0, -5.0, -10.0, 0.5),
        Vector4::new(-5.0, 0.0, -10.0, 0.15),
        Vector4::new(0.0, -5.0, -10.0, 0.15),
    ]
    .map(|l| (view * Point3::from(l.xyz()), l.w));

    let mut out = Vec::with_capacity(image.points.len() * 4);
    for (i, (p, n)) in
        image.points.iter().zip(image.normals.iter()).enumerate()
    {
        if p[0].is_nan() {
            out.extend([0; 4]);
            continue;
        }
        let p = Point3::from(*p);
        let n = Vector3::from(*n);
        let mut accum = 0.2;
        for (pos, w) in &lights {
            let dir = (pos - p).normalize();
            accum += dir.dot(&n).max(0.0) * w;
        }
        let accum = accum.clamp(0.0, 1.0);
        let rgb = image.colors.as_ref().map_or([255.0; 3], |c| c[i]);
        let [r, g, b] = rgb.map(|c| (c * accum).clamp(0.0, 255.0) as u8);
        out.extend([r, g, b, 255]);
    }
    out
}

fn run(args: &Args) -> Result<()> {
    let threads = match args.threads {
        Some(n) if n.get() == 1 => None,
        Some(n) => Some(ThreadPool::from(
            rayon::ThreadPoolBuilder::new()
                .num_threads(n.get())
                .build()?,
        )),
        None => Some(ThreadPool::Global),
    };
    let settings = VolumeSettings {
        threads,
        ..VolumeSettings::new(args.kind.into())
    };
    let mut volume = Volume::new(settings.clone())?;

    let center = Point3::new(0.0, 0.0, 2.0);
    let poses = Scene::orbit(&center, 1.2, 0.3, args.frames);
    let start = Instant::now();
    for (i, pose) in poses.iter().enumerate() {
        let scene = Scene::spheres_on_plane().with_noise(args.noise, i as u64);
        let depth = scene.render_depth(
            pose,
            &settings.depth_intrinsics,
            settings.frame_size,
            settings.threads.as_ref(),
        );
        let color = scene.render_color(
            pose,
            &settings.color_intrinsics,
            settings.frame_size,
            settings.threads.as_ref(),
        );
        volume.integrate_color(&depth, &color, pose)?;
    }
    info!(
        "Fused {} frames into a {} volume in {:?}",
        volume.frame_count(),
        volume.kind(),
        start.elapsed()
    );
    if volume.kind().is_hashed() {
        info!(
            "{} volume units allocated, {} visible",
            volume.total_volume_units(),
            volume.visible_blocks()
        );
    }

    let size = ImageSize::new(args.width, args.height);
    let view = Isometry3::face_towards(
        &Point3::new(0.8, -0.6, 0.6),
        &center,
        &Vector3::y(),
    );
    let start = Instant::now();
    let mut rendered = None;
    for _ in 0..args.n {
        rendered = Some(volume.raycast_with_size(&view, size)?);
    }
    let Some(rendered) = rendered else {
        bail!("-N must be at least 1");
    };
    info!(
        "Raycast {}x{} image ({} hits) in {:?} per frame",
        args.width,
        args.height,
        rendered.valid_count(),
        start.elapsed() / args.n as u32
    );

    if let Some(path) = &args.out {
        info!("Writing PNG to {path:?}");
        let buffer = shade(&rendered, &view);
        image::save_buffer(
            path,
            &buffer,
            args.width,
            args.height,
            image::ColorType::Rgba8,
        )?;
    }

    if let Some(path) = &args.cloud {
        let start = Instant::now();
        let cloud = if volume.kind().has_color() {
            volume.fetch_points_normals_colors()?
        } else {
            volume.fetch_points_normals()
        };
        info!("Extracted {} points in {:?}", cloud.len(), start.elapsed());
        info!("Writing PLY to {path:?}");
        let mut f = std::fs::File::create(path)?;
        cloud.write_ply(&mut f)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let args = Args::parse();
    run(&args)
}
