use criterion::{
    BenchmarkId, Criterion, black_box, criterion_group, criterion_main,
};
use nalgebra::{Isometry3, Point3};
use strum::IntoEnumIterator;
use tsdf::{Volume, VolumeKind, VolumeSettings, scene::Scene};

/// Camera poses on a circle around the preset scene
fn poses() -> Vec<Isometry3<f32>> {
    Scene::orbit(&Point3::new(0.0, 0.0, 2.0), 1.2, 0.3, 8)
}

pub fn integrate(c: &mut Criterion) {
    let scene = Scene::spheres_on_plane();
    let settings = VolumeSettings::default();
    let frames: Vec<_> = poses()
        .into_iter()
        .map(|pose| {
            let depth = scene.render_depth(
                &pose,
                &settings.depth_intrinsics,
                settings.frame_size,
                settings.threads.as_ref(),
            );
            let color = scene.render_color(
                &pose,
                &settings.color_intrinsics,
                settings.frame_size,
                settings.threads.as_ref(),
            );
            (pose, depth, color)
        })
        .collect();

    let mut group = c.benchmark_group("integrate (640 x 480, 8 frames)");
    for kind in VolumeKind::iter() {
        group.bench_function(BenchmarkId::new("kind", kind), |b| {
            b.iter(|| {
                let mut vol =
                    Volume::new(VolumeSettings::new(kind)).unwrap();
                for (pose, depth, color) in &frames {
                    vol.integrate_color(depth, color, pose).unwrap();
                }
                black_box(vol)
            })
        });
    }
}

pub fn raycast(c: &mut Criterion) {
    let scene = Scene::spheres_on_plane();
    let mut group = c.benchmark_group("raycast (640 x 480)");
    for kind in VolumeKind::iter() {
        let settings = VolumeSettings::new(kind);
        let mut vol = Volume::new(settings.clone()).unwrap();
        for pose in poses() {
            let depth = scene.render_depth(
                &pose,
                &settings.depth_intrinsics,
                settings.frame_size,
                settings.threads.as_ref(),
            );
            let color = scene.render_color(
                &pose,
                &settings.color_intrinsics,
                settings.frame_size,
                settings.threads.as_ref(),
            );
            vol.integrate_color(&depth, &color, &pose).unwrap();
        }
        let pose = poses()[0];
        group.bench_function(BenchmarkId::new("kind", kind), |b| {
            b.iter(|| black_box(vol.raycast(&pose)))
        });
    }
}

pub fn fetch(c: &mut Criterion) {
    let scene = Scene::spheres_on_plane();
    let settings = VolumeSettings::default();
    let pose = Isometry3::identity();
    let depth = scene.render_depth(
        &pose,
        &settings.depth_intrinsics,
        settings.frame_size,
        None,
    );
    let mut vol = Volume::new(settings).unwrap();
    vol.integrate(&depth, &pose).unwrap();
    c.bench_function("fetch points and normals", |b| {
        b.iter(|| black_box(vol.fetch_points_normals()))
    });
}

criterion_group!(benches, integrate, raycast, fetch);
criterion_main!(benches);
