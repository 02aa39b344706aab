use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use image::RgbImage;
use nalgebra::{Matrix2, Vector2};
use rand::Rng;
use skygrid::{
    ConstellationGeometry, ConstellationLine, CoordinateProjector, GridOverlayBuilder,
    SceneComposer, Wcs,
};

const WIDTH: u32 = 4000;
const HEIGHT: u32 = 3000;

fn solution() -> Wcs {
    let mut rng = rand::rng();
    let angle: f64 = rng.random_range(0.0..std::f64::consts::TAU);
    let scale = 20. / 3600.;
    Wcs::new(
        Vector2::new(WIDTH as f64 / 2., HEIGHT as f64 / 2.),
        Vector2::new(rng.random_range(0.0..360.), rng.random_range(-60.0..60.)),
        Matrix2::new(
            -scale * angle.cos(),
            scale * angle.sin(),
            scale * angle.sin(),
            scale * angle.cos(),
        ),
    )
    .unwrap()
}

/// Random chains scattered over the whole sky, roughly the size of the real catalog.
fn constellations() -> ConstellationGeometry {
    let mut rng = rand::rng();
    let lines = (0..700)
        .map(|i| {
            let mut vertex: [f64; 2] = [rng.random_range(0.0..360.), rng.random_range(-85.0..85.)];
            let vertices = (0..rng.random_range(2..6))
                .map(|_| {
                    vertex[0] += rng.random_range(-5.0..5.);
                    vertex[1] = (vertex[1] + rng.random_range(-5.0..5.)).clamp(-89., 89.);
                    vertex
                })
                .collect();
            ConstellationLine {
                name: format!("C{}", i / 8),
                vertices,
            }
        })
        .collect();
    ConstellationGeometry::new(lines)
}

fn overlay_benchmark(c: &mut Criterion) {
    let mut overlay = c.benchmark_group("overlay");
    overlay.sample_size(20);

    let wcs = solution();
    let geometry = constellations();
    let projector = CoordinateProjector::new(&wcs);
    overlay.bench_function("build camera frame", |b| {
        b.iter(|| GridOverlayBuilder::new(&projector, WIDTH as f64, HEIGHT as f64).build(&geometry))
    });

    let (native, width, height) = wcs.north_up(WIDTH, HEIGHT).unwrap();
    let projector = CoordinateProjector::new(&native);
    overlay.bench_function("build native frame", |b| {
        b.iter(|| GridOverlayBuilder::new(&projector, width as f64, height as f64).build(&geometry))
    });
}

fn render_benchmark(c: &mut Criterion) {
    let mut render = c.benchmark_group("render");
    render.sample_size(10);

    let wcs = solution();
    let geometry = constellations();
    let photograph = RgbImage::new(WIDTH, HEIGHT);
    let composer = SceneComposer::new(&photograph, &wcs, &geometry);

    render.bench_function("camera view", |b| {
        b.iter_batched(|| (), |_| composer.render_camera_view(), BatchSize::LargeInput)
    });
    render.bench_function("sky view", |b| {
        b.iter_batched(|| (), |_| composer.render_sky_view(), BatchSize::LargeInput)
    });
}

criterion_group!(benches, overlay_benchmark, render_benchmark);
criterion_main!(benches);
