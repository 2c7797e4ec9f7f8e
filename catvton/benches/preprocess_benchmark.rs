use catvton::{noise, utils};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use image::{Rgb, RgbImage};

fn create_test_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// Benchmark suite for try-on preprocessing at the default working resolution
pub fn preprocess_benchmarks(c: &mut Criterion) {
    let person = create_test_image(1200, 1600);
    let cloth = create_test_image(900, 900);
    let size = (768, 1024);

    let mut group = c.benchmark_group("preprocess");
    group.throughput(Throughput::Elements(1));

    group.bench_function("resize_and_crop", |b| {
        b.iter(|| black_box(utils::resize_and_crop(&person, size)));
    });

    group.bench_function("resize_and_padding", |b| {
        b.iter(|| black_box(utils::resize_and_padding(&cloth, size)));
    });

    let panels = vec![create_test_image(768, 1024); 4];
    group.bench_function("image_grid_1x4", |b| {
        b.iter(|| black_box(utils::image_grid(&panels, 1, 4)));
    });

    group.bench_function("initial_latents", |b| {
        b.iter(|| black_box(noise::randn((1, 4, 256, 96), Some(42))));
    });

    group.finish();
}

criterion_group!(benches, preprocess_benchmarks);
criterion_main!(benches);
