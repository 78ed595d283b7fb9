use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use image::{Rgba, RgbaImage};
use imcurate::color::{ColorOptions, ColorSignature, quantize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// 围绕几种基础色加噪声的图片，类似有大面积色块的照片
fn generate_image(width: u32, height: u32) -> RgbaImage {
    let mut rng = StdRng::seed_from_u64(42);
    let bases = [[200u8, 60, 40], [30, 90, 160], [240, 220, 180], [20, 20, 20]];
    RgbaImage::from_fn(width, height, |x, y| {
        let base = bases[((x / 64 + y / 64) as usize) % bases.len()];
        let mut noise = |c: u8| c.saturating_add(rng.random_range(0..24));
        Rgba([noise(base[0]), noise(base[1]), noise(base[2]), 255])
    })
}

fn bench_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("color_signature");
    let image = generate_image(1024, 768);

    for quality in [1, 10, 30] {
        let opts = ColorOptions { palette_size: 5, quality };
        group.bench_with_input(BenchmarkId::new("quality", quality), &opts, |b, opts| {
            b.iter(|| ColorSignature::from_image(black_box(&image), opts))
        });
    }
    group.finish();
}

fn bench_quantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantize");
    let pixels = generate_image(512, 512).pixels().map(|p| [p[0], p[1], p[2]]).collect::<Vec<_>>();

    for colors in [5, 16, 64] {
        group.bench_with_input(BenchmarkId::new("colors", colors), &colors, |b, &colors| {
            b.iter(|| quantize(black_box(&pixels), colors))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_signature, bench_quantize);
criterion_main!(benches);
