use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use filters::{FilterKind, PixelBuffer};

/// Gradient test image
fn create_test_image(width: u32, height: u32) -> PixelBuffer {
    let mut pixels = vec![0u8; (width * height * 3) as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            pixels[idx] = (x % 256) as u8;
            pixels[idx + 1] = (y % 256) as u8;
            pixels[idx + 2] = ((x + y) % 256) as u8;
        }
    }
    PixelBuffer::new(width, height, 3, pixels).unwrap()
}

fn benchmark_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("filters");
    let resolutions = [(640, 480), (1920, 1080)];

    for (width, height) in resolutions.iter() {
        let image = create_test_image(*width, *height);
        for kind in FilterKind::ALL {
            group.bench_with_input(
                BenchmarkId::new(kind.name(), format!("{}x{}", width, height)),
                &image,
                |b, image| {
                    b.iter(|| black_box(kind.apply(black_box(image))));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_filters);
criterion_main!(benches);
