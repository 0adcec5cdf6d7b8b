//! Estimator hot-path benchmarks

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use num_complex::Complex;
use tf_estimate::anf::{AnfConfig, AnfTracker};
use tf_estimate::ekf::{EkfConfig, ToneEkf};
use tf_estimate::music::{MusicConfig, MusicEstimator};

fn complex_tone(freq: f64, sample_rate: f64, len: usize) -> Vec<Complex<f64>> {
    (0..len)
        .map(|n| Complex::from_polar(0.5, std::f64::consts::TAU * freq * n as f64 / sample_rate))
        .collect()
}

fn bench_ekf_update(c: &mut Criterion) {
    let samples = complex_tone(2.0, 250.0, 256);

    for tones in [1usize, 2, 4] {
        let mut ekf = ToneEkf::new(EkfConfig::fast(250.0, tones));
        c.bench_function(&format!("ekf_update_m{tones}_256"), |b| {
            b.iter(|| {
                for &y in &samples {
                    ekf.update(black_box(y));
                }
            })
        });
    }
}

fn bench_anf_block(c: &mut Criterion) {
    let input: Vec<f32> = (0..4800)
        .map(|n| (std::f64::consts::TAU * 440.0 * n as f64 / 48_000.0).sin() as f32)
        .collect();
    let mut tracker = AnfTracker::new(AnfConfig::default(), 435.0);

    c.bench_function("anf_block_100ms", |b| {
        b.iter(|| tracker.process_block(black_box(&input)))
    });
}

fn bench_music_refresh_and_grid(c: &mut Criterion) {
    let samples = complex_tone(440.0, 4000.0, 1024);
    let mut music = MusicEstimator::new(MusicConfig::default());

    c.bench_function("music_refresh", |b| {
        b.iter(|| music.refresh(black_box(&samples)))
    });

    music.refresh(&samples);
    c.bench_function("music_grid_200", |b| {
        b.iter(|| music.estimate(black_box(200.0), 1500.0, 4000.0))
    });
}

criterion_group!(
    benches,
    bench_ekf_update,
    bench_anf_block,
    bench_music_refresh_and_grid
);
criterion_main!(benches);
