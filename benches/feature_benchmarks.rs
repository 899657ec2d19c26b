use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use emotion_cli::audio::{resample_clip, AudioResampler, Waveform};
use emotion_cli::features::mel::create_mel_filterbank;
use emotion_cli::features::{MfccConfig, MfccExtractor};

fn speech_like(sample_rate: u32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let f1 = (2.0 * std::f32::consts::PI * 200.0 * t).sin() * 0.3;
            let f2 = (2.0 * std::f32::consts::PI * 500.0 * t).sin() * 0.2;
            let f3 = (2.0 * std::f32::consts::PI * 1500.0 * t).sin() * 0.1;
            f1 + f2 + f3
        })
        .collect()
}

fn benchmark_mfcc_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("MFCC extraction");
    group.sample_size(20);

    for seconds in [1usize, 5].iter() {
        let waveform = Waveform::new(speech_like(44100, seconds * 44100), 44100);
        let extractor = MfccExtractor::new(MfccConfig::default(), 44100).unwrap();

        group.bench_with_input(BenchmarkId::new("44100Hz_seconds", seconds), &waveform, |b, waveform| {
            b.iter(|| {
                let _ = black_box(extractor.extract(black_box(waveform)));
            });
        });
    }

    group.finish();
}

fn benchmark_extractor_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("Extractor setup");

    group.bench_function("mel_filterbank_128", |b| {
        b.iter(|| black_box(create_mel_filterbank(128, 2048, 44100, 0.0, 22050.0)));
    });

    group.bench_function("mfcc_extractor_new", |b| {
        b.iter(|| black_box(MfccExtractor::new(MfccConfig::default(), 44100)));
    });

    group.finish();
}

fn benchmark_resampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resampler");

    group.bench_function("chunk_48k_to_44k", |b| {
        let mut resampler = AudioResampler::new(48000, 44100).unwrap();
        let input = vec![0.0f32; resampler.input_frames_next()];
        b.iter(|| {
            let _ = black_box(resampler.process(black_box(&input)));
        });
    });

    let clip = speech_like(48000, 48000);
    group.bench_function("clip_1s_48k_to_44k", |b| {
        b.iter(|| {
            let _ = black_box(resample_clip(black_box(&clip), 48000, 44100));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_mfcc_extraction,
    benchmark_extractor_setup,
    benchmark_resampling,
);
criterion_main!(benches);
