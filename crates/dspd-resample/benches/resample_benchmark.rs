use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dspd_resample::{ChannelMixer, LinearResampler, Quality, Resampler};

fn bench_linear_resample(c: &mut Criterion) {
    let mut r = LinearResampler::new(Quality::Low, 2).unwrap();
    r.set_rates(44_100, 48_000).unwrap();
    let input = vec![0.0f32; 1024 * 2];
    let mut output = vec![0.0f32; 1536 * 2];

    c.bench_function("linear_resample_1024_frames", |b| {
        b.iter(|| {
            r.reset();
            r.process(black_box(true), black_box(&input), black_box(&mut output))
                .unwrap()
        })
    });
}

fn bench_channel_mix(c: &mut Criterion) {
    let mixer = ChannelMixer::simple(2);
    let src = vec![0.1f32; 1024 * 2];
    let mut dst = vec![0.0f32; 1024 * 2];

    c.bench_function("simple_mix_1024_frames", |b| {
        b.iter(|| {
            dst.iter_mut().for_each(|s| *s = 0.0);
            mixer.mix_playback(black_box(&src), black_box(&mut dst), black_box(1.0))
        })
    });
}

criterion_group!(benches, bench_linear_resample, bench_channel_mix);
criterion_main!(benches);
