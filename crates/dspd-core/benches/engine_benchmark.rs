use criterion::{black_box, criterion_group, criterion_main, Criterion};

use dspd_backend::{
    ChannelMap, ChannelPosition, DeviceParams, Direction as BackendDirection, NullBackend,
    PcmBackend, SampleFormat,
};
use dspd_core::{Client, ClientStream, Device, DeviceConfig, Direction, Scheduler, StreamParams};
use dspd_resample::ChannelMixer;

fn build_scheduler() -> Scheduler {
    let params = DeviceParams {
        format: SampleFormat::F32,
        channels: 2,
        rate: 48_000,
        bufsize_frames: 4096,
        fragsize_frames: 1024,
        direction: BackendDirection::Playback,
        min_latency: 64,
        max_latency: 4096,
        min_dma: 32,
        name: "bench0".into(),
        description: "bench device".into(),
        bus: "virtual".into(),
        address: "null:0".into(),
    };
    let mut backend = NullBackend::new(params)
        .unwrap()
        .with_chmap(ChannelMap { positions: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight] });
    backend.prepare().unwrap();
    backend.start().unwrap();

    let device = Device::new("bench0", Some(Box::new(backend)), None, DeviceConfig::default());
    let mut scheduler = Scheduler::new(device);

    let stream_params = StreamParams {
        channels: 2,
        rate: 48_000,
        bufsize_frames: 8192,
        fragsize_frames: 1024,
        min_latency: 64,
        max_latency: 8192,
        requested_latency: 512,
    };
    let (mut stream, mut handle) = ClientStream::new(stream_params, Direction::Playback);
    stream.install_mixer(ChannelMixer::simple(2));
    let mut client = Client::new("bench-client");
    client.playback = Some(stream);
    client.trigger_playback = true;
    scheduler.device_mut().attach(client).unwrap();
    handle.write(&vec![0.1f32; 8192 * 2]).unwrap();
    drop(handle);

    scheduler
}

fn bench_playback_cycle(c: &mut Criterion) {
    let mut scheduler = build_scheduler();
    c.bench_function("device_run_playback_cycle", |b| {
        b.iter(|| {
            black_box(scheduler.device_mut().run_playback_cycle().unwrap());
        })
    });
}

criterion_group!(benches, bench_playback_cycle);
criterion_main!(benches);
