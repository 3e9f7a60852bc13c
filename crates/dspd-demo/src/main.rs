//! Runnable demo: a single `NullBackend` playback device with two
//! clients writing at different sample rates, driven through a handful
//! of scheduler cycles with the simulated hardware clock advanced by
//! hand (there's no real sound card backing this).

use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dspd_backend::{ChannelMap, ChannelPosition, DeviceParams, Direction as BackendDirection, NullBackend, SampleFormat};
use dspd_core::{Client, ClientStream, Device, DeviceConfig, Direction, Scheduler, StreamParams};
use dspd_resample::{ChannelMixer, LinearResampler, Quality, Resampler};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DemoSettings {
    #[serde(default = "default_cycles")]
    cycles: u32,
}

fn default_cycles() -> u32 {
    8
}

fn load_settings(path: Option<&str>) -> anyhow::Result<DemoSettings> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading {p}"))?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(DemoSettings { cycles: default_cycles() }),
    }
}

fn device_params() -> DeviceParams {
    DeviceParams {
        format: SampleFormat::F32,
        channels: 2,
        rate: 48_000,
        bufsize_frames: 4096,
        fragsize_frames: 1024,
        direction: BackendDirection::Playback,
        min_latency: 64,
        max_latency: 4096,
        min_dma: 32,
        name: "demo0".into(),
        description: "dspd-demo synthetic device".into(),
        bus: "virtual".into(),
        address: "null:0".into(),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1);
    let settings = load_settings(config_path.as_deref())?;

    let backend = NullBackend::new(device_params())?.with_chmap(ChannelMap {
        positions: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight],
    });

    let device = Device::new("demo0", Some(Box::new(backend)), None, DeviceConfig::default());
    let mut scheduler = Scheduler::new(device);
    scheduler.device_mut().negotiate_latency(Direction::Playback)?;

    // Client A: matched rate, direct passthrough.
    let params_a = StreamParams {
        channels: 2,
        rate: 48_000,
        bufsize_frames: 8192,
        fragsize_frames: 1024,
        min_latency: 256,
        max_latency: 8192,
        requested_latency: 512,
    };
    let (mut stream_a, mut handle_a) = ClientStream::new(params_a, Direction::Playback);
    stream_a.install_mixer(ChannelMixer::simple(2));
    let mut client_a = Client::new("client-a");
    client_a.playback = Some(stream_a);
    client_a.trigger_playback = true;

    // Client B: 44.1kHz, needs resampling up to the device's 48kHz.
    let params_b = StreamParams {
        channels: 2,
        rate: 44_100,
        bufsize_frames: 8192,
        fragsize_frames: 1024,
        min_latency: 256,
        max_latency: 8192,
        requested_latency: 512,
    };
    let (mut stream_b, mut handle_b) = ClientStream::new(params_b, Direction::Playback);
    let mut resampler = LinearResampler::new(Quality::Low, 2)?;
    resampler.set_rates(44_100, 48_000)?;
    stream_b.install_resampler(Box::new(resampler));
    stream_b.install_mixer(ChannelMixer::simple(2));
    let mut client_b = Client::new("client-b");
    client_b.playback = Some(stream_b);
    client_b.trigger_playback = true;

    let id_a = scheduler.device_mut().attach(client_a)?;
    let id_b = scheduler.device_mut().attach(client_b)?;
    info!(?id_a, ?id_b, "clients attached");

    let tone: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.01).sin() * 0.2).collect();
    handle_a.write(&tone)?;
    handle_b.write(&tone)?;

    for cycle in 0..settings.cycles {
        let committed = scheduler.run_once()?;
        info!(cycle, committed, "scheduler cycle complete");
        std::thread::sleep(Duration::from_millis(1));
    }

    let status_a = handle_a.status();
    info!(fill = status_a.fill, "client A final status");

    Ok(())
}
