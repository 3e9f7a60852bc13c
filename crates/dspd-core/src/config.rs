//! Stream and device configuration (§3, ambient config-layer per
//! SPEC_FULL.md — serde-serializable so `dspd-demo` can load it from
//! JSON the way the teacher's `settings.rs` loaded its device config).

use serde::{Deserialize, Serialize};

use dspd_backend::Errno;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamParams {
    pub channels: u16,
    pub rate: u32,
    pub bufsize_frames: u32,
    pub fragsize_frames: u32,
    pub min_latency: u32,
    pub max_latency: u32,
    pub requested_latency: u32,
}

impl StreamParams {
    pub fn validate(&self) -> Result<(), Errno> {
        if self.channels == 0 {
            return Err(Errno::EINVAL);
        }
        if !(1_000..=384_000).contains(&self.rate) {
            return Err(Errno::EINVAL);
        }
        if self.fragsize_frames == 0 || self.fragsize_frames > self.bufsize_frames {
            return Err(Errno::EINVAL);
        }
        if !(self.min_latency <= self.requested_latency
            && self.requested_latency <= self.bufsize_frames
            && self.bufsize_frames <= self.max_latency)
        {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

/// Glitch-correction policy (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlitchPolicy {
    Off,
    On,
    Latch,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleQualityConfig {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub glitch_policy: GlitchPolicy,
    pub glitch_threshold_frames: u32,
    pub resample_quality: ResampleQualityConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            glitch_policy: GlitchPolicy::Auto,
            glitch_threshold_frames: 480,
            resample_quality: ResampleQualityConfig::Medium,
        }
    }
}
