//! Per-stream resampler wrapper (C3) and channel-map mixer (C4).
//!
//! Both are pure, allocation-light transforms the device engine in
//! `dspd-core` drives per mix cycle; neither owns a thread or talks to a
//! back-end directly.

mod chmap;
mod error;
mod resampler;

pub use chmap::{ChannelMixer, MixKind, MixMatrix};
pub use error::ResampleError;
pub use resampler::{LinearResampler, Quality, Resampler, RubatoResampler};
