//! Error types for the resampler wrapper and channel-map mixer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("channel count must be nonzero")]
    InvalidChannelCount,

    #[error("buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },

    #[error("channel map has {map_len} entries but device has {device_channels} channels")]
    ChannelMapMismatch { map_len: usize, device_channels: usize },

    #[error("underlying resampler failed: {0}")]
    Backend(String),
}
