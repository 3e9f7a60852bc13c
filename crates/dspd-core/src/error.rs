//! Engine-level error type. Back-end and resampler errors are wrapped
//! transparently so a caller only ever matches on one error enum.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no free attachment slot")]
    NoFreeSlot,

    #[error("unknown client")]
    UnknownClient,

    #[error("unknown device")]
    UnknownDevice,

    #[error("client is already attached to a device")]
    AlreadyAttached,

    #[error("device is exclusively locked by another client")]
    Busy,

    #[error("invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Backend(#[from] dspd_backend::Errno),

    #[error(transparent)]
    Resample(#[from] dspd_resample::ResampleError),

    #[error("sync group not found")]
    GroupNotFound,

    #[error("no free sync group slots")]
    GroupSlotsExhausted,

    #[error("exclusive-lock cookie does not match")]
    InvalidCookie,
}

pub type EngineResult<T> = Result<T, EngineError>;
