//! Host error codes used by the PCM back-end interface (§6).
//!
//! The back-end contract is specified in terms of "the host's standard error
//! codes" rather than a typed Rust error enum — `status()`, `rewind()`, and
//! friends all return a signed frame count or a negative errno. `Errno` is
//! the seam between that C-flavored contract and the rest of the crate's
//! `thiserror` types.

use std::fmt;

/// A negative host error code, or the sentinel for "no error".
///
/// Values match the POSIX/Linux errno numbers the original back-ends
/// (ALSA, in the system this spec was distilled from) actually return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Errno = Errno(-1);
    pub const ENOENT: Errno = Errno(-2);
    pub const EIO: Errno = Errno(-5);
    pub const EAGAIN: Errno = Errno(-11);
    pub const ENOMEM: Errno = Errno(-12);
    pub const EFAULT: Errno = Errno(-14);
    pub const EBUSY: Errno = Errno(-16);
    pub const EINVAL: Errno = Errno(-22);
    pub const ENOSPC: Errno = Errno(-28);
    pub const EPIPE: Errno = Errno(-32);
    pub const ENOSYS: Errno = Errno(-38);
    pub const ENODEV: Errno = Errno(-19);
    pub const ETIME: Errno = Errno(-62);
    /// ALSA's name for "stream is suspended, call `resume`".
    pub const ESTRPIPE: Errno = Errno(-86);

    pub fn name(self) -> &'static str {
        match self {
            Errno::EPERM => "EPERM",
            Errno::ENOENT => "ENOENT",
            Errno::EIO => "EIO",
            Errno::EAGAIN => "EAGAIN",
            Errno::ENOMEM => "ENOMEM",
            Errno::EFAULT => "EFAULT",
            Errno::EBUSY => "EBUSY",
            Errno::EINVAL => "EINVAL",
            Errno::ENOSPC => "ENOSPC",
            Errno::EPIPE => "EPIPE",
            Errno::ENOSYS => "ENOSYS",
            Errno::ENODEV => "ENODEV",
            Errno::ETIME => "ETIME",
            Errno::ESTRPIPE => "ESTRPIPE",
            _ => "EUNKNOWN",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

impl std::error::Error for Errno {}

pub type BResult<T> = Result<T, Errno>;
