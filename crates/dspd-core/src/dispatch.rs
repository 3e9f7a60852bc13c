//! Request dispatch contract (§4.11).
//!
//! Requests carry a small flags word describing how they arrived (local
//! call vs. a remote transport, whether ancillary fds/credentials rode
//! along) plus a target index. Handlers declare their buffer-size and
//! flag requirements up front so a malformed request is rejected with
//! `EINVAL` before it touches engine state, rather than failing partway
//! through (§7 "protocol errors ... without side effects").

use dspd_backend::{Errno, PcmBackend};

pub mod flags {
    pub const LOCAL: u32 = 0;
    pub const REMOTE: u32 = 1 << 0;
    pub const CMSG_FD: u32 = 1 << 1;
    pub const CMSG_CRED: u32 = 1 << 2;
    pub const UNIX_IOCTL: u32 = 1 << 3;
    pub const UNIX_FAST_IOCTL: u32 = 1 << 4;
}

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub flags: u32,
    pub target_index: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerSpec {
    pub required_inbuf_size: usize,
    pub required_outbuf_size: usize,
    pub excluded_flags: u32,
    pub required_flags: u32,
}

impl HandlerSpec {
    pub fn validate(&self, ctx: RequestContext, inbuf_len: usize, outbuf_len: usize) -> Result<(), Errno> {
        if inbuf_len < self.required_inbuf_size || outbuf_len < self.required_outbuf_size {
            return Err(Errno::EINVAL);
        }
        if ctx.flags & self.excluded_flags != 0 {
            return Err(Errno::EINVAL);
        }
        if ctx.flags & self.required_flags != self.required_flags {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

/// §4.11: requests this dispatcher doesn't recognize fall through to the
/// back-end's own ioctl dispatcher rather than failing outright.
pub fn dispatch_unknown(
    backend: &mut dyn PcmBackend,
    req: u32,
    input: &[u8],
    output: &mut [u8],
) -> Result<i32, Errno> {
    backend.ioctl(req, input, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undersized_buffer_is_rejected() {
        let spec = HandlerSpec { required_inbuf_size: 8, ..Default::default() };
        let ctx = RequestContext { flags: flags::LOCAL, target_index: 0 };
        assert_eq!(spec.validate(ctx, 4, 0).unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn excluded_flag_is_rejected() {
        let spec = HandlerSpec { excluded_flags: flags::REMOTE, ..Default::default() };
        let ctx = RequestContext { flags: flags::REMOTE, target_index: 0 };
        assert_eq!(spec.validate(ctx, 0, 0).unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn required_flag_missing_is_rejected() {
        let spec = HandlerSpec { required_flags: flags::CMSG_FD, ..Default::default() };
        let ctx = RequestContext { flags: flags::LOCAL, target_index: 0 };
        assert_eq!(spec.validate(ctx, 0, 0).unwrap_err(), Errno::EINVAL);
    }

    #[test]
    fn valid_request_passes() {
        let spec = HandlerSpec { required_inbuf_size: 4, ..Default::default() };
        let ctx = RequestContext { flags: flags::LOCAL, target_index: 0 };
        assert!(spec.validate(ctx, 4, 0).is_ok());
    }
}
