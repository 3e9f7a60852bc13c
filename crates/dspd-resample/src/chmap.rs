//! Channel-map mixer (C4, §4.4).
//!
//! Three specializations, resolved once when a channel map is installed
//! rather than dispatched per-sample: `Simple` identity-maps contiguous
//! channels, `Multi` expands one channel into several (e.g. mono → stereo),
//! and `General` applies an arbitrary mixing matrix. All three reduce to
//! the same matrix-multiply shape at `apply`/`apply_capture` time; the
//! specialization only changes how the matrix was derived.

use dspd_backend::{ChannelMap, ChannelPosition};

/// A `client_channels × device_channels` mixing matrix, row-major by client
/// channel. `M[i][j]` is the playback gain applied from client channel `i`
/// into device channel `j`; capture uses the transpose.
#[derive(Debug, Clone)]
pub struct MixMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl MixMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.data[r * self.cols + c] = v;
    }

    /// Identity mapping of the first `min(rows, cols)` channels onto
    /// themselves, unity gain. Grounds the *simple* specialization.
    pub fn identity(rows: usize, cols: usize) -> Self {
        let mut m = Self::zeros(rows, cols);
        for i in 0..rows.min(cols) {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Expand channel 0 (mono) into every device channel at unity gain.
    /// Grounds the *multi* specialization.
    pub fn mono_expand(cols: usize) -> Self {
        let mut m = Self::zeros(1, cols);
        for c in 0..cols {
            m.set(0, c, 1.0);
        }
        m
    }

    /// Derive a matrix from enumerated channel positions against a device's
    /// channel map, per §4.4 ("if only enumerated, a matrix is derived
    /// against the device's channel map"). Unmatched client channels are
    /// dropped (left at zero gain); unmatched device channels are silent.
    pub fn from_positions(client: &[ChannelPosition], device: &ChannelMap) -> Self {
        let mut m = Self::zeros(client.len(), device.positions.len());
        for (i, cpos) in client.iter().enumerate() {
            if let Some(j) = device.positions.iter().position(|d| d == cpos) {
                m.set(i, j, 1.0);
            }
        }
        m
    }
}

/// Which specialization produced a `ChannelMixer`'s matrix. Carried only for
/// diagnostics/logging; `apply`/`apply_capture` don't branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixKind {
    Simple,
    Multi,
    General,
}

pub struct ChannelMixer {
    kind: MixKind,
    matrix: MixMatrix,
}

impl ChannelMixer {
    pub fn simple(channels: usize) -> Self {
        Self { kind: MixKind::Simple, matrix: MixMatrix::identity(channels, channels) }
    }

    pub fn mono_to_multi(device_channels: usize) -> Self {
        Self { kind: MixKind::Multi, matrix: MixMatrix::mono_expand(device_channels) }
    }

    pub fn general(matrix: MixMatrix) -> Self {
        Self { kind: MixKind::General, matrix }
    }

    pub fn from_enumerated(client: &[ChannelPosition], device: &ChannelMap) -> Self {
        Self { kind: MixKind::General, matrix: MixMatrix::from_positions(client, device) }
    }

    pub fn kind(&self) -> MixKind {
        self.kind
    }

    /// Playback direction: `dst[j] += src[i] * volume * M[i][j]` for every
    /// frame, accumulating into the device's (wider, double-precision in
    /// the original design; `f32` here, see DESIGN.md) mix accumulator.
    pub fn mix_playback(&self, src: &[f32], dst: &mut [f32], volume: f32) {
        let rows = self.matrix.rows;
        let cols = self.matrix.cols;
        debug_assert_eq!(src.len() % rows, 0);
        debug_assert_eq!(dst.len() % cols, 0);
        let frames = src.len() / rows;
        for f in 0..frames {
            for j in 0..cols {
                let mut acc = 0.0f32;
                for i in 0..rows {
                    acc += src[f * rows + i] * self.matrix.get(i, j);
                }
                dst[f * cols + j] += acc * volume;
            }
        }
    }

    /// Capture direction: `dst[i] = src[j] * volume * M'[i][j]` (transpose
    /// of the playback matrix), overwriting rather than accumulating since
    /// each client has its own private capture buffer.
    pub fn mix_capture(&self, src: &[f32], dst: &mut [f32], volume: f32) {
        let rows = self.matrix.rows;
        let cols = self.matrix.cols;
        debug_assert_eq!(src.len() % cols, 0);
        debug_assert_eq!(dst.len() % rows, 0);
        let frames = src.len() / cols;
        for f in 0..frames {
            for i in 0..rows {
                let mut acc = 0.0f32;
                for j in 0..cols {
                    acc += src[f * cols + j] * self.matrix.get(i, j);
                }
                dst[f * rows + i] = acc * volume;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_identity_passes_through_with_volume() {
        let mixer = ChannelMixer::simple(2);
        let src = [0.5f32, -0.25];
        let mut dst = [0.0f32, 0.0];
        mixer.mix_playback(&src, &mut dst, 0.5);
        assert!((dst[0] - 0.25).abs() < 1e-6);
        assert!((dst[1] + 0.125).abs() < 1e-6);
    }

    #[test]
    fn mono_expand_duplicates_to_all_channels() {
        let mixer = ChannelMixer::mono_to_multi(4);
        let src = [1.0f32];
        let mut dst = [0.0f32; 4];
        mixer.mix_playback(&src, &mut dst, 1.0);
        assert_eq!(dst, [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn playback_accumulates_onto_existing_content() {
        let mixer = ChannelMixer::simple(1);
        let src = [0.5f32];
        let mut dst = [0.25f32];
        mixer.mix_playback(&src, &mut dst, 1.0);
        assert!((dst[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn capture_transposes_matrix() {
        let device = ChannelMap {
            positions: vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight],
        };
        let client = vec![ChannelPosition::FrontRight, ChannelPosition::FrontLeft];
        let mixer = ChannelMixer::from_enumerated(&client, &device);
        let src = [1.0f32, 2.0]; // device order: L=1.0, R=2.0
        let mut dst = [0.0f32; 2];
        mixer.mix_capture(&src, &mut dst, 1.0);
        // client[0] wants device R (2.0), client[1] wants device L (1.0)
        assert_eq!(dst, [2.0, 1.0]);
    }
}
