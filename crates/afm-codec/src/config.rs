// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Shared configuration, §4.4 of the design: every constant that must agree
//! between the encoder and the detector because the two processes never
//! otherwise negotiate a handshake.
//!
//! `SIG_SCALES` and `SENSITIVITY` are deliberately *not* `const`: calibration
//! mode produces better values for a given microphone/buzzer pairing, so they
//! are ordinary configuration fields with sensible defaults.

use serde::{Deserialize, Serialize};

/// Samples per analysis frame. Also the real-FFT input size.
pub const FRAME_SAMPLES: usize = 1024;

/// Audio sample rate in Hz. Must match the capture device.
pub const SAMPLING_RATE: u32 = 44_100;

/// Frame rate in Hz, derived from [`FRAME_SAMPLES`] and [`SAMPLING_RATE`].
pub fn frame_rate() -> f64 {
    SAMPLING_RATE as f64 / FRAME_SAMPLES as f64
}

/// Number of symbols per sequence. 3 symbols at base 4 gives 64 levels (6 bits).
pub const SEQUENCE_LENGTH: usize = 3;

/// FFT bin indices carrying the four signal tones, at `FRAME_SAMPLES`/`SAMPLING_RATE`.
///
/// These are configuration, not literals baked into the algorithm: the
/// buzzer's actual quantised pitches drift from board to board (bin 150 vs
/// 151 in particular — see the open question in the design notes), so the
/// exact bin list is expected to be retuned per installation.
pub const SIG_BINS: [usize; 4] = [139, 151, 161, 172];

/// Nominal frequencies (Hz) the buzzer plays closest to the ideal tones that
/// would land exactly on [`SIG_BINS`]. Used only to render/parse the `M300`
/// wire format; detection itself works purely in terms of FFT bin indices.
pub const SIGNAL_FREQS: [u32; 4] = [5988, 6452, 6944, 7407];

/// Sub-harmonic rejection ratio: a candidate symbol is rejected as a lower
/// buzzer tone's harmonic if the bin at half its frequency carries more than
/// this fraction of its own intensity.
pub const HARMONIC_FACTOR: f64 = 1.3;

/// Z height (mm) at which the fan-speed ramp-up reaches full scale.
pub const RAMP_UP_ZMAX: f64 = 4.0;

/// Fan-speed scale factor at `Z = 0`.
pub const RAMP_UP_SCALE0: f64 = 0.05;

/// Seconds to back-date an emitted sequence ahead of its original command.
pub const LEAD_TIME: f64 = 1.3;

/// mm/s <-> feedrate-unit conversion factor.
pub const FEED_FACTOR: f64 = 60.0;

/// Maximum Z feedrate (feedrate units), used to cap Z-only move time estimates.
pub const FEED_LIMIT_Z: f64 = 1170.0;

/// Default pre-calibration detection threshold, applied after [`SigScales`] gain.
pub const DEFAULT_SENSITIVITY: f64 = 20.0;

/// Default per-bin gain, normalising for buzzer/microphone frequency response.
pub const DEFAULT_SIG_SCALES: [f64; 4] = [1.0, 1.8, 2.9, 3.6];

/// The literal comment marking the first line of the actual print body.
/// Matches the regex `;\s*@body(\s|$)`.
pub const BODY_MARKER_PATTERN: &str = r";\s*@body(\s|$)";

/// Default end-of-print marker line. Configurable because slicers vary.
pub const DEFAULT_END_MARKER: &str =
    ";- - - Custom finish printing G-code for FlashForge Creator Pro - - -";

/// Per-bin gain, normalising for buzzer/microphone frequency response.
/// Produced by calibration mode; defaults are a reasonable starting point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigScales(pub [f64; 4]);

impl Default for SigScales {
    fn default() -> Self {
        SigScales(DEFAULT_SIG_SCALES)
    }
}

/// Parameters shared by both the encoder and the detector, serializable so
/// both binaries can load the same on-disk config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    pub sequence_length: usize,
    pub sig_bins: [usize; 4],
    pub signal_freqs: [u32; 4],
    pub harmonic_factor: f64,
    pub ramp_up_zmax: f64,
    pub ramp_up_scale0: f64,
    pub lead_time: f64,
    pub feed_factor: f64,
    pub feed_limit_z: f64,
    pub sensitivity: f64,
    pub sig_scales: SigScales,
}

impl Default for SharedConfig {
    fn default() -> Self {
        SharedConfig {
            sequence_length: SEQUENCE_LENGTH,
            sig_bins: SIG_BINS,
            signal_freqs: SIGNAL_FREQS,
            harmonic_factor: HARMONIC_FACTOR,
            ramp_up_zmax: RAMP_UP_ZMAX,
            ramp_up_scale0: RAMP_UP_SCALE0,
            lead_time: LEAD_TIME,
            feed_factor: FEED_FACTOR,
            feed_limit_z: FEED_LIMIT_Z,
            sensitivity: DEFAULT_SENSITIVITY,
            sig_scales: SigScales::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_is_about_43_hz() {
        let rate = frame_rate();
        assert!((rate - 43.066).abs() < 0.01, "rate={rate}");
    }

    #[test]
    fn default_shared_config_round_trips_through_json() {
        let cfg = SharedConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SharedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
