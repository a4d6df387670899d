// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Per-frame signal-bin evaluation: the two-frame intensity sum, per-bin
//! `SIG_SCALES` gain, the "exactly one bin present" rule, and sub-harmonic
//! rejection (spec §4.3 "Per-frame pipeline" and "Noise discrimination").
//!
//! This stays pure (no FFT, no I/O) so the thresholds are directly testable
//! against the literal frame traces in spec §8.

use afm_codec::config::{HARMONIC_FACTOR, SIG_BINS};

/// Magnitudes read out of one frame's FFT at the four signal bins and their
/// four sub-harmonic (half-frequency) bins (spec §3 `FrameObservation`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BinMagnitudes {
    pub signal: [f64; 4],
    pub sub_harmonic: [f64; 4],
}

impl BinMagnitudes {
    /// Read the configured bins out of a full magnitude spectrum `bins`
    /// (indexed exactly as produced by [`crate::fft::magnitude_spectrum`]).
    pub fn from_spectrum(bins: &[f64], sig_bins: &[usize; 4]) -> Self {
        let mut signal = [0.0; 4];
        let mut sub_harmonic = [0.0; 4];
        for i in 0..4 {
            signal[i] = bins.get(sig_bins[i]).copied().unwrap_or(0.0);
            sub_harmonic[i] = bins.get(sig_bins[i] / 2).copied().unwrap_or(0.0);
        }
        BinMagnitudes {
            signal,
            sub_harmonic,
        }
    }
}

/// What one frame's signal bins resolved to, before being handed to the
/// [`crate::state_machine::DetectorState`] step function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// No bin present, or two-or-more bins present simultaneously (spec
    /// §3: "simultaneous activation of ≥2 signifies noise").
    Silence,
    /// Exactly one bin present and it was not rejected as a sub-harmonic.
    Symbol(u8),
    /// Exactly one bin present, but it was a lower buzzer tone's harmonic
    /// (spec §3 "Sub-harmonic rejection"); the automaton must still be reset.
    Harmonic,
}

/// Accumulates the previous frame's raw bin magnitudes to compute the
/// two-frame sum described in spec §4.3 step 4, and evaluates which (if any)
/// signal is present this frame.
#[derive(Debug, Clone, Default)]
pub struct BinEvaluator {
    prev: BinMagnitudes,
}

impl BinEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the carried-over previous-frame magnitudes. Called after any
    /// event that resets the detector's timing automaton, so that the
    /// cross-frame sum does not bleed signal energy across a reset boundary
    /// (mirrors the original script's `last_bins = empty_bins[:]`).
    pub fn clear_history(&mut self) {
        self.prev = BinMagnitudes::default();
    }

    /// Evaluate one frame's bins against `sig_scales`/`sensitivity`/`harmonic_factor`.
    pub fn evaluate(
        &mut self,
        current: BinMagnitudes,
        sig_scales: &[f64; 4],
        sensitivity: f64,
        harmonic_factor: f64,
    ) -> Observation {
        let mut total_signal = [0.0; 4];
        let mut total_sub = [0.0; 4];
        for i in 0..4 {
            total_signal[i] = self.prev.signal[i] + current.signal[i];
            total_sub[i] = self.prev.sub_harmonic[i] + current.sub_harmonic[i];
        }

        let present: Vec<usize> = (0..4)
            .filter(|&i| total_signal[i] * sig_scales[i] > sensitivity)
            .collect();

        self.prev = current;

        match present.as_slice() {
            [i] => {
                let i = *i;
                if total_signal[i] > 0.0 && total_sub[i] / total_signal[i] > harmonic_factor {
                    Observation::Harmonic
                } else {
                    Observation::Symbol(i as u8)
                }
            }
            _ => Observation::Silence,
        }
    }
}

/// Default signal bins, re-exported for callers constructing [`BinMagnitudes`]
/// without a custom configuration.
pub const DEFAULT_SIG_BINS: [usize; 4] = SIG_BINS;

/// Default sub-harmonic rejection ratio, re-exported for convenience.
pub const DEFAULT_HARMONIC_FACTOR: f64 = HARMONIC_FACTOR;

#[cfg(test)]
mod tests {
    use super::*;

    const SCALES: [f64; 4] = [1.0, 1.8, 2.9, 3.6];
    const SENSITIVITY: f64 = 20.0;

    fn mags(signal: [f64; 4]) -> BinMagnitudes {
        BinMagnitudes {
            signal,
            sub_harmonic: [0.0; 4],
        }
    }

    #[test]
    fn single_loud_bin_is_a_symbol() {
        let mut eval = BinEvaluator::new();
        let obs = eval.evaluate(mags([30.0, 0.0, 0.0, 0.0]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs, Observation::Symbol(0));
    }

    #[test]
    fn silence_when_nothing_exceeds_sensitivity() {
        let mut eval = BinEvaluator::new();
        let obs = eval.evaluate(mags([0.1, 0.1, 0.1, 0.1]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs, Observation::Silence);
    }

    #[test]
    fn two_simultaneous_bins_are_treated_as_silence() {
        let mut eval = BinEvaluator::new();
        let obs = eval.evaluate(mags([30.0, 20.0, 0.0, 0.0]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs, Observation::Silence);
    }

    #[test]
    fn strong_subharmonic_is_rejected_as_a_harmonic() {
        let mut eval = BinEvaluator::new();
        let current = BinMagnitudes {
            signal: [30.0, 0.0, 0.0, 0.0],
            sub_harmonic: [40.0, 0.0, 0.0, 0.0],
        };
        let obs = eval.evaluate(current, &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs, Observation::Harmonic);
    }

    #[test]
    fn two_frame_sum_catches_a_symbol_split_across_frames() {
        let mut eval = BinEvaluator::new();
        // Neither frame alone clears SENSITIVITY/SIG_SCALES[0]=20.0, but summed they do.
        let obs1 = eval.evaluate(mags([12.0, 0.0, 0.0, 0.0]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs1, Observation::Silence);
        let obs2 = eval.evaluate(mags([12.0, 0.0, 0.0, 0.0]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs2, Observation::Symbol(0));
    }

    #[test]
    fn clear_history_drops_the_carried_over_frame() {
        let mut eval = BinEvaluator::new();
        eval.evaluate(mags([12.0, 0.0, 0.0, 0.0]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        eval.clear_history();
        let obs = eval.evaluate(mags([12.0, 0.0, 0.0, 0.0]), &SCALES, SENSITIVITY, HARMONIC_FACTOR);
        assert_eq!(obs, Observation::Silence, "history was cleared, so frames should not sum");
    }

    #[test]
    fn from_spectrum_reads_configured_bins() {
        let mut spectrum = vec![0.0; 200];
        spectrum[139] = 5.0;
        spectrum[69] = 9.0; // sub-harmonic of bin 139
        let mags = BinMagnitudes::from_spectrum(&spectrum, &DEFAULT_SIG_BINS);
        assert_eq!(mags.signal[0], 5.0);
        assert_eq!(mags.sub_harmonic[0], 9.0);
    }
}
