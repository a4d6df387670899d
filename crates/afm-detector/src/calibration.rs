// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Calibration mode (spec §4.3 supplement, grounded in the original's
//! `calibration()` routine): run the front end at a reduced sensitivity
//! while a caller plays a test sequence on the printer's buzzer, accumulate
//! energy around each configured signal bin across the whole run, and report
//! clipping/silence warnings plus suggested `SIG_SCALES`/`SENSITIVITY` and a
//! neighbour-bin ranking for retuning [`afm_codec::config::SIG_BINS`] if the
//! buzzer's actual pitch has drifted from its nominal one.

use afm_codec::config::SigScales;

/// Calibration samples well below the normal detection floor so a quiet
/// buzzer/microphone pairing still registers (spec supplement: "one quarter
/// of the normal sensitivity").
pub const CALIBRATION_SENSITIVITY_FACTOR: f64 = 0.25;

/// Bins tracked on either side of each configured signal bin, to surface
/// whether the buzzer's real peak has drifted off the nominal tone.
pub const NEIGHBOR_RADIUS: isize = 3;

/// PCM amplitude at or above which a sample is considered clipped.
const CLIP_THRESHOLD: i16 = i16::MAX - 1;

/// Warn once clipped frames exceed this fraction of the run.
const CLIP_WARNING_RATIO: f64 = 0.01;

/// Warn once silent frames exceed this fraction of the run: the buzzer was
/// probably never heard at all.
const SILENCE_WARNING_RATIO: f64 = 0.95;

/// Accumulates per-bin energy across a calibration run. Feed it every frame's
/// raw samples and magnitude spectrum via [`Self::observe`], then read
/// [`Self::finish`] once the run is over.
#[derive(Debug, Clone)]
pub struct CalibrationRun {
    sig_bins: [usize; 4],
    accumulated: [f64; 4],
    /// `neighbors[offset as usize + NEIGHBOR_RADIUS][tone]`, summed energy at
    /// `sig_bins[tone] + offset` across the whole run.
    neighbors: Vec<[f64; 4]>,
    frames: u64,
    clipped_frames: u64,
    silent_frames: u64,
}

/// Summary produced at the end of a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub frames: u64,
    pub clipping_warning: bool,
    pub silence_warning: bool,
    pub suggested_sig_scales: SigScales,
    pub suggested_sensitivity: f64,
    /// For each tone, the bin (relative to the configured one) that actually
    /// carried the most energy, if it differs from the configured bin.
    pub suggested_bin_shift: [isize; 4],
}

impl CalibrationRun {
    pub fn new(sig_bins: [usize; 4]) -> Self {
        let width = (2 * NEIGHBOR_RADIUS + 1) as usize;
        CalibrationRun {
            sig_bins,
            accumulated: [0.0; 4],
            neighbors: vec![[0.0; 4]; width],
            frames: 0,
            clipped_frames: 0,
            silent_frames: 0,
        }
    }

    /// Feed one frame's raw samples (for clipping detection) and its
    /// magnitude spectrum (for bin accumulation).
    pub fn observe(&mut self, samples: &[i16], spectrum: &[f64]) {
        self.frames += 1;
        if samples.iter().any(|&s| s.abs() >= CLIP_THRESHOLD) {
            self.clipped_frames += 1;
        }
        let total_energy: f64 = spectrum.iter().sum();
        if total_energy < 1e-6 {
            self.silent_frames += 1;
        }
        for tone in 0..4 {
            let center = self.sig_bins[tone] as isize;
            for offset in -NEIGHBOR_RADIUS..=NEIGHBOR_RADIUS {
                let bin = center + offset;
                if bin < 0 || bin as usize >= spectrum.len() {
                    continue;
                }
                let mag = spectrum[bin as usize];
                self.neighbors[(offset + NEIGHBOR_RADIUS) as usize][tone] += mag;
                if offset == 0 {
                    self.accumulated[tone] += mag;
                }
            }
        }
    }

    /// Produce the final report. Cheap; may be called repeatedly mid-run for
    /// progress reporting.
    pub fn finish(&self) -> CalibrationReport {
        let baseline = self.accumulated.iter().cloned().fold(0.0_f64, f64::max);
        let mut scales = [1.0_f64; 4];
        if baseline > 0.0 {
            for i in 0..4 {
                scales[i] = if self.accumulated[i] > 0.0 {
                    baseline / self.accumulated[i]
                } else {
                    1.0
                };
            }
        }

        let weakest_scaled = self
            .accumulated
            .iter()
            .zip(scales.iter())
            .map(|(&a, &s)| a * s)
            .fold(f64::MAX, f64::min);
        let suggested_sensitivity = if weakest_scaled.is_finite() && weakest_scaled > 0.0 {
            weakest_scaled * 0.5
        } else {
            afm_codec::config::DEFAULT_SENSITIVITY
        };

        let mut suggested_bin_shift = [0isize; 4];
        for tone in 0..4 {
            let (best_offset_idx, _) = self
                .neighbors
                .iter()
                .enumerate()
                .max_by(|a, b| a.1[tone].partial_cmp(&b.1[tone]).unwrap())
                .unwrap();
            suggested_bin_shift[tone] = best_offset_idx as isize - NEIGHBOR_RADIUS;
        }

        CalibrationReport {
            frames: self.frames,
            clipping_warning: self.frames > 0
                && (self.clipped_frames as f64 / self.frames as f64) > CLIP_WARNING_RATIO,
            silence_warning: self.frames > 0
                && (self.silent_frames as f64 / self.frames as f64) > SILENCE_WARNING_RATIO,
            suggested_sig_scales: SigScales(scales),
            suggested_sensitivity,
            suggested_bin_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINS: [usize; 4] = [139, 151, 161, 172];

    fn spectrum_with_peak(len: usize, bin: usize, magnitude: f64) -> Vec<f64> {
        let mut s = vec![0.0; len];
        s[bin] = magnitude;
        s
    }

    #[test]
    fn equal_tones_suggest_unity_scales() {
        let mut run = CalibrationRun::new(BINS);
        for _ in 0..10 {
            for &bin in &BINS {
                run.observe(&[100; 1024], &spectrum_with_peak(200, bin, 5.0));
            }
        }
        let report = run.finish();
        for s in report.suggested_sig_scales.0 {
            assert!((s - 1.0).abs() < 1e-9, "scales={:?}", report.suggested_sig_scales.0);
        }
    }

    #[test]
    fn weak_tone_gets_boosted() {
        let mut run = CalibrationRun::new(BINS);
        for _ in 0..10 {
            run.observe(&[100; 1024], &spectrum_with_peak(200, BINS[0], 10.0));
            run.observe(&[100; 1024], &spectrum_with_peak(200, BINS[1], 2.0));
        }
        let report = run.finish();
        assert!(report.suggested_sig_scales.0[1] > report.suggested_sig_scales.0[0]);
    }

    #[test]
    fn clipping_is_flagged() {
        let mut run = CalibrationRun::new(BINS);
        for _ in 0..100 {
            run.observe(&[i16::MAX; 1024], &spectrum_with_peak(200, BINS[0], 5.0));
        }
        assert!(run.finish().clipping_warning);
    }

    #[test]
    fn mostly_silent_run_is_flagged() {
        let mut run = CalibrationRun::new(BINS);
        for _ in 0..100 {
            run.observe(&[0; 1024], &vec![0.0; 200]);
        }
        assert!(run.finish().silence_warning);
    }

    #[test]
    fn shifted_peak_is_reported_as_a_bin_offset() {
        let mut run = CalibrationRun::new(BINS);
        for _ in 0..10 {
            run.observe(&[100; 1024], &spectrum_with_peak(200, BINS[0] + 1, 5.0));
        }
        let report = run.finish();
        assert_eq!(report.suggested_bin_shift[0], 1);
    }
}
