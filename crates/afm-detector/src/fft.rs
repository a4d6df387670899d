// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Real-input FFT over one audio frame (spec §4.3 step 2): normalise 16-bit
//! PCM samples to `[-1, 1]`, run a real-to-complex FFT, and retain the
//! magnitude of the first `N/2` bins.
//!
//! All working memory (input buffer, complex spectrum, scratch, and the
//! output magnitude buffer) is allocated once in [`FftProcessor::new`] and
//! reused on every call, per spec §9 "no per-frame allocation in the hot path".

use realfft::num_complex::Complex64;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// Divisor used to normalise signed 16-bit PCM samples into `[-1, 1]`
/// (spec §9: "FFT magnitudes normalised by `2^15`").
const PCM_NORMALIZATION: f64 = 32768.0;

/// Reusable real-FFT working set for frames of exactly `n` samples.
pub struct FftProcessor {
    n: usize,
    fft: Arc<dyn RealToComplex<f64>>,
    input: Vec<f64>,
    spectrum: Vec<Complex64>,
    scratch: Vec<Complex64>,
    magnitudes: Vec<f64>,
}

impl FftProcessor {
    /// Build a processor for frames of `n` samples. `n` should match
    /// [`afm_codec::config::FRAME_SAMPLES`] in normal operation.
    pub fn new(n: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        FftProcessor {
            n,
            fft,
            input,
            spectrum,
            scratch,
            magnitudes: vec![0.0; n / 2],
        }
    }

    pub fn frame_len(&self) -> usize {
        self.n
    }

    /// Normalise `samples` (exactly `frame_len()` signed 16-bit PCM values)
    /// and compute the magnitude spectrum, retaining the first `N/2` bins as
    /// required by spec §4.3 step 2. Returns a slice into the processor's
    /// own reused buffer.
    pub fn magnitude_spectrum(&mut self, samples: &[i16]) -> &[f64] {
        debug_assert_eq!(samples.len(), self.n);
        for (dst, &src) in self.input.iter_mut().zip(samples) {
            *dst = src as f64 / PCM_NORMALIZATION;
        }
        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .expect("fixed-size real FFT plan never fails on matching input length");
        let half = self.n / 2;
        for i in 0..half {
            self.magnitudes[i] = self.spectrum[i].norm();
        }
        &self.magnitudes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afm_codec::config::FRAME_SAMPLES;
    use std::f64::consts::PI;

    #[test]
    fn pure_tone_peaks_at_its_bin() {
        let mut proc = FftProcessor::new(FRAME_SAMPLES);
        let bin = 139usize; // one of the SIG_BINS
        let freq = bin as f64 * afm_codec::config::SAMPLING_RATE as f64 / FRAME_SAMPLES as f64;
        let samples: Vec<i16> = (0..FRAME_SAMPLES)
            .map(|n| {
                let t = n as f64 / afm_codec::config::SAMPLING_RATE as f64;
                ((2.0 * PI * freq * t).sin() * 20000.0) as i16
            })
            .collect();
        let spectrum = proc.magnitude_spectrum(&samples);
        let peak_bin = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, bin);
    }

    #[test]
    fn silence_produces_near_zero_magnitudes() {
        let mut proc = FftProcessor::new(FRAME_SAMPLES);
        let samples = vec![0i16; FRAME_SAMPLES];
        let spectrum = proc.magnitude_spectrum(&samples);
        assert!(spectrum.iter().all(|&m| m < 1e-9));
    }

    #[test]
    fn output_length_is_half_the_frame() {
        let mut proc = FftProcessor::new(FRAME_SAMPLES);
        let samples = vec![0i16; FRAME_SAMPLES];
        assert_eq!(proc.magnitude_spectrum(&samples).len(), FRAME_SAMPLES / 2);
    }
}
