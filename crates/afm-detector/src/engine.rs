// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! The per-frame pipeline (spec §4.3 "Per-frame pipeline"): wires
//! [`crate::audio`], [`crate::fft`], [`crate::frame`], [`crate::state_machine`]
//! and [`crate::http`] together behind a single [`Engine::process_frame`]
//! call, and abstracts the sample source behind [`FrameSource`] so the whole
//! pipeline is testable without real audio hardware.

use afm_codec::config::SharedConfig;
use afm_codec::symbol;
use log::info;

use crate::audio::InputStream;
use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::fft::FftProcessor;
use crate::frame::{BinEvaluator, BinMagnitudes, Observation};
use crate::http::Dispatcher;
use crate::state_machine::{ContinuousToneGuard, DetectorState, SilenceOutcome};

/// A source of fixed-size mono `i16` audio frames. Implemented by
/// [`InputStream`] for real capture, and by synthetic sources in tests.
pub trait FrameSource {
    fn read_frame(&mut self, out: &mut [i16]);
    fn frame_len(&self) -> usize;
}

impl FrameSource for InputStream {
    fn read_frame(&mut self, out: &mut [i16]) {
        InputStream::read_frame(self, out)
    }

    fn frame_len(&self) -> usize {
        InputStream::frame_len(self)
    }
}

/// The assembled detection pipeline, holding all per-frame working state.
pub struct Engine {
    fft: FftProcessor,
    evaluator: BinEvaluator,
    state: DetectorState,
    continuous_guard: Option<ContinuousToneGuard>,
    tone_bin_range: (usize, usize),
    dispatcher: Option<Dispatcher>,
    sig_bins: [usize; 4],
    sig_scales: [f64; 4],
    sensitivity: f64,
    harmonic_factor: f64,
    sequence_length: usize,
    frame_buf: Vec<i16>,
    /// The most recently decoded duty-cycle percentage, kept regardless of
    /// whether a dispatcher is configured, for observability and testing.
    last_decoded_duty: Option<f64>,
}

impl Engine {
    pub fn new(shared: &SharedConfig, detector_cfg: &DetectorConfig, dispatcher: Option<Dispatcher>) -> Self {
        Engine {
            fft: FftProcessor::new(afm_codec::config::FRAME_SAMPLES),
            evaluator: BinEvaluator::new(),
            state: DetectorState::new(shared.sequence_length),
            continuous_guard: if detector_cfg.detect_continuous {
                Some(ContinuousToneGuard::new())
            } else {
                None
            },
            tone_bin_range: (detector_cfg.tone_bin_lower, detector_cfg.tone_bin_upper),
            dispatcher,
            sig_bins: shared.sig_bins,
            sig_scales: shared.sig_scales.0,
            sensitivity: shared.sensitivity,
            harmonic_factor: shared.harmonic_factor,
            sequence_length: shared.sequence_length,
            frame_buf: vec![0i16; afm_codec::config::FRAME_SAMPLES],
            last_decoded_duty: None,
        }
    }

    /// The most recently decoded duty-cycle percentage, if any sequence has
    /// completed yet.
    pub fn last_decoded_duty(&self) -> Option<f64> {
        self.last_decoded_duty
    }

    /// Pull, analyse, and act on exactly one audio frame from `source`.
    pub fn process_frame<S: FrameSource>(&mut self, source: &mut S) {
        source.read_frame(&mut self.frame_buf);
        self.state.tick();

        let spectrum = self.fft.magnitude_spectrum(&self.frame_buf);

        if let Some(guard) = &mut self.continuous_guard {
            let peak = dominant_peak(spectrum, self.tone_bin_range, self.sensitivity);
            if guard.observe(peak) {
                self.state.reset();
            }
        }

        let mags = BinMagnitudes::from_spectrum(spectrum, &self.sig_bins);
        let observation = self
            .evaluator
            .evaluate(mags, &self.sig_scales, self.sensitivity, self.harmonic_factor);

        match observation {
            Observation::Symbol(s) => {
                if !self.state.check_signal(s) {
                    self.evaluator.clear_history();
                }
            }
            Observation::Harmonic => {
                // A real tone was present, just rejected as a lower tone's
                // harmonic: reset the sequence timing but keep the frame's
                // energy in play for the next frame's two-frame sum.
                self.state.reset();
            }
            Observation::Silence => {
                let outcome = self.state.check_silence();
                self.evaluator.clear_history();
                if let SilenceOutcome::Complete(sequence) = outcome {
                    self.dispatch(&sequence);
                }
            }
        }

        if let Some(dispatcher) = &mut self.dispatcher {
            dispatcher.tick();
        }
    }

    fn dispatch(&mut self, sequence: &[afm_codec::symbol::Symbol]) {
        if symbol::validate(sequence, self.sequence_length).is_err() {
            return;
        }
        let value = symbol::decode(sequence);
        let duty = symbol::to_duty_percent(value, self.sequence_length);
        info!("decoded sequence {sequence:?} -> {duty:.2}% duty");
        self.last_decoded_duty = Some(duty);
        if let Some(dispatcher) = &mut self.dispatcher {
            dispatcher.request_duty(duty);
        }
    }
}

/// The loudest bin in `[lo, hi)`, if it clears `sensitivity` (spec §4.3
/// `DETECT_CONTINUOUS` sustained-tone guard).
fn dominant_peak(spectrum: &[f64], (lo, hi): (usize, usize), sensitivity: f64) -> Option<usize> {
    let hi = hi.min(spectrum.len());
    if lo >= hi {
        return None;
    }
    let (offset, &magnitude) = spectrum[lo..hi]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())?;
    (magnitude > sensitivity).then_some(lo + offset)
}

/// Run the detection loop until `shutdown` is set, reopening the audio
/// stream at most once on a fault before giving up (spec §7 "Audio fault").
pub fn run_forever(
    engine: &mut Engine,
    stream: &mut InputStream,
    shutdown: &std::sync::atomic::AtomicBool,
) -> Result<(), DetectorError> {
    use std::sync::atomic::Ordering;
    let mut reopened_once = false;
    while !shutdown.load(Ordering::Relaxed) {
        engine.process_frame(stream);
        if stream.take_fault() {
            if reopened_once {
                return Err(DetectorError::AudioStart(
                    "audio stream failed twice in a row; giving up".into(),
                ));
            }
            stream.reopen()?;
            reopened_once = true;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use afm_codec::config::SAMPLING_RATE;
    use std::f64::consts::PI;

    struct ToneSequenceSource {
        frame_len: usize,
        /// One entry per frame: `Some(bin)` to emit a pure tone at that FFT
        /// bin, `None` for silence.
        frames: std::collections::VecDeque<Option<usize>>,
    }

    impl FrameSource for ToneSequenceSource {
        fn read_frame(&mut self, out: &mut [i16]) {
            let bin = self.frames.pop_front().unwrap_or(None);
            match bin {
                None => out.fill(0),
                Some(bin) => {
                    let freq = bin as f64 * SAMPLING_RATE as f64 / self.frame_len as f64;
                    for (n, slot) in out.iter_mut().enumerate() {
                        let t = n as f64 / SAMPLING_RATE as f64;
                        *slot = ((2.0 * PI * freq * t).sin() * 20000.0) as i16;
                    }
                }
            }
        }

        fn frame_len(&self) -> usize {
            self.frame_len
        }
    }

    fn source_with(pattern: Vec<Option<usize>>) -> ToneSequenceSource {
        ToneSequenceSource {
            frame_len: afm_codec::config::FRAME_SAMPLES,
            frames: pattern.into(),
        }
    }

    #[test]
    fn a_full_sequence_of_pure_tones_reaches_dispatch() {
        let shared = SharedConfig::default();
        let detector_cfg = DetectorConfig {
            host: String::new(), // no real dispatcher needed for this test
            ..Default::default()
        };
        let mut engine = Engine::new(&shared, &detector_cfg, None);

        let bins = shared.sig_bins;
        // 8 frames of lead-in silence, then symbols [1, 3, 0] each held for
        // one frame with a silent gap of 5 frames in between, then a long
        // trailing silence to confirm the sequence.
        let mut pattern = vec![None; 8];
        pattern.push(Some(bins[1]));
        pattern.extend(vec![None; 5]);
        pattern.push(Some(bins[3]));
        pattern.extend(vec![None; 5]);
        pattern.push(Some(bins[0]));
        pattern.extend(vec![None; 9]);
        let mut source = source_with(pattern);

        for _ in 0..source.frames.len() {
            engine.process_frame(&mut source);
        }
        // No dispatcher was configured; reaching here without panicking
        // confirms the pipeline drives the state machine to completion
        // without needing a live HTTP endpoint.
        assert_eq!(engine.state.detected(), &[] as &[afm_codec::symbol::Symbol]);
        assert_eq!(engine.last_decoded_duty(), Some(afm_codec::symbol::to_duty_percent(28, 3)));
    }

    #[test]
    fn pure_silence_never_advances_the_sequence() {
        let shared = SharedConfig::default();
        let detector_cfg = DetectorConfig {
            host: String::new(),
            ..Default::default()
        };
        let mut engine = Engine::new(&shared, &detector_cfg, None);
        let mut source = source_with(vec![None; 50]);
        for _ in 0..50 {
            engine.process_frame(&mut source);
        }
        assert!(engine.state.detected().is_empty());
    }
}
