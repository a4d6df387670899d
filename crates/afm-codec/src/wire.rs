// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! The acoustic wire format: rendering a [`Sequence`] to the literal `M300`
//! lines the printer plays, and parsing them back. Spec §6:
//!
//! ```text
//! M300 S0  P200              ; pre-silence
//! M300 S<f_s0> P20           ; symbol 0
//! M300 S0  P100              ; inter-symbol silence
//! M300 S<f_s1> P20           ; symbol 1
//! M300 S0  P100
//! M300 S<f_sL-1> P20         ; symbol L-1
//! M300 S0  P200              ; post-silence / end marker
//! ```

use crate::config::{SIGNAL_FREQS, SIG_BINS};
use crate::error::CodecError;
use crate::symbol::{Sequence, Symbol};

/// Timing parameters of the playback waveform, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireTiming {
    pub pre_silence_ms: u32,
    pub symbol_ms: u32,
    pub inter_symbol_ms: u32,
    pub post_silence_ms: u32,
}

impl Default for WireTiming {
    fn default() -> Self {
        WireTiming {
            pre_silence_ms: 200,
            symbol_ms: 20,
            inter_symbol_ms: 100,
            post_silence_ms: 200,
        }
    }
}

/// One `M300 S<freq> P<ms>` line of rendered G-code.
#[derive(Debug, Clone, PartialEq)]
pub struct BeepLine {
    pub freq: u32,
    pub ms: u32,
}

impl BeepLine {
    pub fn is_silence(&self) -> bool {
        self.freq == 0
    }

    /// Render as the literal G-code text the printer expects.
    pub fn to_gcode(&self) -> String {
        format!("M300 S{} P{}", self.freq, self.ms)
    }
}

/// Render a [`Sequence`] into the ordered list of [`BeepLine`]s that make up
/// its complete playback, using `freqs` to map symbol index to buzzer tone.
pub fn render_sequence(sequence: &Sequence, freqs: &[u32; 4], timing: &WireTiming) -> Vec<BeepLine> {
    let mut lines = Vec::with_capacity(sequence.len() * 2 + 1);
    lines.push(BeepLine {
        freq: 0,
        ms: timing.pre_silence_ms,
    });
    for (i, &symbol) in sequence.iter().enumerate() {
        lines.push(BeepLine {
            freq: freqs[symbol as usize],
            ms: timing.symbol_ms,
        });
        let silence_ms = if i + 1 == sequence.len() {
            timing.post_silence_ms
        } else {
            timing.inter_symbol_ms
        };
        lines.push(BeepLine {
            freq: 0,
            ms: silence_ms,
        });
    }
    lines
}

/// Render straight to G-code text lines, one per [`BeepLine`].
pub fn render_gcode(sequence: &Sequence, freqs: &[u32; 4], timing: &WireTiming) -> Vec<String> {
    render_sequence(sequence, freqs, timing)
        .iter()
        .map(BeepLine::to_gcode)
        .collect()
}

/// Total playback duration of a sequence of `length` symbols, in milliseconds.
pub fn playback_duration_ms(length: usize, timing: &WireTiming) -> u32 {
    timing.pre_silence_ms
        + length as u32 * timing.symbol_ms
        + (length.saturating_sub(1)) as u32 * timing.inter_symbol_ms
        + timing.post_silence_ms
}

/// Parse a single `M300 S<freq> P<ms>` line, ignoring an optional trailing
/// `;` comment, tolerant of the whitespace variation the examples show
/// (`S0  P200` with extra padding to align columns).
pub fn parse_m300_line(line: &str) -> Result<BeepLine, CodecError> {
    let code_part = line.split(';').next().unwrap_or("").trim();
    let mut freq = None;
    let mut ms = None;
    let mut tokens = code_part.split_whitespace();
    match tokens.next() {
        Some("M300") => {}
        _ => return Err(CodecError::MalformedWireLine(line.to_string())),
    }
    for tok in tokens {
        if let Some(rest) = tok.strip_prefix('S') {
            freq = rest.parse::<u32>().ok();
        } else if let Some(rest) = tok.strip_prefix('P') {
            ms = rest.parse::<u32>().ok();
        }
    }
    match (freq, ms) {
        (Some(freq), Some(ms)) => Ok(BeepLine { freq, ms }),
        _ => Err(CodecError::MalformedWireLine(line.to_string())),
    }
}

/// Reconstruct the [`Sequence`] encoded by a run of `M300` lines (as produced
/// by [`render_gcode`]), matching each non-silent beep's frequency to the
/// nearest entry in `freqs`. Used by tests and by the encoder's
/// `--emit-timings` self-check; the detector never parses G-code text, it
/// only ever sees audio.
pub fn decode_wire_lines(lines: &[&str], freqs: &[u32; 4]) -> Result<Sequence, CodecError> {
    let mut symbols = Vec::new();
    for line in lines {
        let beep = parse_m300_line(line)?;
        if beep.is_silence() {
            continue;
        }
        let nearest = freqs
            .iter()
            .enumerate()
            .min_by_key(|(_, f)| (**f as i64 - beep.freq as i64).abs())
            .map(|(i, _)| i as Symbol)
            .ok_or_else(|| CodecError::MalformedWireLine(line.to_string()))?;
        symbols.push(nearest);
    }
    Ok(symbols)
}

/// Default signal frequencies, exposed for convenience so callers that don't
/// care about custom tuning can pass `&afm_codec::wire::DEFAULT_FREQS`.
pub const DEFAULT_FREQS: [u32; 4] = SIGNAL_FREQS;

/// Sanity check that [`SIG_BINS`] and [`DEFAULT_FREQS`] agree on cardinality;
/// both must describe the same four-tone alphabet.
pub fn bins_and_freqs_agree() -> bool {
    SIG_BINS.len() == DEFAULT_FREQS.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::encode;

    #[test]
    fn scenario_encode_zero_renders_three_identical_beeps() {
        let seq = encode(0, 3);
        let lines = render_gcode(&seq, &DEFAULT_FREQS, &WireTiming::default());
        assert_eq!(
            lines,
            vec![
                "M300 S0 P200",
                "M300 S5988 P20",
                "M300 S0 P100",
                "M300 S5988 P20",
                "M300 S0 P100",
                "M300 S5988 P20",
                "M300 S0 P200",
            ]
        );
    }

    #[test]
    fn scenario_encode_63_all_top_frequency() {
        let seq = encode(63, 3);
        let lines = render_sequence(&seq, &DEFAULT_FREQS, &WireTiming::default());
        let beep_freqs: Vec<u32> = lines.iter().filter(|l| !l.is_silence()).map(|l| l.freq).collect();
        assert_eq!(beep_freqs, vec![7407, 7407, 7407]);
    }

    #[test]
    fn scenario_m106_s128_emits_expected_frequencies() {
        // value 32 -> [2, 0, 0] -> 6944, 5988, 5988
        let seq = encode(32, 3);
        let lines = render_sequence(&seq, &DEFAULT_FREQS, &WireTiming::default());
        let beep_freqs: Vec<u32> = lines.iter().filter(|l| !l.is_silence()).map(|l| l.freq).collect();
        assert_eq!(beep_freqs, vec![6944, 5988, 5988]);
    }

    #[test]
    fn round_trips_through_gcode_text() {
        for v in [0u32, 1, 28, 32, 63] {
            let seq = encode(v, 3);
            let gcode = render_gcode(&seq, &DEFAULT_FREQS, &WireTiming::default());
            let as_str: Vec<&str> = gcode.iter().map(String::as_str).collect();
            let decoded = decode_wire_lines(&as_str, &DEFAULT_FREQS).unwrap();
            assert_eq!(decoded, seq);
        }
    }

    #[test]
    fn playback_duration_matches_framing() {
        // 200 + 3*20 + 2*100 + 200 = 660ms
        assert_eq!(playback_duration_ms(3, &WireTiming::default()), 660);
    }

    #[test]
    fn parse_rejects_malformed_line() {
        assert!(parse_m300_line("G1 X10").is_err());
        assert!(parse_m300_line("M300 S100").is_err());
    }
}
