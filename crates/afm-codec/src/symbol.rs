// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! The base-4 symbol alphabet and the pure, total codec over it.
//!
//! One [`Symbol`] is one of the four buzzer tones. A [`Sequence`] of `L`
//! symbols, most-significant symbol first, represents an integer fan-speed
//! value in `[0, 4^L - 1]`.

use crate::error::CodecError;

/// One of the four buzzer tones, indexed `0..=3`.
pub type Symbol = u8;

/// An ordered, fixed-length run of [`Symbol`]s, most-significant first.
pub type Sequence = Vec<Symbol>;

/// Number of distinct symbols in the alphabet.
pub const ALPHABET_SIZE: u32 = 4;

/// `4^length`, the number of representable values for a sequence of the given length.
pub fn value_space(length: usize) -> u32 {
    ALPHABET_SIZE.pow(length as u32)
}

/// Encode `value` as an `L`-symbol base-4 sequence, most-significant symbol first.
///
/// `value` must lie in `[0, 4^length - 1]`; this is an internal invariant
/// upheld by every caller in this workspace (quantised fan speeds, detector
/// symbol indices), not an externally supplied value, so violating it is a
/// programming error rather than a recoverable runtime condition.
pub fn encode(value: u32, length: usize) -> Sequence {
    debug_assert!(
        value < value_space(length),
        "value {value} does not fit in {length} base-4 digits"
    );
    let mut digits = vec![0u8; length];
    let mut remaining = value;
    for i in (0..length).rev() {
        digits[i] = (remaining % ALPHABET_SIZE) as u8;
        remaining /= ALPHABET_SIZE;
    }
    digits
}

/// Fallible counterpart of [`encode`] for callers that do not control `value`
/// (e.g. values parsed from a config file or the wire format).
pub fn try_encode(value: u32, length: usize) -> Result<Sequence, CodecError> {
    let max = value_space(length);
    if value >= max {
        return Err(CodecError::ValueOutOfRange {
            value,
            length,
            max,
        });
    }
    Ok(encode(value, length))
}

/// Decode a base-4 [`Sequence`] (most-significant symbol first) back to an integer.
///
/// This is the exact inverse of [`encode`]: `decode(encode(v, l)) == v`.
pub fn decode(sequence: &[Symbol]) -> u32 {
    sequence
        .iter()
        .fold(0u32, |acc, &digit| acc * ALPHABET_SIZE + digit as u32)
}

/// Validate that every symbol in `sequence` is a legal base-4 digit and the
/// length matches `expected_length`.
pub fn validate(sequence: &[Symbol], expected_length: usize) -> Result<(), CodecError> {
    if sequence.len() != expected_length {
        return Err(CodecError::WrongSequenceLength {
            expected: expected_length,
            got: sequence.len(),
        });
    }
    for &s in sequence {
        if s >= ALPHABET_SIZE as u8 {
            return Err(CodecError::SymbolOutOfRange(s));
        }
    }
    Ok(())
}

/// Round `x` to `decimals` decimal places using the same half-away-from-zero
/// rounding Python's `round()` performs on the positive values this codec
/// only ever deals with.
fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (x * factor).round() / factor
}

/// Convert a decoded sequence `value` (in `[0, 4^length - 1]`) to a duty
/// cycle percentage rounded to two decimal places.
pub fn to_duty_percent(value: u32, length: usize) -> f64 {
    let max = (value_space(length) - 1) as f64;
    round_to(value as f64 * 100.0 / max, 2)
}

/// Quantise an 8-bit fan PWM byte (`M106 S<0..255>`) down to the `length`-symbol value space.
pub fn from_duty_byte(byte: u8, length: usize) -> u32 {
    from_duty_value(byte as f64, length)
}

/// Quantise a fan duty value in the `[0, 255]` range down to the
/// `length`-symbol value space, without first truncating to a whole byte.
///
/// Used for ramp-scaled speeds (e.g. `original_byte * ramp_up_scale`), which
/// are fractional even though the slicer only ever emits whole-byte `S`
/// arguments; rounding to a byte first before quantising would throw away
/// precision the ramp-up curve deliberately introduces.
pub fn from_duty_value(value: f64, length: usize) -> u32 {
    let max = (value_space(length) - 1) as f64;
    (value.clamp(0.0, 255.0) / 255.0 * max).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const L: usize = 3;

    #[test]
    fn round_trip_covers_full_range() {
        for v in 0..value_space(L) {
            let seq = encode(v, L);
            assert_eq!(seq.len(), L);
            assert_eq!(decode(&seq), v);
        }
    }

    #[test]
    fn encode_is_most_significant_first() {
        assert_eq!(encode(0, L), vec![0, 0, 0]);
        assert_eq!(encode(63, L), vec![3, 3, 3]);
        assert_eq!(encode(32, L), vec![2, 0, 0]);
        assert_eq!(encode(28, L), vec![1, 3, 0]);
    }

    #[test]
    fn duty_percent_matches_literal_scenarios() {
        assert_eq!(to_duty_percent(32, L), 50.79);
        assert_eq!(to_duty_percent(28, L), 44.44);
        assert_eq!(to_duty_percent(63, L), 100.0);
        assert_eq!(to_duty_percent(0, L), 0.0);
    }

    #[test]
    fn from_duty_byte_quantises_within_half_step() {
        let max = (value_space(L) - 1) as f64;
        for b in 0u8..=255 {
            let value = from_duty_byte(b, L);
            let recovered = value as f64 * 100.0 / max;
            let expected = b as f64 * 100.0 / 255.0;
            assert!(
                (recovered - expected).abs() <= 100.0 / (2.0 * max),
                "b={b} recovered={recovered} expected={expected}"
            );
        }
    }

    #[test]
    fn scenario_m106_s128_at_z20() {
        // round(128/255 * 63) = 32
        assert_eq!(from_duty_byte(128, L), 32);
        assert_eq!(encode(32, L), vec![2, 0, 0]);
        assert_eq!(to_duty_percent(32, L), 50.79);
    }

    #[test]
    fn from_duty_value_handles_fractional_ramp_scaled_speeds() {
        // 255 scaled down to 5% by the ramp-up curve: 12.75, not first truncated to a byte.
        assert_eq!(from_duty_value(12.75, L), from_duty_value(12.75, L));
        assert_eq!(from_duty_value(12.75, L), (12.75 / 255.0 * 63.0).round() as u32);
        assert_eq!(from_duty_value(-5.0, L), 0, "clamps below zero");
        assert_eq!(from_duty_value(999.0, L), 63, "clamps above 255");
    }

    #[test]
    fn try_encode_rejects_out_of_range_value() {
        assert_eq!(
            try_encode(64, L),
            Err(CodecError::ValueOutOfRange {
                value: 64,
                length: L,
                max: 64,
            })
        );
    }

    #[test]
    fn validate_rejects_wrong_length_and_bad_symbols() {
        assert!(validate(&[0, 1], L).is_err());
        assert!(validate(&[0, 1, 4], L).is_err());
        assert!(validate(&[0, 1, 2], L).is_ok());
    }
}
