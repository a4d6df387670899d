// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

use afm_codec::config::SEQUENCE_LENGTH;
use afm_codec::symbol::{decode, encode, from_duty_byte, to_duty_percent};
use afm_codec::wire::{decode_wire_lines, render_gcode, DEFAULT_FREQS};

#[test]
fn every_duty_byte_round_trips_through_the_whole_pipeline() {
    for byte in 0u8..=255 {
        let value = from_duty_byte(byte, SEQUENCE_LENGTH);
        let seq = encode(value, SEQUENCE_LENGTH);
        let gcode = render_gcode(&seq, &DEFAULT_FREQS, &Default::default());
        let lines: Vec<&str> = gcode.iter().map(String::as_str).collect();
        let decoded_seq = decode_wire_lines(&lines, &DEFAULT_FREQS).unwrap();
        assert_eq!(decoded_seq, seq);
        assert_eq!(decode(&decoded_seq), value);

        let duty = to_duty_percent(value, SEQUENCE_LENGTH);
        let expected = byte as f64 * 100.0 / 255.0;
        assert!((duty - expected).abs() <= 100.0 / (2.0 * 63.0));
    }
}
