// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

use thiserror::Error;

/// Errors produced while encoding, decoding, or rendering the acoustic wire format.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("symbol {0} is out of range for a base-4 alphabet (must be 0..=3)")]
    SymbolOutOfRange(u8),

    #[error("sequence length {got} does not match expected length {expected}")]
    WrongSequenceLength { expected: usize, got: usize },

    #[error("value {value} does not fit in {length} base-4 digits (max {max})")]
    ValueOutOfRange { value: u32, length: usize, max: u32 },

    #[error("malformed M300 wire line: {0}")]
    MalformedWireLine(String),
}
