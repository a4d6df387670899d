// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

use thiserror::Error;

/// Fatal errors that abort the encoder with a non-zero exit code (spec §7:
/// "Encoder input error").
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("unexpected end of file while looking for the body marker")]
    UnexpectedEofBeforeBody,

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}
