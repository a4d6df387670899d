// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Shared contract between the G-code encoder and the audio detector.
//!
//! A fan speed change is represented as an integer "value" in `[0, 4^L - 1]`,
//! which [`symbol`] maps to an ordered sequence of `L` base-4 symbols. The
//! [`wire`] module turns such a sequence into the literal `M300` beep timing
//! the printer's buzzer plays, and back. [`config`] holds every tunable
//! constant that must agree between the two processes, since they never
//! otherwise exchange a handshake.
//!
//! # Quick start
//!
//! ```
//! use afm_codec::symbol::{decode, encode, to_duty_percent};
//!
//! let seq = encode(32, 3);
//! assert_eq!(seq, vec![2, 0, 0]);
//! assert_eq!(decode(&seq), 32);
//! assert_eq!(to_duty_percent(32, 3), 50.79);
//! ```

pub mod config;
pub mod error;
pub mod symbol;
pub mod wire;

pub use error::CodecError;
