// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Streaming FFT audio detector: listens for the buzzer beep sequences
//! produced by `afm-encoder`'s `M300` commands and turns them back into fan
//! duty-cycle requests against a PWM controller.
//!
//! [`engine::Engine`] is the assembled pipeline; everything else is a
//! self-contained, independently testable stage it drives.

pub mod audio;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod fft;
pub mod frame;
pub mod http;
pub mod lock;
pub mod state_machine;

pub use error::DetectorError;
