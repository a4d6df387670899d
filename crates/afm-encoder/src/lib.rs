// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! G-code post-processing that turns `M106`/`M107` fan commands into timed
//! `M300` buzzer beep sequences, back-dated to compensate for decode and
//! fan spin-up latency.
//!
//! ```no_run
//! use std::io::{BufReader, stdin, stdout};
//! use afm_codec::config::SharedConfig;
//! use afm_encoder::{run, EncoderOptions};
//!
//! let mut reader = BufReader::new(stdin());
//! let mut writer = stdout();
//! run(&mut reader, &mut writer, SharedConfig::default(), EncoderOptions::default())
//!     .expect("encoder pass failed");
//! ```

pub mod engine;
pub mod error;
pub mod events;
pub mod gcode;
pub mod kinematics;
pub mod scheduler;
pub mod window;

pub use engine::{run, EncoderOptions};
pub use error::EncoderError;
