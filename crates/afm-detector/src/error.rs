// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

use thiserror::Error;

/// Errors raised by the detector library. Audio faults and controller
/// unreachability are *not* represented here: per spec §7 those are handled
/// in place (log and continue) rather than propagated, since the detection
/// loop must never exit because of a transient I/O hiccup.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("no input audio device available")]
    NoInputDevice,

    #[error("failed to configure audio input stream: {0}")]
    AudioConfig(String),

    #[error("failed to build audio input stream: {0}")]
    AudioBuild(String),

    #[error("failed to start audio input stream: {0}")]
    AudioStart(String),

    #[error("lock file {path} is held by another running instance (pid {pid})")]
    LockHeld { path: String, pid: u32 },

    #[error("failed to access lock file {path}: {source}")]
    LockIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
