// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Detector-specific configuration layered on top of [`afm_codec::config::SharedConfig`]:
//! controller host/port, request timeout, input device selection, and the
//! optional `DETECT_CONTINUOUS` sustained-tone guard (spec §4.3, §6).
//!
//! Like the original script, every field has a sensible default, may be
//! overridden by an optional TOML file, and finally by CLI flags (the
//! precedence order applied by the `afm-detector` binary).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_s() -> u64 {
    4
}

fn default_lock_file() -> String {
    "/run/lock/beepdetect.lock".to_string()
}

/// FFT bin range scanned for a dominant continuous tone, used only when
/// `detect_continuous` is enabled (spec §4.3).
fn default_tone_bin_lower() -> usize {
    3
}

fn default_tone_bin_upper() -> usize {
    174
}

/// Detector-specific configuration; combine with [`afm_codec::config::SharedConfig`]
/// for the full set of tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Controller (PWM server) host. Empty string disables HTTP dispatch entirely.
    pub host: String,
    pub port: u16,
    /// Seconds allowed for a controller request before it is considered timed out.
    pub timeout_s: u64,
    /// PID lock file path.
    pub lock_file: String,
    /// If set, use this specific input device index instead of the host default.
    pub device: Option<usize>,
    /// Enable the experimental sustained-tone reset guard (off by default,
    /// spec §4.3: "disabled by default because it also deafens the detector").
    pub detect_continuous: bool,
    pub tone_bin_lower: usize,
    pub tone_bin_upper: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            host: default_host(),
            port: default_port(),
            timeout_s: default_timeout_s(),
            lock_file: default_lock_file(),
            device: None,
            detect_continuous: false,
            tone_bin_lower: default_tone_bin_lower(),
            tone_bin_upper: default_tone_bin_upper(),
        }
    }
}

impl DetectorConfig {
    /// Load from a TOML file, falling back to [`Default`] for any field the
    /// file omits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path_ref = path.as_ref();
        let text =
            std::fs::read_to_string(path_ref).map_err(|source| DetectorError::ConfigIo {
                path: path_ref.display().to_string(),
                source,
            })?;
        toml::from_str(&text).map_err(|source| DetectorError::ConfigParse {
            path: path_ref.display().to_string(),
            source,
        })
    }

    /// Whether the controller is reachable at all, i.e. whether HTTP dispatch
    /// should run (spec §6: "Set to empty string to disable server requests").
    pub fn controller_enabled(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_the_controller() {
        let cfg = DetectorConfig::default();
        assert!(cfg.controller_enabled());
        assert_eq!(cfg.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn empty_host_disables_the_controller() {
        let cfg = DetectorConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(!cfg.controller_enabled());
    }

    #[test]
    fn partial_toml_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.toml");
        std::fs::write(&path, "port = 9090\n").unwrap();
        let cfg = DetectorConfig::from_file(&path).unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.host, default_host());
    }
}
