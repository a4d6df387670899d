// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! G-code line classification and motion-parameter extraction.
//!
//! Each component (X/Y/Z/E/F) is matched independently with its own regex
//! rather than one combined expression, so the parser stays agnostic to the
//! slicer's exact token order (e.g. `Z1.2 F321 X0.0 G1` is just as valid as
//! the usual `G1 X0.0 Z1.2 F321`).

use once_cell::sync::Lazy;
use regex::Regex;

static RE_X: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*X(-?\d*\.?\d+)(\s|;|$)").unwrap());
static RE_Y: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*Y(-?\d*\.?\d+)(\s|;|$)").unwrap());
static RE_Z: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*Z(\d*\.?\d+)(\s|;|$)").unwrap());
static RE_E: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*E(-?\d*\.?\d+)(\s|;|$)").unwrap());
static RE_F: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*F(\d*\.?\d+)(\s|;|$)").unwrap());
static RE_G1: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^;]*G1(\s|;|$)").unwrap());
static RE_G4: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^;]*G4(\s|;|$)").unwrap());
static RE_G4_P: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*P(\d+)(\s|;|$)").unwrap());
static RE_G4_S: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^;]*S(\d*\.?\d+)(\s|;|$)").unwrap());
static RE_FAN_CMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(M106|M107)(\s+S(\d*\.?\d+)|\s|;|$)").unwrap());
static RE_LEGACY_FAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(M126|M127)(\s|;|$)").unwrap());
static RE_EXTRUSION_MODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(M82|M83)(\s|;|$)").unwrap());

/// The X/Y/Z/E/F tokens present on a motion line. Absent components are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionTokens {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub f: Option<f64>,
}

fn capture_f64(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Extract whichever of X/Y/Z/E/F are present on `line`, ignoring anything after a `;` comment.
pub fn parse_motion_tokens(line: &str) -> MotionTokens {
    MotionTokens {
        x: capture_f64(&RE_X, line),
        y: capture_f64(&RE_Y, line),
        z: capture_f64(&RE_Z, line),
        e: capture_f64(&RE_E, line),
        f: capture_f64(&RE_F, line),
    }
}

/// The classification of one input line, as the encoder's line reader sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    /// `G1` print or travel move.
    Move(MotionTokens),
    /// `G4` dwell; contributes its pause duration to the time estimate like a move.
    Dwell { ms: f64 },
    /// `M106 S<0..255>` (fan on at a given duty byte) or `M107` (fan off, duty 0).
    FanCommand { duty_byte: f64 },
    /// Legacy on/off fan control (`M126`/`M127`) mixed into a variable-speed print.
    LegacyFanCommand,
    /// `M82` (absolute E) / `M83` (relative E).
    ExtrusionMode { absolute: bool },
    /// The literal `;@body` marker line.
    BodyMarker,
    /// The configured end-of-print marker line.
    EndMarker,
    /// Anything else: comments, other G/M codes, blank lines.
    Other,
}

/// Classify a single line of G-code text (already stripped of its trailing newline).
pub fn classify_line(line: &str, body_marker: &Regex, end_marker: &str) -> LineKind {
    if line.starts_with(end_marker) {
        return LineKind::EndMarker;
    }
    if body_marker.is_match(line) {
        return LineKind::BodyMarker;
    }
    if RE_G1.is_match(line) {
        return LineKind::Move(parse_motion_tokens(line));
    }
    if RE_G4.is_match(line) {
        let ms = capture_f64(&RE_G4_P, line).unwrap_or_else(|| capture_f64(&RE_G4_S, line).unwrap_or(0.0) * 1000.0);
        return LineKind::Dwell { ms };
    }
    if RE_LEGACY_FAN.is_match(line) {
        return LineKind::LegacyFanCommand;
    }
    if let Some(caps) = RE_FAN_CMD.captures(line) {
        let is_m106 = &caps[1] == "M106";
        let duty_byte = if is_m106 {
            caps.get(3).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0)
        } else {
            0.0
        };
        return LineKind::FanCommand { duty_byte };
    }
    if let Some(caps) = RE_EXTRUSION_MODE.captures(line) {
        return LineKind::ExtrusionMode {
            absolute: &caps[1] == "M82",
        };
    }
    LineKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_re() -> Regex {
        Regex::new(afm_codec::config::BODY_MARKER_PATTERN).unwrap()
    }

    #[test]
    fn classifies_move_with_tokens_in_any_order() {
        let tokens = parse_motion_tokens("G1 Z1.2 F321 X0.0");
        assert_eq!(tokens.z, Some(1.2));
        assert_eq!(tokens.f, Some(321.0));
        assert_eq!(tokens.x, Some(0.0));
        assert_eq!(tokens.y, None);
    }

    #[test]
    fn classifies_fan_on_with_duty() {
        let kind = classify_line("M106 S128", &body_re(), ";end");
        assert_eq!(kind, LineKind::FanCommand { duty_byte: 128.0 });
    }

    #[test]
    fn classifies_fan_off() {
        let kind = classify_line("M107", &body_re(), ";end");
        assert_eq!(kind, LineKind::FanCommand { duty_byte: 0.0 });
    }

    #[test]
    fn classifies_legacy_fan() {
        assert_eq!(
            classify_line("M126", &body_re(), ";end"),
            LineKind::LegacyFanCommand
        );
    }

    #[test]
    fn classifies_body_and_end_markers() {
        assert_eq!(
            classify_line(";@body", &body_re(), ";end"),
            LineKind::BodyMarker
        );
        assert_eq!(
            classify_line("; @body extra", &body_re(), ";end"),
            LineKind::BodyMarker
        );
        assert_eq!(classify_line(";end", &body_re(), ";end"), LineKind::EndMarker);
    }

    #[test]
    fn classifies_dwell() {
        assert_eq!(
            classify_line("G4 P500", &body_re(), ";end"),
            LineKind::Dwell { ms: 500.0 }
        );
    }
}
