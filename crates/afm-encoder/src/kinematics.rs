// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Print-head kinematics: tracks (x, y, z, feedrate) across `G1` lines and
//! estimates how long each move takes. Acceleration is intentionally
//! ignored; the systematic underestimate is absorbed into the lead-time
//! margin (spec §4.2).

use crate::gcode::MotionTokens;

/// Z delta (mm) above which a combined XYZ move is considered an intentional
/// vase-mode layer change rather than noise/rounding on the Z axis.
const VASE_Z_THRESHOLD: f64 = 0.2;

/// Tracks print-head position and feedrate across `G1` lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub f: f64,
}

impl Default for PrintState {
    fn default() -> Self {
        // Feedrate starts at 1.0, never 0.0, to avoid a division by zero on
        // the first move estimate if a file omits an initial F.
        PrintState {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            f: 1.0,
        }
    }
}

impl PrintState {
    /// Apply the tokens found on a `G1` line, returning the estimated
    /// duration of the move in seconds (spec §4.2).
    pub fn apply_move(&mut self, tokens: &MotionTokens, feed_factor: f64, feed_limit_z: f64) -> f64 {
        let prev = *self;

        if let Some(z) = tokens.z {
            if tokens.x.is_some() || tokens.y.is_some() {
                // Combined XYZ move: only treat as an intentional Z change
                // (vase mode) if it clears the Z-hop threshold.
                if z >= self.z + VASE_Z_THRESHOLD {
                    self.z = z;
                }
            } else {
                self.z = z;
            }
        }
        if let Some(x) = tokens.x {
            self.x = x;
        }
        if let Some(y) = tokens.y {
            self.y = y;
        }
        if let Some(f) = tokens.f {
            self.f = f;
        }

        if tokens.x.is_some() || tokens.y.is_some() {
            let dx = self.x - prev.x;
            let dy = self.y - prev.y;
            dx.hypot(dy) * feed_factor / self.f
        } else if tokens.z.is_some() {
            let feedrate = self.f.min(feed_limit_z);
            (self.z - prev.z).abs() * feed_factor / feedrate
        } else if let Some(e) = tokens.e {
            e.abs() * feed_factor / self.f
        } else {
            0.0
        }
    }
}
