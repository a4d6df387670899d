// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Event detection and clustering: deciding which Z changes and fan commands
//! are worth reacting to, and what "ramp-up" scale to apply near the bed
//! (spec §4.2 "Event detection" and "Ramp-up scaling").

/// Linear ramp-up scale factor for a fan duty at the given layer height,
/// following a line from `(0, scale0)` to `(zmax, 1.0)`, clamped to 1.0
/// above `zmax` (spec §4.2).
pub fn ramp_up_scale(layer_z: f64, zmax: f64, scale0: f64) -> f64 {
    (layer_z * (1.0 - scale0) / zmax + scale0).min(1.0)
}

/// One line of look-ahead used to decide whether an imminent fan command
/// supersedes the one currently being considered.
#[derive(Debug, Clone, Copy)]
pub struct AheadSample {
    pub duty_byte: f64,
    pub z: f64,
    pub time_estimate: f64,
}

/// Scan the look-ahead buffer for the next differing fan command, summing
/// elapsed time until either it is found or 1.5s of prints have passed
/// (spec §4.2 "Clustering and suppression": fan-inertia collapse window).
pub fn scan_ahead_for_next_command(
    ahead: impl IntoIterator<Item = AheadSample>,
    original_speed: f64,
    current_scale: f64,
    current_ahead_z: f64,
    zmax: f64,
    scale0: f64,
) -> (f64, f64, f64) {
    let mut ahead_fan_time = 0.0;
    for sample in ahead {
        if sample.duty_byte != original_speed {
            let next_scale = if sample.z == current_ahead_z {
                current_scale
            } else {
                ramp_up_scale(sample.z, zmax, scale0)
            };
            return (ahead_fan_time, sample.duty_byte * next_scale, sample.duty_byte);
        }
        ahead_fan_time += sample.time_estimate;
        if ahead_fan_time > 1.5 {
            break;
        }
    }
    (ahead_fan_time, current_scale * original_speed, original_speed)
}

/// Outcome of reconciling an event's requested fan speed against an
/// imminent, different speed seen in the look-ahead buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciled {
    /// Jump straight to this speed (and treat this as the "original" request for logging).
    JumpTo { speed: f64, original: f64 },
    /// Keep the speed as originally computed.
    Keep,
    /// Drop this event entirely: current speed will do until the ahead event arrives.
    Skip,
}

/// Apply the 40ms coalescing rule and the 1.5s fan-inertia collapse rule
/// (spec §4.2 "Clustering and suppression"). `now_fan_speed`/`ahead_fan_speed`
/// are already ramp-scaled.
pub fn reconcile_with_ahead(
    set_fan_speed: f64,
    now_fan_speed: f64,
    ahead_fan_speed: f64,
    ahead_fan_time: f64,
    original_ahead_speed: f64,
) -> Reconciled {
    if now_fan_speed == ahead_fan_speed {
        return Reconciled::Keep;
    }
    if ahead_fan_time < 0.04 {
        return Reconciled::JumpTo {
            speed: ahead_fan_speed,
            original: original_ahead_speed,
        };
    }
    let slow_down_not_worth_it =
        now_fan_speed < set_fan_speed || (now_fan_speed < ahead_fan_speed && ahead_fan_time < 1.5);
    if slow_down_not_worth_it {
        if ahead_fan_speed <= set_fan_speed || now_fan_speed <= ahead_fan_speed {
            Reconciled::JumpTo {
                speed: ahead_fan_speed,
                original: original_ahead_speed,
            }
        } else {
            Reconciled::Skip
        }
    } else {
        Reconciled::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_scale_is_linear_from_scale0_to_one() {
        assert!((ramp_up_scale(0.0, 4.0, 0.05) - 0.05).abs() < 1e-9);
        assert!((ramp_up_scale(4.0, 4.0, 0.05) - 1.0).abs() < 1e-9);
        assert_eq!(ramp_up_scale(40.0, 4.0, 0.05), 1.0, "clamped above zmax");
    }

    #[test]
    fn within_40ms_jumps_straight_to_ahead_speed() {
        let r = reconcile_with_ahead(0.0, 100.0, 200.0, 0.02, 200.0);
        assert_eq!(
            r,
            Reconciled::JumpTo {
                speed: 200.0,
                original: 200.0
            }
        );
    }

    #[test]
    fn slow_dip_shorter_than_inertia_window_is_skipped() {
        // now=50 is below both set=100 and ahead=150, but within inertia window:
        // ahead_fan_speed(150) > set(100) and now(50) < ahead(150) -> "no use slowing down", skip.
        let r = reconcile_with_ahead(100.0, 50.0, 150.0, 0.5, 150.0);
        assert_eq!(r, Reconciled::Skip);
    }

    #[test]
    fn distinct_stable_change_is_kept() {
        let r = reconcile_with_ahead(50.0, 100.0, 100.0, 2.0, 100.0);
        assert_eq!(r, Reconciled::Keep);
    }
}
