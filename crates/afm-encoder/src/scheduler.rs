// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! Back-dating with lead time, move splitting, and the in-flight sequence
//! concurrency cap (spec §4.2 "Back-dating with lead time" and "Concurrency
//! of emissions").

use afm_codec::wire::{playback_duration_ms, WireTiming};

use crate::window::Window;

/// Margin multiplier applied to the raw playback duration when deciding how
/// long a sequence keeps an in-flight slot occupied; accounts for decode
/// latency and fan spin-up on top of the beep playback itself.
const BUSY_MARGIN: f64 = 1.2;

/// Wall-clock duration (seconds) a played sequence keeps an in-flight slot
/// busy, including the margin over raw beep playback time.
pub fn sequence_duration_s(length: usize, timing: &WireTiming) -> f64 {
    BUSY_MARGIN * playback_duration_ms(length, timing) as f64 / 1000.0
}

/// Tracks how many beep sequences are still "in flight" (emitted but not yet
/// finished playing in printer-time), and whether a fan event had to be
/// postponed because the cap was reached. At most 2 sequences may be in
/// flight at once (spec §4.2).
#[derive(Debug, Default, Clone, Copy)]
pub struct Scheduler {
    sequences_busy: u32,
    sequence_time_left: f64,
    seq_postponed: bool,
}

/// Maximum number of sequences that may be in flight simultaneously.
pub const MAX_IN_FLIGHT: u32 = 2;

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn busy_count(&self) -> u32 {
        self.sequences_busy
    }

    pub fn is_postponed(&self) -> bool {
        self.seq_postponed
    }

    pub fn at_capacity(&self) -> bool {
        self.sequences_busy >= MAX_IN_FLIGHT
    }

    /// A new fan event arrived while at capacity: mark it postponed.
    pub fn postpone(&mut self) {
        self.seq_postponed = true;
    }

    /// A new, unrelated fan speed change supersedes any postponed event.
    pub fn drop_postponed(&mut self) {
        self.seq_postponed = false;
    }

    /// Advance time by `dt` seconds of print-time elapsed on the current
    /// line. Returns `true` exactly when a slot just freed up and there was
    /// a postponed event waiting, meaning the caller should process it now.
    pub fn tick(&mut self, dt: f64, sequence_duration: f64) -> bool {
        if self.sequences_busy == 0 {
            return false;
        }
        self.sequence_time_left -= dt;
        if self.sequence_time_left > 0.0 {
            return false;
        }
        self.sequences_busy -= 1;
        if self.sequences_busy > 0 {
            self.sequence_time_left += sequence_duration;
        }
        if self.seq_postponed {
            self.seq_postponed = false;
            return true;
        }
        false
    }

    /// Record that a sequence was just emitted with lead time `lead`
    /// (requested) and `actual_lead_time` (achieved after back-dating).
    pub fn note_emission(&mut self, lead: f64, actual_lead_time: f64, sequence_duration: f64) {
        if self.sequences_busy == 0 {
            self.sequence_time_left = sequence_duration + (lead - actual_lead_time);
        }
        self.sequences_busy += 1;
    }
}

/// Outcome of choosing where to insert a sequence for a target lead time.
pub struct Placement {
    pub position: usize,
    pub achieved_lead: f64,
    pub too_late: bool,
}

/// Pick the best insertion position in the main buffer to approximate
/// `lead_time`, given that walking backwards from the tail, `t_elapsed >=
/// lead_time > t_next` bracket it at `position` (spec §4.2).
fn optimize_lead_time(
    window: &mut Window,
    lead_time: f64,
    mut position: usize,
    mut t_elapsed: f64,
    t_next: f64,
    allow_split: bool,
) -> Placement {
    if t_elapsed <= 1.25 * lead_time {
        return Placement {
            position,
            achieved_lead: t_elapsed,
            too_late: false,
        };
    }

    let mut found = false;
    if t_next >= 0.75 * lead_time {
        position += 1;
        t_elapsed = t_next;
        found = true;
    } else if allow_split && split_move(window, position, lead_time - t_next) {
        position += 1;
        t_elapsed = t_next + lead_time;
        found = true;
    }

    if found {
        return Placement {
            position,
            achieved_lead: t_elapsed,
            too_late: false,
        };
    }

    if t_elapsed <= 2.0 * lead_time {
        Placement {
            position,
            achieved_lead: t_elapsed,
            too_late: false,
        }
    } else {
        Placement {
            position: position + 1,
            achieved_lead: t_next,
            too_late: true,
        }
    }
}

/// Split the `G1` move at `position` into two collinear moves whose
/// durations are `(original - time2)` and `time2`, interpolating X/Y/E
/// linearly and leaving Z untouched except for the trailing vase-mode
/// fragment (spec §4.2 "Back-dating with lead time").
pub fn split_move(window: &mut Window, position: usize, time2: f64) -> bool {
    let start_xy = match window.find_previous_xy(position) {
        Some(xy) => xy,
        None => return false,
    };
    let data = match window.main_get(position) {
        Some(d) => d.clone(),
        None => return false,
    };
    if data.time_estimate <= 0.0 {
        return false;
    }
    let fraction = 1.0 - (time2 / data.time_estimate);
    if fraction <= 0.0 {
        return false;
    }
    let time1 = fraction * data.time_estimate;

    let tokens = crate::gcode::parse_motion_tokens(&data.text);
    let comment = data.text.split_once(';').map(|(_, c)| c.trim().to_string());

    let (Some(end_x), end_y) = (
        tokens.x.or(Some(start_xy.0)),
        tokens.y.or(Some(start_xy.1)),
    ) else {
        return false;
    };
    let end_y = match end_y {
        Some(y) => y,
        None => return false,
    };

    let move_x = end_x - start_xy.0;
    let move_y = end_y - start_xy.1;
    let mid_x = start_xy.0 + fraction * move_x;
    let mid_y = start_xy.1 + fraction * move_y;

    let (mid_e, end_e) = match tokens.e {
        Some(e) => (
            format!(" E{:.5}", fraction * e),
            format!(" E{:.5}", (1.0 - fraction) * e),
        ),
        None => (String::new(), String::new()),
    };
    let zed = tokens.z.map(|z| format!(" Z{z}")).unwrap_or_default();
    let feed = tokens.f.map(|f| format!(" F{f}")).unwrap_or_default();
    let comment_suffix = comment.map(|c| format!(" ;{c}")).unwrap_or_default();

    let mid_line = format!("G1{zed} X{mid_x:.3} Y{mid_y:.3}{mid_e}{feed}{comment_suffix}");
    let end_line =
        format!("G1 X{end_x:.3} Y{end_y:.3}{end_e} ; split move for {time2:.2}s extra lead time");

    window.insert(position, vec![(mid_line, time1), (end_line, time2)], true);
    true
}

/// Insert a rendered beep sequence (as ready-to-emit G-code lines with their
/// own zero time estimates) so that it leads the current tail of the main
/// buffer by approximately `lead_time` seconds. Returns the lead time
/// actually achieved.
pub fn inject_sequence(
    window: &mut Window,
    commands: Vec<String>,
    lead_time: f64,
    allow_split: bool,
    end_sequence_marker: &str,
) -> f64 {
    let lines: Vec<(String, f64)> = commands.into_iter().map(|c| (c, 0.0)).collect();

    if lead_time <= 0.0 {
        window.append(lines);
        return 0.0;
    }

    let mut t_elapsed = 0.0;
    let mut t_next;
    let mut position = window.main_len();
    let mut blocked_by_previous_sequence = false;

    loop {
        if position == 0 {
            break;
        }
        let candidate = window.main_get(position - 1).unwrap();
        if candidate.text == end_sequence_marker {
            blocked_by_previous_sequence = true;
            break;
        }
        position -= 1;
        t_next = t_elapsed;
        t_elapsed += candidate.time_estimate;
        if t_elapsed >= lead_time {
            break;
        }
        let _ = t_next;
    }

    let (final_position, achieved) = if blocked_by_previous_sequence || position == 0 {
        (position, t_elapsed)
    } else {
        // Recompute t_next for the winning bracket: it is the elapsed time
        // one step closer to the tail than `position`.
        let t_next = t_elapsed - window.main_get(position).map(|l| l.time_estimate).unwrap_or(0.0);
        let placement = optimize_lead_time(window, lead_time, position, t_elapsed, t_next, allow_split);
        (placement.position, placement.achieved_lead)
    };

    window.insert(final_position, lines, false);
    achieved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::BufferedLine;

    #[test]
    fn scheduler_allows_two_in_flight_then_caps() {
        let mut s = Scheduler::new();
        assert!(!s.at_capacity());
        s.note_emission(1.3, 1.3, 0.8);
        assert_eq!(s.busy_count(), 1);
        s.note_emission(1.3, 1.3, 0.8);
        assert_eq!(s.busy_count(), 2);
        assert!(s.at_capacity());
    }

    #[test]
    fn scheduler_releases_slot_and_triggers_postponed() {
        let mut s = Scheduler::new();
        s.note_emission(1.3, 1.3, 0.8);
        s.postpone();
        // Tick past the sequence duration.
        let triggered = s.tick(0.9, 0.8);
        assert!(triggered);
        assert_eq!(s.busy_count(), 0);
        assert!(!s.is_postponed());
    }

    #[test]
    fn inject_with_zero_lead_appends_at_tail() {
        let mut w = Window::new(128);
        w.push_main(BufferedLine::new("G1 X1", 0.0, 0.0, 1.0));
        let lead = inject_sequence(&mut w, vec!["M300 S0 P200".into()], 0.0, false, "END");
        assert_eq!(lead, 0.0);
        assert_eq!(w.main_len(), 2);
    }

    #[test]
    fn inject_backtracks_to_approximate_lead_time() {
        let mut w = Window::new(128);
        for _ in 0..5 {
            w.push_main(BufferedLine::new("G1 X1 F3000", 0.0, 0.0, 0.5));
        }
        let achieved = inject_sequence(&mut w, vec!["M300 S0 P200".into()], 1.3, false, "END");
        assert!(achieved > 0.0);
        assert!(w.main_len() > 5);
    }

    #[test]
    fn inject_never_crosses_a_previous_sequence_marker() {
        let mut w = Window::new(128);
        w.push_main(BufferedLine::new("G1 X1", 0.0, 0.0, 0.5));
        w.push_main(BufferedLine::new("END", 0.0, 0.0, 0.0));
        w.push_main(BufferedLine::new("G1 X2", 0.0, 0.0, 0.5));
        let achieved = inject_sequence(&mut w, vec!["M300 S0 P200".into()], 1.3, false, "END");
        // Must not backtrack past the "END" marker line.
        let end_index = (0..w.main_len()).find(|&i| w.main_get(i).unwrap().text == "END").unwrap();
        let seq_index = (0..w.main_len())
            .find(|&i| w.main_get(i).unwrap().text == "M300 S0 P200")
            .unwrap();
        assert!(seq_index > end_index);
        assert!(achieved <= 0.5);
    }
}
