// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2024-2026 the mighty-variable-fan-rs contributors

//! The encoder's driving loop: ties the G-code classifier, kinematics,
//! sliding window, event reconciliation, and back-dating scheduler together
//! into the single pass described by spec §4.2.

use std::io::{BufRead, Write};

use afm_codec::config::SharedConfig;
use afm_codec::symbol::{self, Sequence};
use afm_codec::wire;
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EncoderError;
use crate::events::{self, AheadSample, Reconciled};
use crate::gcode::{self, LineKind};
use crate::kinematics::PrintState;
use crate::scheduler::{self, Scheduler};
use crate::window::{BufferedLine, Window, POSTPONED_MARKER};

static BODY_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(afm_codec::config::BODY_MARKER_PATTERN).unwrap());

/// Options that control the encoder pass, distinct from the shared acoustic
/// configuration (spec §4.2: CLI surface around the core algorithm).
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub allow_split: bool,
    pub emit_timings: bool,
    pub no_process: bool,
    pub max_buffer: usize,
    pub end_marker: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            allow_split: false,
            emit_timings: false,
            no_process: false,
            max_buffer: 128,
            end_marker: afm_codec::config::DEFAULT_END_MARKER.to_string(),
        }
    }
}

/// Raised internally to signal that the end-of-print marker has been consumed.
enum ReadSignal {
    EndOfPrint,
}

struct Encoder<'a> {
    lines: std::io::Lines<&'a mut dyn BufRead>,
    writer: &'a mut dyn Write,
    config: SharedConfig,
    options: EncoderOptions,
    window: Window,
    print_state: PrintState,
    fan_duty: f64,
    fan_override: Option<f64>,
    end_of_print: bool,
    m126_7_found: bool,
    end_marker: String,
}

impl<'a> Encoder<'a> {
    fn new(
        reader: &'a mut dyn BufRead,
        writer: &'a mut dyn Write,
        config: SharedConfig,
        options: EncoderOptions,
    ) -> Self {
        let end_marker = options.end_marker.clone();
        let max_buffer = options.max_buffer;
        Encoder {
            lines: reader.lines(),
            writer,
            config,
            options,
            window: Window::new(max_buffer),
            print_state: PrintState::default(),
            fan_duty: 0.0,
            fan_override: None,
            end_of_print: false,
            m126_7_found: false,
            end_marker,
        }
    }

    fn next_raw_line(&mut self) -> Option<Result<String, EncoderError>> {
        self.lines.next().map(|r| r.map_err(EncoderError::Io))
    }

    fn write_raw(&mut self, text: &str) -> Result<(), EncoderError> {
        writeln!(self.writer, "{text}").map_err(EncoderError::Io)
    }

    fn flush_line(&mut self, line: &BufferedLine) -> Result<(), EncoderError> {
        let result = if self.options.emit_timings && line.time_estimate != 0.0 {
            writeln!(self.writer, "{}; {:.3}", line.text, line.time_estimate)
        } else {
            writeln!(self.writer, "{}", line.text)
        };
        result.map_err(EncoderError::Io)
    }

    fn flush_lines(&mut self, lines: Vec<BufferedLine>) -> Result<(), EncoderError> {
        for line in &lines {
            self.flush_line(line)?;
        }
        Ok(())
    }

    /// Read the start G-code verbatim until the `@body` marker, echoing every
    /// line to output (spec §4.2: lines before the print body are passed through).
    fn read_start_gcode(&mut self) -> Result<(), EncoderError> {
        loop {
            let raw = match self.next_raw_line() {
                Some(line) => line?,
                None => return Err(EncoderError::UnexpectedEofBeforeBody),
            };
            let is_body_marker = BODY_MARKER_RE.is_match(&raw);
            self.write_raw(&raw)?;
            if is_body_marker {
                return Ok(());
            }
        }
    }

    fn write_parameter_comment(&mut self) -> Result<(), EncoderError> {
        writeln!(
            self.writer,
            "; afm-encoder version {}; parameters: allow_split={}, emit_timings={}",
            env!("CARGO_PKG_VERSION"),
            self.options.allow_split,
            self.options.emit_timings
        )
        .map_err(EncoderError::Io)
    }

    /// Output the remaining buffered lines, then copy the rest of the input
    /// through verbatim (spec §4.2: end-of-stream flush).
    fn flush_all(&mut self) -> Result<(), EncoderError> {
        let remaining = self.window.drain_all();
        self.flush_lines(remaining)?;
        loop {
            match self.next_raw_line() {
                Some(line) => {
                    let text = line?;
                    self.write_raw(&text)?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Classify and apply one freshly read line, pushing it into either the
    /// main or look-ahead buffer (spec §4.2 "Sliding window model").
    fn read_next_line(&mut self, ahead: bool) -> Result<Option<ReadSignal>, EncoderError> {
        if self.end_of_print {
            return Ok(Some(ReadSignal::EndOfPrint));
        }
        let raw = match self.next_raw_line() {
            Some(line) => line?,
            None => {
                return Err(EncoderError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "end of file reached",
                )))
            }
        };

        let kind = gcode::classify_line(&raw, &BODY_MARKER_RE, &self.end_marker);
        let mut duty_cycle = self.fan_duty;
        let mut time_estimate = 0.0;

        match &kind {
            LineKind::Move(tokens) => {
                time_estimate =
                    self.print_state
                        .apply_move(tokens, self.config.feed_factor, self.config.feed_limit_z);
            }
            LineKind::Dwell { ms } => {
                time_estimate = ms / 1000.0;
            }
            LineKind::LegacyFanCommand => {
                self.m126_7_found = true;
            }
            LineKind::EndMarker => {
                self.end_of_print = true;
            }
            LineKind::FanCommand { duty_byte } => {
                duty_cycle = *duty_byte;
                self.fan_duty = duty_cycle;
            }
            LineKind::ExtrusionMode { absolute } => {
                if *absolute {
                    warn!("M82 (absolute extrusion) found; this pipeline assumes relative E (M83)");
                }
            }
            LineKind::BodyMarker | LineKind::Other => {}
        }

        let line = BufferedLine::new(raw, self.print_state.z, duty_cycle, time_estimate);
        if ahead {
            self.window.push_ahead(line);
        } else {
            let evicted = self.window.push_main(line);
            self.flush_lines(evicted)?;
        }

        if self.end_of_print {
            return Ok(Some(ReadSignal::EndOfPrint));
        }
        Ok(None)
    }

    /// Whether the configured end-of-print marker is within the first
    /// `how_near` look-ahead lines (spec §4.2: suppress back-dating near EOF).
    fn the_end_is_near(&self, how_near: usize) -> bool {
        if !self.end_of_print {
            return false;
        }
        if let Some(last) = self.window.last_main() {
            if last.text.starts_with(&self.end_marker) {
                return true;
            }
        }
        for i in 0..how_near.min(self.window.ahead_len()) {
            if let Some(l) = self.window.ahead_get(i) {
                if l.text.starts_with(&self.end_marker) {
                    return true;
                }
            }
        }
        false
    }
}

/// Outcome of [`Encoder::get_next_event`]: either an interesting line to
/// react to, or end-of-print.
enum EventOutcome {
    Line,
    EndOfPrint,
}

impl<'a> Encoder<'a> {
    /// Read lines until a fan command, a (non-Z-hop) layer change, or a
    /// just-released postponed event is seen (spec §4.2 "Event detection").
    fn get_next_event(
        &mut self,
        look_ahead: usize,
        scheduler: &mut Scheduler,
        sequence_duration: f64,
    ) -> Result<EventOutcome, EncoderError> {
        let (mut last_z, mut last_fan) = match self.window.last_main() {
            Some(l) => (l.z, self.fan_override.take().unwrap_or(l.fan_duty)),
            None => (0.0, 0.0),
        };

        loop {
            if self.window.ahead_len() > 0 {
                if let Some(popped) = self.window.promote_ahead() {
                    self.flush_lines(popped)?;
                }
                if self.window.ahead_len() == 0 && self.end_of_print {
                    return Ok(EventOutcome::EndOfPrint);
                }
            } else if let Some(ReadSignal::EndOfPrint) = self.read_next_line(false)? {
                return Ok(EventOutcome::EndOfPrint);
            }

            let current = self.window.last_main().unwrap().clone();
            trace!("buffer tail: {:?}", current);

            let mut fan_command = false;
            if last_fan != current.fan_duty {
                fan_command = true;
                if scheduler.is_postponed() {
                    trace!("dropping postponed event: superseded by a new fan command");
                    scheduler.drop_postponed();
                }
            }

            let mut apparent_layer_change = current.z != last_z;

            let mut postponed_event = false;
            if scheduler.tick(current.time_estimate, sequence_duration) {
                postponed_event = true;
                apparent_layer_change = false;
            }

            if !(fan_command || apparent_layer_change || postponed_event) {
                last_z = current.z;
                last_fan = current.fan_duty;
                continue;
            }

            while self.window.ahead_len() < look_ahead && !self.end_of_print {
                if self.read_next_line(true)?.is_some() {
                    break;
                }
            }

            if apparent_layer_change
                && self.window.ahead_len() > 2
                && self.window.ahead_get(2).map(|l| l.z) == Some(last_z)
            {
                trace!("no layer change: Z-hop");
                last_z = current.z;
                last_fan = current.fan_duty;
                continue;
            }

            if postponed_event {
                self.window.push_main(BufferedLine::new(
                    POSTPONED_MARKER,
                    current.z,
                    current.fan_duty,
                    0.0,
                ));
            }
            return Ok(EventOutcome::Line);
        }
    }
}

const END_SEQUENCE_MARKER: &str = "M300 S0 P200; end sequence";

/// Render a sequence to `M300` commands annotated with a leading comment
/// naming the encoded sequence and a trailing `end sequence` marker, mirroring
/// the original `sequence_to_m300_commands` helper so that back-dating can
/// recognise where a previously injected sequence ends.
fn render_beep_commands(sequence: &Sequence, freqs: &[u32; 4], comment: &str) -> Vec<String> {
    let mut commands = wire::render_gcode(sequence, freqs, &wire::WireTiming::default());
    if let Some(first) = commands.first_mut() {
        let digits: String = sequence.iter().map(|s| s.to_string()).collect();
        *first = format!("{first}; {comment} -> sequence {digits}");
    }
    if let Some(last) = commands.last_mut() {
        *last = END_SEQUENCE_MARKER.to_string();
    }
    commands
}

/// Run the full encoder pass over `reader`, writing post-processed G-code to
/// `writer` (spec §4.2, the complete pipeline).
pub fn run(
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
    config: SharedConfig,
    options: EncoderOptions,
) -> Result<(), EncoderError> {
    let max_buffer = options.max_buffer;
    let mut enc = Encoder::new(reader, writer, config.clone(), options.clone());

    let off_sequence = symbol::encode(
        symbol::from_duty_byte(0, config.sequence_length),
        config.sequence_length,
    );
    let off_commands = render_beep_commands(&off_sequence, &config.signal_freqs, "fan off");

    enc.read_start_gcode()?;

    if enc.options.no_process {
        loop {
            match enc.read_next_line(false) {
                Ok(Some(ReadSignal::EndOfPrint)) => break,
                Ok(None) => continue,
                Err(e) => return Err(e),
            }
        }
        enc.flush_all()?;
        return Ok(());
    }

    enc.write_parameter_comment()?;

    let mut scheduler = Scheduler::new();
    let sequence_duration =
        scheduler::sequence_duration_s(config.sequence_length, &wire::WireTiming::default());
    let mut set_fan_speed = 0.0_f64;
    let mut current_layer_z = 0.0_f64;
    let mut last_sequence: Sequence = Vec::new();

    loop {
        match enc.get_next_event(max_buffer, &mut scheduler, sequence_duration)? {
            EventOutcome::EndOfPrint => {
                if set_fan_speed != 0.0 {
                    debug!("end of print reached while fan still active: inserting off sequence");
                    enc.window.append(off_commands.iter().cloned().map(|l| (l, 0.0)));
                }
                break;
            }
            EventOutcome::Line => {}
        }

        let current = enc.window.last_main().unwrap().clone();
        let mut original_speed = current.fan_duty;
        let mut layer_change = false;
        let mut is_postponed = false;

        let ahead_layer_z = enc.window.ahead_get(2).map(|l| l.z).unwrap_or(current.z);

        if current.text == POSTPONED_MARKER {
            is_postponed = true;
            enc.window.pop_last_main();
            current_layer_z = current.z.min(ahead_layer_z);
        } else if current_layer_z == current.z {
            enc.window.pop_last_main();
            enc.fan_override = Some(original_speed);
        } else {
            current_layer_z = current.z;
            if current.fan_duty == 0.0 {
                continue;
            }
            layer_change = true;
        }

        let scale = events::ramp_up_scale(ahead_layer_z, config.ramp_up_zmax, config.ramp_up_scale0);
        let mut now_fan_speed = original_speed * scale;

        let ahead_samples: Vec<AheadSample> = (0..enc.window.ahead_len())
            .filter_map(|i| enc.window.ahead_get(i))
            .map(|l| AheadSample {
                duty_byte: l.fan_duty,
                z: l.z,
                time_estimate: l.time_estimate,
            })
            .collect();

        let (ahead_fan_time, ahead_fan_speed, original_ahead_speed) = if now_fan_speed != set_fan_speed {
            events::scan_ahead_for_next_command(
                ahead_samples,
                original_speed,
                scale,
                ahead_layer_z,
                config.ramp_up_zmax,
                config.ramp_up_scale0,
            )
        } else {
            (0.0, now_fan_speed, original_speed)
        };

        match events::reconcile_with_ahead(
            set_fan_speed,
            now_fan_speed,
            ahead_fan_speed,
            ahead_fan_time,
            original_ahead_speed,
        ) {
            Reconciled::JumpTo { speed, original } => {
                now_fan_speed = speed;
                original_speed = original;
            }
            Reconciled::Keep => {}
            Reconciled::Skip => continue,
        }

        if now_fan_speed == set_fan_speed {
            continue;
        }
        let now_sequence = symbol::encode(
            symbol::from_duty_value(now_fan_speed, config.sequence_length),
            config.sequence_length,
        );
        if now_sequence == last_sequence {
            continue;
        }

        if scheduler.at_capacity() {
            scheduler.postpone();
            continue;
        }

        let comment = if now_fan_speed != 0.0 {
            let scaled = if scale < 1.0 {
                format!(" scaled {scale:.3}")
            } else {
                String::new()
            };
            format!("fan PWM {original_speed}{scaled} = {:.2}%", now_fan_speed / 2.55)
        } else {
            "fan off".to_string()
        };
        let comment = if layer_change {
            format!("{comment} (layer change)")
        } else {
            comment
        };

        let lead = if enc.the_end_is_near(max_buffer / 8) && now_fan_speed == 0.0 {
            0.0
        } else if is_postponed {
            config.lead_time / 2.0
        } else {
            config.lead_time
        };

        // Timing of layer-related fan speed changes is not important.
        let allow_split_for_this = if layer_change { false } else { options.allow_split };
        let commands = render_beep_commands(&now_sequence, &config.signal_freqs, &comment);

        let actual_lead_time = scheduler::inject_sequence(
            &mut enc.window,
            commands,
            lead,
            allow_split_for_this,
            END_SEQUENCE_MARKER,
        );

        set_fan_speed = now_fan_speed;
        last_sequence = now_sequence;
        scheduler.note_emission(lead, actual_lead_time, sequence_duration);
    }

    enc.flush_all()?;

    if enc.m126_7_found {
        warn!(
            "M126 and/or M127 command(s) were found inside the body of the G-code; \
             the fan will most likely not respond to these. Configure the slicer to emit M106/M107."
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_on(input: &str, config: SharedConfig, options: EncoderOptions) -> String {
        let mut reader = Cursor::new(input.as_bytes());
        let mut output = Vec::new();
        run(&mut reader, &mut output, config, options).expect("encoder run should succeed");
        String::from_utf8(output).unwrap()
    }

    fn no_scale_config() -> SharedConfig {
        SharedConfig {
            ramp_up_scale0: 1.0,
            ramp_up_zmax: 1.0,
            lead_time: 0.05,
            ..SharedConfig::default()
        }
    }

    #[test]
    fn fan_command_turns_into_a_beep_sequence() {
        let input = "; start gcode\n\
                     ;@body\n\
                     G1 X0 Y0 F3000\n\
                     M106 S128\n\
                     G1 X10 Y0 F3000\n\
                     G1 X20 Y0 F3000\n\
                     ;- - - Custom finish printing G-code for FlashForge Creator Pro - - -\n\
                     G28\n";
        let out = run_on(input, no_scale_config(), EncoderOptions::default());
        assert!(out.contains("M300 S0 P200"), "expected a beep sequence in output:\n{out}");
        assert!(out.contains("end sequence"));
        assert!(!out.contains("M106 S128"), "the raw Sailfish command should be consumed");
        assert!(out.contains("G28"), "content after the end marker must pass through verbatim");
    }

    #[test]
    fn fan_off_at_end_of_print_is_flushed() {
        let input = "; start gcode\n\
                     ;@body\n\
                     G1 X0 Y0 F3000\n\
                     M106 S200\n\
                     G1 X10 Y0 F3000\n\
                     ;- - - Custom finish printing G-code for FlashForge Creator Pro - - -\n";
        let out = run_on(input, no_scale_config(), EncoderOptions::default());
        // Two sequences: the S200 command, and the fan-off flush at end of print.
        assert_eq!(out.matches("end sequence").count(), 2);
    }

    #[test]
    fn no_process_mode_passes_everything_through() {
        let input = "; start gcode\n\
                     ;@body\n\
                     M106 S128\n\
                     ;- - - Custom finish printing G-code for FlashForge Creator Pro - - -\n";
        let options = EncoderOptions {
            no_process: true,
            ..EncoderOptions::default()
        };
        let out = run_on(input, no_scale_config(), options);
        assert!(out.contains("M106 S128"));
        assert!(!out.contains("M300"));
    }
}
