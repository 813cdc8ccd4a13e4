//! The resume-state file
//!
//! Written on every pause and on power failure. It is ordinary G-code:
//! running it brings heaters, tools, offsets and extrusion back, moves the
//! head over the pause point and carries on with the print.

use crate::channel::ChannelId;
use crate::engine::Engine;
use crate::motion::{filament_diameter, NUM_WORKPLACES};
use crate::restore::PAUSE_RESTORE_POINT;
use chrono::Local;
use gcodexec_core::{EngineError, MachineType, MessageLevel, AXIS_LETTERS, Z_AXIS};
use std::fmt::Write;

impl Engine {
    /// Write the resume-state file for the print in progress
    ///
    /// Does nothing when no print is active. On failure the partial file is
    /// deleted.
    pub(crate) fn save_resume_info(&mut self, power_failure: bool) {
        let Some(file_name) = self.print.file_name().map(str::to_string) else {
            return;
        };
        let path = self.config.files.system_path(&self.config.files.resume_state_file);
        let written = self
            .resume_state_text(&file_name, power_failure)
            .map(|text| self.collab.files.write(&path, &text));

        match written {
            Some(Ok(())) => self.message(MessageLevel::Info, "Resume state saved"),
            Some(Err(e)) => {
                tracing::error!("writing {}: {}", path, e);
                self.discard_resume_file(&path);
            }
            None => self.discard_resume_file(&path),
        }
    }

    fn discard_resume_file(&self, path: &str) {
        if self.collab.files.exists(path) {
            let _ = self.collab.files.delete(path);
        }
        self.message(
            MessageLevel::Error,
            EngineError::ResumeStateWrite { path: path.to_string() }.to_string(),
        );
    }

    /// Build the resume-state file, or `None` if a collaborator could not write its part
    pub(crate) fn resume_state_text(&self, file_name: &str, power_failure: bool) -> Option<String> {
        let rp = &self.restore_points[PAUSE_RESTORE_POINT];
        let pos = &self.position;
        let file_state = self.channels[ChannelId::File].original();
        let num_axes = pos.num_axes;
        let mut out = String::new();

        let cause = if power_failure {
            "power failure"
        } else {
            "print paused"
        };
        let _ = writeln!(
            out,
            "; File \"{}\" resume print after {} at {}",
            file_name,
            cause,
            Local::now().format("%Y-%m-%d %H:%M")
        );
        out.push_str("G21\n");
        if !self.collab.heaters.write_resume_settings(&mut out) {
            return None;
        }

        out.push_str("G92");
        for axis in 0..num_axes {
            let total_offset = pos.babystep[axis] - self.current_tool_offset(axis);
            let _ = write!(
                out,
                " {}{:.3}",
                AXIS_LETTERS[axis],
                rp.move_coords[axis] - total_offset
            );
        }
        out.push_str("\nG60 S1\n");

        if !self.collab.tools.write_resume_settings(&mut out) {
            return None;
        }
        let _ = writeln!(out, "M98 P\"{}\"", self.config.files.resume_prologue_macro);

        out.push_str("M116\nM290");
        for axis in 0..num_axes {
            let _ = write!(out, " {}{:.3}", AXIS_LETTERS[axis], pos.babystep[axis]);
        }
        out.push_str(" R0\n");

        if let Some(tool) = self.collab.tools.current_tool() {
            let _ = writeln!(out, "T-1 P0\nT{} P6", tool);
        }

        for (index, workplace) in pos.workplaces.iter().enumerate().take(NUM_WORKPLACES) {
            let _ = write!(out, "G10 L2 P{}", index + 1);
            for axis in 0..num_axes {
                let _ = write!(out, " {}{:.2}", AXIS_LETTERS[axis], workplace[axis]);
            }
            out.push('\n');
        }
        if pos.current_workplace <= 5 {
            let _ = writeln!(out, "G{}", 54 + pos.current_workplace);
        } else {
            let _ = writeln!(out, "G59.{}", pos.current_workplace - 5);
        }

        if file_state.volumetric_extrusion {
            out.push_str("M200 ");
            let extruders = self.config.machine.extruders;
            for (i, factor) in pos.volumetric_factors.iter().take(extruders).enumerate() {
                let diameter = filament_diameter(*factor);
            let _ = write!(out, "{}{:.3}", if i == 0 { 'D' } else { ':' }, diameter);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "M106 S{:.2}", rp.fan_speed);
        let _ = writeln!(
            out,
            "M116\nG92 E{:.5}\n{}",
            rp.virtual_extruder_position,
            if file_state.drives_relative { "M83" } else { "M82" }
        );

        for object in self.print.cancelled_objects() {
            let _ = writeln!(out, "M486 P{}", object);
        }

        let plane = file_state.plane;
        let _ = write!(
            out,
            "G{}\nM23 \"{}\"\nM26 S{}",
            17 + plane.index(),
            file_name,
            rp.file_pos.unwrap_or(0)
        );
        if rp.proportion_done > 0.0 {
            let _ = write!(
                out,
                " P{:.3} {}{:.3} {}{:.3}",
                rp.proportion_done,
                AXIS_LETTERS[plane.axis0()],
                rp.initial_user_c0,
                AXIS_LETTERS[plane.axis1()],
                rp.initial_user_c1
            );
        }
        out.push('\n');

        let _ = writeln!(out, "G0 F6000 Z{:.3}", rp.move_coords[Z_AXIS] + 2.0);
        out.push_str("G0 F6000");
        for axis in (0..num_axes).filter(|&axis| axis != Z_AXIS) {
            let _ = write!(out, " {}{:.3}", AXIS_LETTERS[axis], rp.move_coords[axis]);
        }
        let _ = writeln!(out, "\nG0 F6000 Z{:.3}", rp.move_coords[Z_AXIS]);

        let _ = write!(out, "G1 F{:.1}", rp.feed_rate);
        if self.config.machine.machine_type == MachineType::Laser {
            let power = f64::from(rp.laser_pwm) * self.config.machine.laser_max_power / f64::from(u16::MAX);
            let _ = write!(out, " S{:.1}", power);
        } else {
            let _ = write!(out, " P{}", rp.io_bits);
        }
        out.push('\n');

        let _ = writeln!(out, "{}\nM24", file_state.units.gcode());
        Some(out)
    }
}
