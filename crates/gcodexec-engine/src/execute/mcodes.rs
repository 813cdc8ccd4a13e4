//! M-codes

use super::unsupported;
use crate::channel::{ChannelId, GCodeState, MacroOrigin, PauseState};
use crate::command::DecodedCommand;
use crate::engine::{Engine, PartialMove};
use crate::motion::{filament_diameter, volumetric_factor};
use crate::reply::{CommandResult, Outcome, Reply};
use crate::resource::Resource;
use crate::trigger::TriggerCondition;
use gcodexec_core::{
    CommandError, Compatibility, EngineEvent, MachineEvent, MessageLevel, TriggerEvent, AXIS_LETTERS,
    MAX_AXES, Z_AXIS,
};
use std::fmt::Write;

/// M291 modes from this one up wait for M292
const FIRST_BLOCKING_MESSAGE_MODE: u32 = 2;

impl Engine {
    pub(super) fn handle_mcode(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let Some(code) = cmd.number else {
            return Err(unsupported(cmd));
        };
        if cmd.fraction.is_some() {
            return Err(unsupported(cmd));
        }

        match code {
            0 | 1 => self.stop_or_cancel(id, code == 1),
            20 => self.list_files(id, cmd),
            23 => {
                let name = cmd.unprecedented_string()?;
                self.select_file(&name)?;
                Ok(Outcome::ok(format!("File {} selected for printing", name)))
            }
            24 => self.start_or_resume(id),
            25 => self.request_pause(id),
            26 => self.set_restart_point(id, cmd),
            30 => self.delete_file(id, cmd),
            32 => {
                let name = cmd.unprecedented_string()?;
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return Ok(Outcome::NotFinished);
                }
                self.select_file(&name)?;
                self.start_printing()?;
                Ok(Outcome::done())
            }
            82 | 83 => {
                self.channels[id].latest_mut().drives_relative = code == 83;
                Ok(Outcome::done())
            }
            98 => {
                let name = cmd
                    .string('P')?
                    .ok_or_else(|| CommandError::invalid("M98: missing P parameter"))?;
                self.call_macro(id, &name)?;
                Ok(Outcome::done())
            }
            99 => {
                self.file_macro_cycles_return(id);
                Ok(Outcome::Done(Reply::empty()))
            }
            104 | 109 => self.set_tool_temperature(id, cmd, code == 109),
            105 => Ok(Outcome::ok(self.collab.heaters.temperature_report())),
            106 | 107 => self.set_fan(cmd, code == 107),
            112 => {
                self.emergency_stop();
                Ok(Outcome::done())
            }
            116 => self.wait_for_all_heaters(),
            120 => {
                self.channels[id].push(true)?;
                Ok(Outcome::done())
            }
            121 => {
                if !self.channels[id].pop(true) {
                    return Err(CommandError::invalid("M121: stack underflow"));
                }
                Ok(Outcome::done())
            }
            122 => Ok(Outcome::Done(Reply::long(self.diagnostics()))),
            140 | 190 => self.set_bed_temperature(id, cmd, code == 190),
            200 => self.set_volumetric_extrusion(id, cmd),
            220 => self.set_speed_factor(cmd),
            221 => self.set_extrusion_factor(cmd),
            226 => self.pause_from_file(id),
            290 => self.babystep(id, cmd),
            291 => self.show_message(id, cmd),
            292 => {
                let cancelled = cmd.uint('P')?.unwrap_or(0) != 0;
                for channel in self.channels.iter_mut() {
                    let frame = channel.latest_mut();
                    if frame.waiting_for_acknowledgement {
                        frame.message_acknowledged = true;
                        frame.message_cancelled = cancelled;
                    }
                }
                Ok(Outcome::done())
            }
            400 => {
                self.channels[id].set_state(GCodeState::WaitingForMoves);
                Ok(Outcome::done())
            }
            486 => self.object_cancellation(cmd),
            555 => self.set_compatibility(id, cmd),
            579 => self.set_axis_scale(cmd),
            581 => self.configure_trigger(cmd),
            582 => {
                let number = cmd.get_uint('T')? as usize;
                let printing = self.is_really_printing();
                if self.triggers.check_levels(number, self.signals.inputs(), printing) {
                    self.publish(EngineEvent::Trigger(TriggerEvent::Pending { number }));
                }
                Ok(Outcome::done())
            }
            916 => self.resurrect(id),
            _ => Err(unsupported(cmd)),
        }
    }

    /// M24: resume a paused print or start the selected file
    fn start_or_resume(&mut self, id: ChannelId) -> CommandResult {
        match self.pause_state {
            PauseState::NotPaused if self.print.is_active() => Ok(Outcome::done()),
            PauseState::NotPaused => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return Ok(Outcome::NotFinished);
                }
                self.start_printing()?;
                Ok(Outcome::done())
            }
            _ => self.resume_print(id),
        }
    }

    /// M20 [P"dir"]
    fn list_files(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let dir = cmd
            .string('P')?
            .unwrap_or_else(|| self.config.files.gcode_dir.clone());
        if !self.lock_resource(id, Resource::FileSystem) {
            return Ok(Outcome::NotFinished);
        }
        let names = self
            .collab
            .files
            .list(&dir)
            .map_err(|_| CommandError::invalid(format!("M20: directory {} not found", dir)))?;
        Ok(Outcome::Done(Reply::long(names.join("\n"))))
    }

    /// M30 "file"
    fn delete_file(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let name = cmd.unprecedented_string()?;
        if !self.lock_resource(id, Resource::FileSystem) {
            return Ok(Outcome::NotFinished);
        }
        let path = self.config.files.gcode_path(&name);
        self.collab.files.delete(&path).map_err(|e| {
            tracing::warn!("deleting {}: {}", path, e);
            CommandError::invalid(format!("Failed to delete file {}", name))
        })?;
        Ok(Outcome::done())
    }

    /// M26 S<offset> [P<fraction> <c0> <c1>]
    fn set_restart_point(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        if self.print.selected().is_none() {
            return Err(CommandError::invalid("M26: no file is selected"));
        }
        if let Some(offset) = cmd.float('S')? {
            if offset < 0.0 {
                return Err(CommandError::invalid("M26: bad file offset"));
            }
            self.file_offset_to_print = offset as u64;
        }
        if let Some(fraction) = cmd.float('P')? {
            let frame = self.channels[id].latest();
            let plane = frame.plane;
            let c0 = cmd.float(AXIS_LETTERS[plane.axis0()])?.unwrap_or(0.0);
            let c1 = cmd.float(AXIS_LETTERS[plane.axis1()])?.unwrap_or(0.0);
            self.restart = PartialMove {
                fraction: fraction.clamp(0.0, 1.0),
                initial_user_c0: frame.to_mm(c0),
                initial_user_c1: frame.to_mm(c1),
            };
        }
        Ok(Outcome::done())
    }

    /// M122
    fn diagnostics(&self) -> String {
        let mut out = String::from("=== Engine ===\n");
        let _ = writeln!(out, "Pause state: {}", self.pause_state);
        let _ = writeln!(
            out,
            "Printing: {}",
            self.print.file_name().unwrap_or("no")
        );
        let owner = self
            .lock_owner(Resource::Movement)
            .map_or_else(|| "nobody".to_string(), |c| c.to_string());
        let _ = writeln!(out, "Movement locked by: {}", owner);
        let _ = writeln!(
            out,
            "Segments left: {} ({:?})",
            self.segments.segments_left(),
            self.segments.seg_state()
        );
        out.push_str("Position:");
        for axis in 0..self.position.num_axes {
            let _ = write!(out, " {}{:.3}", AXIS_LETTERS[axis], self.position.user[axis]);
        }
        let _ = writeln!(out, " homed {}", self.position.axes_homed);
        let _ = writeln!(out, "Pending triggers: {:#x}", self.triggers.pending());
        out.push_str("=== Channels ===");
        for channel in self.channels.iter() {
            let _ = write!(
                out,
                "\n{}: state {}, depth {}, dialect {}",
                channel.id(),
                channel.state(),
                channel.depth(),
                channel.compatibility()
            );
        }
        out
    }

    /// M200 [D<diameter>[:<diameter>...]]
    ///
    /// A zero diameter turns volumetric extrusion off for this channel.
    fn set_volumetric_extrusion(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let extruders = self.config.machine.extruders;
        let Some(diameters) = cmd.float_list('D')? else {
            let frame = self.channels[id].latest();
            if !frame.volumetric_extrusion {
                return Ok(Outcome::ok("Volumetric extrusion is disabled"));
            }
            let text = self
                .position
                .volumetric_factors
                .iter()
                .take(extruders)
                .map(|&factor| format!("{:.2}", filament_diameter(factor)))
                .collect::<Vec<_>>()
                .join(":");
            return Ok(Outcome::ok(format!("Filament diameters: {}", text)));
        };
        if diameters.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(CommandError::invalid("M200: bad filament diameter"));
        }

        let enable = diameters.iter().any(|&d| d > 0.0);
        // A single diameter covers every drive
        let per_drive = if diameters.len() == 1 {
            vec![diameters[0]; extruders]
        } else {
            diameters
        };
        for (drive, &diameter) in per_drive.iter().enumerate().take(extruders) {
            if diameter > 0.0 {
                self.position.volumetric_factors[drive] = volumetric_factor(diameter);
            }
        }
        self.channels[id].latest_mut().volumetric_extrusion = enable;
        Ok(Outcome::done())
    }

    /// M579 [X<factor>] [Y<factor>] ...
    fn set_axis_scale(&mut self, cmd: &DecodedCommand) -> CommandResult {
        let num_axes = self.position.num_axes;
        let mut seen = false;
        for axis in 0..num_axes {
            let Some(factor) = cmd.float(AXIS_LETTERS[axis])? else {
                continue;
            };
            if !factor.is_finite() || factor <= 0.0 {
                return Err(CommandError::invalid(format!(
                    "M579: invalid scale factor for {}",
                    AXIS_LETTERS[axis]
                )));
            }
            self.position.axis_scale[axis] = factor;
            seen = true;
        }
        if seen {
            return Ok(Outcome::done());
        }
        let mut text = String::from("Axis scale factors:");
        for axis in 0..num_axes {
            let _ = write!(text, " {}{:.3}", AXIS_LETTERS[axis], self.position.axis_scale[axis]);
        }
        Ok(Outcome::ok(text))
    }

    /// M220 [S<percent>]
    fn set_speed_factor(&mut self, cmd: &DecodedCommand) -> CommandResult {
        let Some(percent) = cmd.float('S')? else {
            return Ok(Outcome::ok(format!(
                "Speed factor: {:.1}%",
                self.position.speed_factor * 100.0
            )));
        };
        if percent <= 0.0 {
            return Err(CommandError::invalid(format!(
                "M220: invalid speed factor {:.1}%",
                percent
            )));
        }
        self.position.speed_factor = percent / 100.0;
        Ok(Outcome::done())
    }

    /// M221 [D<drive>] [S<percent>]
    fn set_extrusion_factor(&mut self, cmd: &DecodedCommand) -> CommandResult {
        let drives: Vec<usize> = match cmd.uint('D')? {
            Some(d) => vec![d as usize],
            None => self
                .current_tool()
                .map_or_else(|| vec![0], |tool| tool.drives),
        };
        if drives.iter().any(|&d| d >= self.config.machine.extruders) {
            return Err(CommandError::invalid("M221: bad drive number"));
        }
        let Some(percent) = cmd.float('S')? else {
            let text = drives
                .iter()
                .map(|&d| format!("{:.1}%", self.position.extrusion_factors[d] * 100.0))
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(Outcome::ok(format!("Extrusion factor: {}", text)));
        };
        if percent < 0.0 {
            return Err(CommandError::invalid("M221: extrusion factor must not be negative"));
        }
        for d in drives {
            self.position.extrusion_factors[d] = percent / 100.0;
        }
        Ok(Outcome::done())
    }

    /// M290: baby-step the head without changing the user position
    fn babystep(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let relative = cmd.uint('R')?.unwrap_or(1) != 0;
        let num_axes = self.position.num_axes;
        let mut deltas = [0.0; MAX_AXES];
        let mut seen = false;
        for axis in 0..num_axes {
            let value = match cmd.float(AXIS_LETTERS[axis])? {
                Some(v) => Some(v),
                None if axis == Z_AXIS => cmd.float('S')?,
                None => None,
            };
            if let Some(v) = value {
                let v = self.channels[id].latest().to_mm(v);
                deltas[axis] = if relative {
                    v
                } else {
                    v - self.position.babystep[axis]
                };
                seen = true;
            }
        }

        if !seen {
            let text = (0..num_axes)
                .map(|axis| format!("{}{:.3}", AXIS_LETTERS[axis], self.position.babystep[axis]))
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(Outcome::ok(format!("Baby stepping offsets (mm): {}", text)));
        }
        if deltas.iter().all(|&d| d == 0.0) {
            return Ok(Outcome::done());
        }
        if !self.ready_for_move(id) {
            return Ok(Outcome::NotFinished);
        }

        let mut mv = self.new_move(false);
        mv.feed_rate = self.config.machine.max_g0_feed_rate / 60.0;
        for axis in 0..num_axes {
            self.position.babystep[axis] += deltas[axis];
            mv.coords[axis] += deltas[axis];
        }
        mv.set_segments(1, 0.0);
        let target = mv.coords;
        if self.segments.publish(mv) {
            self.position.machine = target;
        }
        Ok(Outcome::done())
    }

    /// M291 P"message" [R"title"] [S<mode>]
    fn show_message(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let text = cmd
            .string('P')?
            .ok_or_else(|| CommandError::invalid("M291: missing P parameter"))?;
        let title = cmd.string('R')?.unwrap_or_default();
        let mode = cmd.uint('S')?.unwrap_or(1);
        let full = if title.is_empty() {
            text
        } else {
            format!("{}: {}", title, text)
        };

        if mode < FIRST_BLOCKING_MESSAGE_MODE {
            self.message(MessageLevel::Info, full);
            return Ok(Outcome::done());
        }
        let frame = self.channels[id].latest_mut();
        frame.waiting_for_acknowledgement = true;
        frame.message_acknowledged = false;
        frame.message_cancelled = false;
        tracing::info!("{} waiting for acknowledgement of '{}'", id, full);
        self.publish(EngineEvent::Machine(MachineEvent::MessageBoxShown {
            channel: id.to_string(),
            text: full,
        }));
        Ok(Outcome::done())
    }

    /// M486 S<object> | P<object> | U<object>
    fn object_cancellation(&mut self, cmd: &DecodedCommand) -> CommandResult {
        let mut acted = false;
        if let Some(object) = cmd.int('S')? {
            self.print
                .set_current_object(u32::try_from(object).ok());
            acted = true;
        }
        if let Some(object) = cmd.uint('P')? {
            tracing::info!("cancelling object {}", object);
            self.print.cancel_object(object);
            acted = true;
        }
        if let Some(object) = cmd.uint('U')? {
            self.print.resume_object(object);
            acted = true;
        }
        if acted || cmd.seen('T') {
            return Ok(Outcome::done());
        }

        let cancelled: Vec<String> = self.print.cancelled_objects().map(|o| o.to_string()).collect();
        if cancelled.is_empty() {
            Ok(Outcome::ok("No objects cancelled"))
        } else {
            Ok(Outcome::ok(format!("Cancelled objects: {}", cancelled.join(" "))))
        }
    }

    /// M555 P<dialect>
    fn set_compatibility(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let Some(index) = cmd.uint('P')? else {
            return Ok(Outcome::ok(format!(
                "Output mode: {}",
                self.channels[id].compatibility()
            )));
        };
        let compatibility = Compatibility::from_index(index)
            .ok_or_else(|| CommandError::invalid(format!("M555: unknown mode {}", index)))?;
        self.channels[id].latest_mut().compatibility = compatibility;
        Ok(Outcome::done())
    }

    /// M581 T<trigger> [P<inputs>] [S<-1|0|1>] [R<0|1>]
    fn configure_trigger(&mut self, cmd: &DecodedCommand) -> CommandResult {
        let number = cmd.get_uint('T')? as usize;
        let Some(inputs) = cmd.float_list('P')? else {
            let Some(item) = self.triggers.item(number) else {
                return Err(CommandError::invalid("M581: trigger number out of range"));
            };
            let text = if item.is_unused() {
                format!("Trigger {} is not configured", number)
            } else {
                format!(
                    "Trigger {} fires on rising inputs {:#x}, falling inputs {:#x}",
                    number, item.rising, item.falling
                )
            };
            return Ok(Outcome::ok(text));
        };

        let mut mask = 0u32;
        for input in inputs {
            if !(0.0..32.0).contains(&input) {
                return Err(CommandError::invalid(format!("M581: bad input number {}", input)));
            }
            mask |= 1 << (input as u32);
        }
        let edge = match cmd.int('S')?.unwrap_or(1) {
            s if s < 0 => None,
            0 => Some(false),
            _ => Some(true),
        };
        let condition = if cmd.uint('R')?.unwrap_or(0) == 1 {
            TriggerCondition::WhilePrinting
        } else {
            TriggerCondition::Always
        };
        if !self.triggers.configure(number, mask, edge, condition) {
            return Err(CommandError::invalid("M581: trigger number out of range"));
        }
        tracing::debug!("trigger {} inputs {:#x} edge {:?} {:?}", number, mask, edge, condition);
        Ok(Outcome::done())
    }

    /// M916: run the saved resume-state file
    fn resurrect(&mut self, id: ChannelId) -> CommandResult {
        if self.print.is_active() {
            return Err(CommandError::invalid("M916: cannot resurrect while printing"));
        }
        let name = self.config.files.resume_state_file.clone();
        if !self.collab.files.exists(&self.config.files.system_path(&name)) {
            return Err(CommandError::invalid("M916: resurrection file not found"));
        }
        if !self.do_file_macro(id, &name, false, MacroOrigin::SystemHelper)? {
            return Err(CommandError::invalid("M916: resurrection file not found"));
        }
        Ok(Outcome::done())
    }
}

