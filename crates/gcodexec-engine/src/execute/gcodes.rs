//! G-codes

use super::unsupported;
use crate::channel::{ChannelId, GCodeState};
use crate::command::DecodedCommand;
use crate::engine::Engine;
use crate::motion::{Rotation, NUM_WORKPLACES};
use crate::reply::{CommandResult, Outcome};
use crate::restore::NUM_RESTORE_POINTS;
use gcodexec_core::{AxesBitmap, CommandError, DistanceUnits, Plane, AXIS_LETTERS, X_AXIS, Y_AXIS};
use std::time::{Duration, Instant};

impl Engine {
    pub(super) fn handle_gcode(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let Some(code) = cmd.number else {
            return Err(unsupported(cmd));
        };
        if let Some(fraction) = cmd.fraction {
            return match (code, fraction) {
                (59, 1..=3) => self.select_workplace(6 + fraction as usize - 1),
                _ => Err(unsupported(cmd)),
            };
        }

        match code {
            0 | 1 => {
                if !self.ready_for_move(id) {
                    return Ok(Outcome::NotFinished);
                }
                self.do_straight_move(id, cmd, code == 1)
            }
            2 | 3 => {
                if !self.ready_for_move(id) {
                    return Ok(Outcome::NotFinished);
                }
                self.do_arc_move(id, cmd, code == 2)
            }
            4 => self.dwell(id, cmd),
            10 => self.set_workplace_offsets(id, cmd),
            17..=19 => {
                if let Some(plane) = Plane::from_index((code - 17) as u32) {
                    self.channels[id].latest_mut().plane = plane;
                }
                Ok(Outcome::done())
            }
            20 | 21 => {
                self.channels[id].latest_mut().units = if code == 20 {
                    DistanceUnits::Inches
                } else {
                    DistanceUnits::Millimetres
                };
                Ok(Outcome::done())
            }
            28 => self.start_homing(id, cmd),
            // A bare G53 has nothing to apply to
            53 => Ok(Outcome::done()),
            54..=59 => self.select_workplace((code - 54) as usize),
            60 => self.save_restore_point(id, cmd),
            68 => self.set_rotation(id, cmd),
            69 => {
                self.position.rotation = Rotation::default();
                Ok(Outcome::done())
            }
            90 | 91 => {
                self.channels[id].latest_mut().axes_relative = code == 91;
                Ok(Outcome::done())
            }
            92 => self.set_positions(id, cmd),
            _ => Err(unsupported(cmd)),
        }
    }

    /// G4 P<ms> or S<seconds>
    fn dwell(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let millis = match (cmd.float('P')?, cmd.float('S')?) {
            (Some(p), _) => p,
            (None, Some(s)) => s * 1000.0,
            (None, None) => 0.0,
        };
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }
        if millis > 0.0 {
            let until = Instant::now() + Duration::from_secs_f64(millis / 1000.0);
            self.channels[id].set_state(GCodeState::Dwelling { until });
        }
        Ok(Outcome::done())
    }

    /// G10 L2 sets a workplace origin, G10 L20 makes the current position read as given
    fn set_workplace_offsets(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let Some(mode) = cmd.uint('L')? else {
            return Err(unsupported(cmd));
        };
        if mode != 2 && mode != 20 {
            return Err(unsupported(cmd));
        }
        let number = cmd.uint('P')?.unwrap_or(self.position.current_workplace as u32 + 1) as usize;
        if !(1..=NUM_WORKPLACES).contains(&number) {
            return Err(CommandError::invalid("G10: invalid workplace number"));
        }
        if mode == 20 && !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }

        let mut changed = false;
        for axis in 0..self.position.num_axes {
            let Some(value) = cmd.float(AXIS_LETTERS[axis])? else {
                continue;
            };
            let value = self.channels[id].latest().to_mm(value);
            self.position.workplaces[number - 1][axis] = if mode == 2 {
                value
            } else {
                self.position.user[axis] - value
            };
            changed = true;
        }
        if changed {
            tracing::debug!("workplace {} offsets {:?}", number, &self.position.workplaces[number - 1][..self.position.num_axes]);
            return Ok(Outcome::done());
        }

        let text = (0..self.position.num_axes)
            .map(|axis| format!("{}{:.2}", AXIS_LETTERS[axis], self.position.workplaces[number - 1][axis]))
            .collect::<Vec<_>>()
            .join(" ");
        Ok(Outcome::ok(format!("Origin of workplace {}: {}", number, text)))
    }

    /// G54..G59.3
    fn select_workplace(&mut self, index: usize) -> CommandResult {
        if index >= NUM_WORKPLACES {
            return Err(CommandError::invalid("invalid workplace number"));
        }
        self.position.current_workplace = index;
        Ok(Outcome::done())
    }

    /// G28: home the named axes, or all of them
    fn start_homing(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let num_axes = self.position.num_axes;
        let mut axes = AxesBitmap::new();
        for axis in 0..num_axes {
            if cmd.seen(AXIS_LETTERS[axis]) {
                axes.set(axis);
            }
        }
        if axes.is_empty() {
            axes = AxesBitmap::lowest(num_axes);
        }
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }

        for axis in axes.iter() {
            self.position.axes_homed.clear_bit(axis);
        }
        tracing::info!("{} homing {}", id, axes);
        self.locks.set_to_be_homed(axes);
        self.channels[id].set_state(GCodeState::Homing1);
        Ok(Outcome::done())
    }

    /// G60 S<n>
    fn save_restore_point(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let number = cmd.uint('S')?.unwrap_or(0) as usize;
        if number >= NUM_RESTORE_POINTS {
            return Err(CommandError::invalid("G60: bad restore point number"));
        }
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }
        let mut rp = self.position_snapshot();
        rp.feed_rate = self.channels[id].latest().feed_rate;
        self.restore_points[number] = rp;
        Ok(Outcome::done())
    }

    /// G68 A<x> B<y> R<angle> [I1]
    fn set_rotation(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        let angle = cmd.get_float('R')?;
        let mut centre = [0.0; 2];
        for (slot, (axis, letter, alias)) in [(X_AXIS, 'A', 'X'), (Y_AXIS, 'B', 'Y')].into_iter().enumerate() {
            let value = match cmd.float(letter)? {
                Some(v) => Some(v),
                None => cmd.float(alias)?,
            };
            centre[slot] = match value {
                Some(v) => {
                    let v = self.channels[id].latest().to_mm(v);
                    self.absolute_axis_target(id, cmd, axis, v)
                }
                None => self.position.user[axis],
            };
        }
        let relative = cmd.uint('I')?.unwrap_or(0) != 0;
        let angle = if relative {
            self.position.rotation.angle + angle
        } else {
            angle
        };
        self.position.rotation = Rotation { angle, centre };
        Ok(Outcome::done())
    }

    /// G92: declare the current position
    fn set_positions(&mut self, id: ChannelId, cmd: &DecodedCommand) -> CommandResult {
        if !self.lock_movement_and_wait_for_standstill(id) {
            return Ok(Outcome::NotFinished);
        }

        let mut axes = AxesBitmap::new();
        for axis in 0..self.position.num_axes {
            if let Some(value) = cmd.float(AXIS_LETTERS[axis])? {
                let value = self.channels[id].latest().to_mm(value);
                self.position.user[axis] = self.absolute_axis_target(id, cmd, axis, value);
                axes.set(axis);
            }
        }
        if let Some(e) = cmd.float('E')? {
            self.position.virtual_extruder = self.channels[id].latest().to_mm(e);
        }
        if !axes.is_empty() {
            self.set_machine_position_from_user();
            self.position.axes_homed = self.position.axes_homed.union(axes);
        }
        Ok(Outcome::done())
    }
}
