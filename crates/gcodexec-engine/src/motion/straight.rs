//! G0/G1 straight moves
//!
//! Also holds the parts every move builder shares: feed rate and extrusion
//! loading, the homed-axes check and the final hand-off to the segment
//! source.

use super::{rotate_coordinates, tool_offset_inverse_transform, tool_offset_transform, MoveState, MoveType};
use crate::channel::{ChannelId, GCodeState};
use crate::command::DecodedCommand;
use crate::engine::{Engine, SpecialMove};
use crate::kinematics::{LimitResult, Segmentation};
use crate::reply::{CommandResult, Outcome};
use crate::restore::NUM_RESTORE_POINTS;
use gcodexec_core::{
    AxesBitmap, CommandError, Compatibility, Coords, MachineType, MessageLevel, AXIS_LETTERS, MAX_EXTRUDERS,
    X_AXIS, Y_AXIS, Z_AXIS,
};

/// Upper bound on the segments any single move is cut into
pub const MAX_SEGMENTS_PER_MOVE: u32 = 10_000;

/// Round a fractional segment count up into `1..=MAX_SEGMENTS_PER_MOVE`
pub(crate) fn clamp_segments(count: f64) -> u32 {
    if count.is_nan() || count <= 1.0 {
        1
    } else if count >= f64::from(MAX_SEGMENTS_PER_MOVE) {
        MAX_SEGMENTS_PER_MOVE
    } else {
        count.ceil() as u32
    }
}

/// Number of segments for a straight move of `length` mm at `feed_rate` mm/s
///
/// The move is cut into pieces no shorter than the minimum segment length
/// and no more than the kinematics wants per second of move time, rounding
/// up. A limit that is zero or not finite does not apply; with neither
/// limit the move is one segment.
pub fn straight_segment_count(length: f64, feed_rate: f64, seg: &Segmentation) -> u32 {
    if length.is_nan() || length <= 0.0 {
        return 1;
    }
    let usable = |v: f64| v > 0.0 && v.is_finite();
    let by_length = usable(seg.min_segment_length).then(|| length / seg.min_segment_length);
    let by_time = (usable(feed_rate) && usable(seg.segments_per_second))
        .then(|| length / feed_rate * seg.segments_per_second);
    match (by_length, by_time) {
        (Some(a), Some(b)) => clamp_segments(a.min(b)),
        (Some(c), None) | (None, Some(c)) => clamp_segments(c),
        (None, None) => 1,
    }
}

/// Segments needed so that no segment spans more than one mesh grid cell
pub fn mesh_segment_count(delta_x: f64, delta_y: f64, spacing: f64) -> u32 {
    if spacing <= 0.0 {
        return 1;
    }
    clamp_segments((delta_x.abs() / spacing).max(delta_y.abs() / spacing))
}

impl Engine {
    /// Movement is locked and the last move has been taken
    pub(crate) fn ready_for_move(&mut self, id: ChannelId) -> bool {
        self.lock_movement(id) && !self.segments.is_busy()
    }

    /// A move record with the defaults every builder starts from
    pub(crate) fn new_move(&self, coordinated: bool) -> MoveState {
        MoveState {
            coords: self.position.machine,
            initial_coords: self.position.machine,
            coordinated,
            tool: self.collab.tools.current_tool(),
            laser_pwm: self.position.laser_pwm,
            io_bits: self.position.io_bits,
            axes_homed: self.position.axes_homed,
            num_axes: self.position.num_axes,
            virtual_extruder_position: self.position.virtual_extruder,
            move_start_virtual_extruder: self.position.virtual_extruder,
            ..MoveState::default()
        }
    }

    /// Where an axis parameter puts the user position, before the move's transforms
    pub(crate) fn absolute_axis_target(&self, id: ChannelId, cmd: &DecodedCommand, axis: usize, value: f64) -> f64 {
        let frame = self.channels[id].latest();
        if cmd.machine_coordinates {
            // G53 ignores tool offsets as well as workplace coordinates
            value + self.current_tool_offset(axis)
        } else if frame.running_system_macro {
            value
        } else {
            value + self.position.workplace_offset(axis)
        }
    }

    /// Check every axis the kinematics needs homed first has been
    pub(crate) fn enough_axes_homed(&self, axes_moving: AxesBitmap) -> bool {
        self.collab
            .kinematics
            .must_be_homed_axes(axes_moving, !self.config.machine.allow_moves_before_homing)
            .difference(self.position.axes_homed)
            .is_empty()
    }

    /// True if the frame's coordinate rotation applies to this command
    pub(crate) fn doing_coordinate_rotation(&self, id: ChannelId, cmd: &DecodedCommand) -> bool {
        self.position.rotation.is_active()
            && !cmd.machine_coordinates
            && !self.channels[id].latest().running_system_macro
    }

    /// Laser power from an S parameter in the configured power range
    pub(crate) fn convert_laser_pwm(&self, s: f64) -> u16 {
        let max = self.config.machine.laser_max_power;
        if max <= 0.0 {
            return 0;
        }
        ((s / max).clamp(0.0, 1.0) * f64::from(u16::MAX)).round() as u16
    }

    /// Laser power or IO bits for a move that is not a restore-point move
    pub(crate) fn load_laser_or_io_bits(&mut self, cmd: &DecodedCommand, mv: &mut MoveState) -> Result<(), CommandError> {
        if self.config.machine.machine_type == MachineType::Laser {
            if let Some(s) = cmd.float('S')? {
                mv.laser_pwm = self.convert_laser_pwm(s);
            } else if mv.move_type != MoveType::Normal {
                mv.laser_pwm = 0;
            }
            // Otherwise the power of the last G1 sticks
        } else if let Some(p) = cmd.uint('P')? {
            mv.io_bits = p.min(u32::from(u16::MAX)) as u16;
        }
        Ok(())
    }

    /// Feed rate and per-drive extrusion of a move
    ///
    /// Returns true if any drive extrudes forwards.
    pub(crate) fn load_extrusion_and_feed_rate(
        &mut self,
        id: ChannelId,
        cmd: &DecodedCommand,
        mv: &mut MoveState,
        is_printing_move: bool,
    ) -> Result<bool, CommandError> {
        let in_macro = self.channels[id].is_doing_file_macro();
        let standard_feed_rate =
            mv.coordinated || self.config.machine.machine_type == MachineType::Fff;
        let apply_factors = standard_feed_rate
            && mv.move_type == MoveType::Normal
            && is_printing_move
            && !in_macro;

        if standard_feed_rate {
            let frame = self.channels[id].latest_mut();
            if let Some(f) = cmd.float('F')? {
                if f <= 0.0 {
                    return Err(CommandError::invalid(format!(
                        "{}: feed rate must be greater than zero",
                        cmd.code()
                    )));
                }
                frame.feed_rate = frame.to_mm(f);
            }
            let requested = frame.feed_rate;
            let factor = if apply_factors { self.position.speed_factor } else { 1.0 };
            mv.feed_rate = requested * factor / 60.0;
        } else {
            mv.feed_rate = self.config.machine.max_g0_feed_rate / 60.0;
        }

        mv.extrusion = [0.0; MAX_EXTRUDERS];
        mv.move_start_virtual_extruder = self.position.virtual_extruder;
        let mut has_positive_extrusion = false;

        let Some(values) = cmd.float_list('E')? else {
            mv.virtual_extruder_position = self.position.virtual_extruder;
            return Ok(false);
        };
        let Some(tool) = self.current_tool() else {
            self.message(MessageLevel::Warning, "Attempting to extrude with no tool selected.");
            mv.virtual_extruder_position = self.position.virtual_extruder;
            return Ok(false);
        };
        if tool.drives.is_empty() {
            return Ok(false);
        }

        let frame = self.channels[id].latest();
        let (relative, volumetric, units) =
            (frame.drives_relative, frame.volumetric_extrusion, frame.units);
        let counts_towards_total = mv.move_type == MoveType::Normal && !in_macro;

        if let [value] = values[..] {
            let arg = units.to_mm(value);
            let requested = if relative {
                arg
            } else {
                let amount = arg - self.position.virtual_extruder;
                self.position.virtual_extruder = arg;
                amount
            };
            has_positive_extrusion = requested > 0.0;
            if counts_towards_total {
                self.position.raw_extruder_total += requested;
            }

            // One value spread over the tool's drives by its mix ratios
            let mut total_mix = 0.0;
            for (index, (&drive, &mix)) in tool.drives.iter().zip(&tool.mix).enumerate() {
                if mix == 0.0 || drive >= MAX_EXTRUDERS {
                    continue;
                }
                total_mix += mix;
                let mut amount = requested * mix;
                if volumetric {
                    amount *= self.position.volumetric_factors[drive];
                }
                if index == 0 && counts_towards_total {
                    self.position.raw_extruder_by_drive[drive] += amount;
                }
                mv.extrusion[drive] = if apply_factors {
                    amount * self.position.extrusion_factors[drive]
                } else {
                    amount
                };
            }
            if !is_printing_move && standard_feed_rate {
                mv.feed_rate *= total_mix;
            }
        } else if relative {
            for (&drive, &value) in tool.drives.iter().zip(&values) {
                let mut amount = units.to_mm(value);
                if amount == 0.0 || drive >= MAX_EXTRUDERS {
                    continue;
                }
                has_positive_extrusion |= amount > 0.0;
                if volumetric {
                    amount *= self.position.volumetric_factors[drive];
                }
                if counts_towards_total {
                    self.position.raw_extruder_by_drive[drive] += amount;
                    self.position.raw_extruder_total += amount;
                }
                mv.extrusion[drive] = if apply_factors {
                    amount * self.position.extrusion_factors[drive]
                } else {
                    amount
                };
            }
        } else {
            return Err(CommandError::invalid(
                "Multiple E parameters in G1 commands are not supported in absolute extrusion mode",
            ));
        }

        mv.virtual_extruder_position = self.position.virtual_extruder;
        Ok(has_positive_extrusion)
    }

    /// Hand a built move to the motion system and free the movement lock
    ///
    /// A move on a cancelled object is built but never sent.
    pub(crate) fn finalise_move(&mut self, id: ChannelId, mut mv: MoveState, total_segments: u32) {
        let fraction = self.move_restart(id).fraction;
        mv.file_pos = if id == ChannelId::File {
            self.channels[id].command_file_pos
        } else {
            None
        };
        if fraction > 0.0 {
            self.restart = Default::default();
        }

        if self.print.current_object_cancelled() {
            if self.config.machine.machine_type == MachineType::Laser {
                self.position.laser_pwm = 0;
            }
            tracing::debug!("move on a cancelled object skipped");
        } else {
            mv.set_segments(total_segments, fraction);
            if mv.total_segments > 1 {
                self.channels[id].set_state(GCodeState::WaitingForSegmentedMoveToGo);
            }
            self.position.laser_pwm = mv.laser_pwm;
            self.position.io_bits = mv.io_bits;
            let coords = mv.coords;
            if !self.segments.publish(mv) {
                // Callers check the source is free before building, so this is a logic error
                tracing::error!("move dropped: the previous move has not been taken");
            }
            self.position.machine = coords;
        }
        self.locks.release_all_except_inherited(&mut self.channels[id]);
    }

    /// G0/G1
    ///
    /// The caller holds the movement lock and the previous move has been taken.
    pub(crate) fn do_straight_move(
        &mut self,
        id: ChannelId,
        cmd: &DecodedCommand,
        coordinated: bool,
    ) -> CommandResult {
        let code = cmd.code();
        let plane = self.channels[id].latest().plane;
        let mut mv = self.new_move(coordinated);
        let restart = self.move_restart(id);
        let fraction = restart.fraction;
        if fraction > 0.0 {
            mv.initial_user_c0 = restart.initial_user_c0;
            mv.initial_user_c1 = restart.initial_user_c1;
        } else {
            mv.initial_user_c0 = self.position.user[plane.axis0()];
            mv.initial_user_c1 = self.position.user[plane.axis1()];
        }

        // H selects a special move; S does too on anything but a laser
        let laser = self.config.machine.machine_type == MachineType::Laser;
        let type_param = if cmd.seen('H') {
            cmd.uint('H')?
        } else if !laser && cmd.seen('S') {
            self.message(
                MessageLevel::Warning,
                "Obsolete use of S parameter on G1 command. Use H parameter instead.",
            );
            cmd.uint('S')?
        } else {
            None
        };
        if let Some(move_type) = type_param.and_then(MoveType::from_index) {
            if move_type != MoveType::Normal {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return Ok(Outcome::NotFinished);
                }
                mv = self.new_move(coordinated);
                mv.move_type = move_type;
                mv.tool = None;
            }
        }

        let restore_point = if mv.move_type == MoveType::Normal {
            match cmd.uint('R')? {
                Some(n) if (n as usize) < NUM_RESTORE_POINTS => Some(self.restore_points[n as usize].clone()),
                Some(_) => {
                    return Err(CommandError::invalid(format!("{}: bad restore point number", code)))
                }
                None => None,
            }
        } else {
            None
        };
        match &restore_point {
            Some(rp) => {
                mv.laser_pwm = rp.laser_pwm;
                mv.io_bits = rp.io_bits;
            }
            None => self.load_laser_or_io_bits(cmd, &mut mv)?,
        }

        let initial_user = self.position.user;
        let mut user = self.position.user;
        let mut axes_mentioned = AxesBitmap::new();
        let relative = self.channels[id].latest().axes_relative;
        for axis in 0..self.position.num_axes {
            let Some(value) = cmd.float(AXIS_LETTERS[axis])? else {
                continue;
            };
            axes_mentioned.set(axis);
            let arg = self.channels[id].latest().to_mm(value);
            if mv.move_type != MoveType::Normal {
                // Special moves go straight to machine coordinates
                if relative {
                    mv.coords[axis] += arg * (1.0 - fraction);
                } else {
                    mv.coords[axis] = arg;
                }
            } else if let Some(rp) = &restore_point {
                user[axis] = arg + rp.move_coords[axis];
            } else if relative {
                user[axis] += arg * (1.0 - fraction);
            } else {
                user[axis] = self.absolute_axis_target(id, cmd, axis, arg);
            }
        }

        match mv.move_type {
            MoveType::Normal => {
                if !self.enough_axes_homed(axes_mentioned) {
                    return Err(CommandError::invalid(format!("{}: insufficient axes homed", code)));
                }
            }
            MoveType::Homing | MoveType::MeasureAxis | MoveType::HomingNoPosition => {
                mv.check_endstops = true;
            }
            MoveType::Raw => {}
        }

        let has_positive_extrusion =
            self.load_extrusion_and_feed_rate(id, cmd, &mut mv, !axes_mentioned.is_empty())?;

        let total_segments = if mv.move_type != MoveType::Normal {
            let mut towards_max = AxesBitmap::new();
            for axis in axes_mentioned.iter() {
                if mv.coords[axis] > mv.initial_coords[axis] {
                    towards_max.set(axis);
                }
            }
            self.special_move = Some(SpecialMove {
                axes: axes_mentioned,
                towards_max,
                move_type: mv.move_type,
            });
            self.channels[id].set_state(GCodeState::WaitingForSpecialMoveToComplete);
            1
        } else if axes_mentioned.is_empty() {
            1
        } else {
            let tool = self.current_tool_mapping();
            let mut rotated = user;
            if self.doing_coordinate_rotation(id, cmd) {
                rotate_coordinates(&self.position.rotation, &mut rotated);
            }
            tool_offset_transform(&self.position, tool.as_ref(), &rotated, &mut mv.coords, axes_mentioned);

            self.limit_straight_move(&mut mv, &mut user, has_positive_extrusion, &code)?;

            // A restarted move is cut up from where it first began so the skipped segments line up
            let mut start_user = initial_user;
            if fraction > 0.0 {
                start_user[plane.axis0()] = restart.initial_user_c0;
                start_user[plane.axis1()] = restart.initial_user_c1;
                let mut rotated_start = start_user;
                if self.doing_coordinate_rotation(id, cmd) {
                    rotate_coordinates(&self.position.rotation, &mut rotated_start);
                }
                let mut start = mv.initial_coords;
                let plane_axes = AxesBitmap::single(plane.axis0()).union(AxesBitmap::single(plane.axis1()));
                tool_offset_transform(&self.position, tool.as_ref(), &rotated_start, &mut start, plane_axes);
                mv.initial_coords = start;
            }

            // NanoDLP waits for every move to finish before it sends the next line
            let channel = &self.channels[id];
            if channel.compatibility() == Compatibility::NanoDlp && !channel.is_doing_file_macro() {
                self.channels[id].set_state(GCodeState::WaitingForSpecialMoveToComplete);
            }

            let mut except_z = axes_mentioned;
            except_z.clear_bit(Z_AXIS);
            mv.use_pressure_advance = has_positive_extrusion && !except_z.is_empty();

            let seg = self.collab.kinematics.segmentation();
            let mut count = match seg {
                Some(seg) if has_positive_extrusion || mv.coordinated || seg.segment_g0 => {
                    let dx = user[X_AXIS] - start_user[X_AXIS];
                    let dy = user[Y_AXIS] - start_user[Y_AXIS];
                    straight_segment_count(dx.hypot(dy), mv.feed_rate, &seg)
                }
                _ => 1,
            };
            if let Some(spacing) = self.config.segmentation.mesh_spacing {
                if mv.coordinated || self.config.machine.machine_type == MachineType::Fff {
                    let mesh = mesh_segment_count(
                        user[X_AXIS] - start_user[X_AXIS],
                        user[Y_AXIS] - start_user[Y_AXIS],
                        spacing,
                    );
                    count = count.max(mesh);
                }
            }
            count
        };

        if mv.move_type == MoveType::Normal {
            self.position.user = user;
        }
        tracing::debug!("{}: {} to {:?} in {} segments", id, code, &mv.coords[..mv.num_axes], total_segments);
        self.finalise_move(id, mv, total_segments);
        Ok(Outcome::done())
    }

    /// Bring a straight move inside the machine limits, or fail
    fn limit_straight_move(
        &self,
        mv: &mut MoveState,
        user: &mut Coords,
        has_positive_extrusion: bool,
        code: &str,
    ) -> Result<(), CommandError> {
        let kin = &self.collab.kinematics;
        let machine_type = self.config.machine.machine_type;
        let initial = mv.initial_coords;
        let result = kin.limit_position(
            &mut mv.coords,
            Some(&initial),
            mv.num_axes,
            mv.axes_homed,
            mv.coordinated,
            true,
        );

        let path_blocked = match result {
            LimitResult::Ok => false,
            LimitResult::Adjusted | LimitResult::AdjustedAndIntermediateUnreachable => {
                if machine_type != MachineType::Fff {
                    return Err(CommandError::unreachable(format!(
                        "{}: target position outside machine limits",
                        code
                    )));
                }
                let tool = self.current_tool_mapping();
                *user = tool_offset_inverse_transform(&self.position, tool.as_ref(), &mv.coords);
                result == LimitResult::AdjustedAndIntermediateUnreachable
            }
            LimitResult::IntermediateUnreachable => true,
        };
        if !path_blocked {
            return Ok(());
        }

        // A coordinated travel move may still be possible uncoordinated
        let travel = (machine_type == MachineType::Fff && !has_positive_extrusion)
            || (machine_type == MachineType::Laser && mv.laser_pwm == 0);
        if mv.coordinated && travel {
            let retry = kin.limit_position(
                &mut mv.coords,
                Some(&initial),
                mv.num_axes,
                mv.axes_homed,
                false,
                true,
            );
            if retry == LimitResult::Ok {
                mv.coordinated = false;
                return Ok(());
            }
        }
        Err(CommandError::unreachable(format!(
            "{}: target position not reachable from current position",
            code
        )))
    }
}
