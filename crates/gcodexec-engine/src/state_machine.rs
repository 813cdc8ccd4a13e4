//! Per-channel command state machine
//!
//! Commands that take more than one poll park their channel in a
//! [`GCodeState`] other than `Normal`. Each poll steps that state once.

use crate::channel::{ChannelId, GCodeState, MacroOrigin, PauseState};
use crate::engine::{Engine, TFREE, TPOST, TPRE};
use crate::motion::{MoveType, SegmentedMoveState};
use crate::reply::Reply;
use crate::restore::PAUSE_RESTORE_POINT;
use gcodexec_core::{
    AxesBitmap, Compatibility, EngineEvent, MachineEvent, MessageLevel, PrintEvent, StopReason,
    AXIS_LETTERS, Z_AXIS,
};
use std::time::Instant;

impl Engine {
    /// Step a channel's state machine once
    pub(crate) fn run_state_machine(&mut self, id: ChannelId) -> bool {
        let state = self.channels[id].state();
        match state {
            GCodeState::Normal => false,

            GCodeState::WaitingForSpecialMoveToComplete => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.finish_special_move();
                let channel = &self.channels[id];
                let reply = (channel.compatibility() == Compatibility::NanoDlp
                    && !channel.is_doing_file_macro())
                .then(|| Reply::ok("Z_move_comp"));
                self.complete_state(id, reply);
                true
            }

            GCodeState::WaitingForSegmentedMoveToGo => {
                if self.segments.is_busy() {
                    return false;
                }
                let aborted = self.segments.seg_state() == SegmentedMoveState::Aborted;
                if aborted {
                    self.segments.acknowledge_abort();
                    self.update_user_position_from_machine();
                }
                let reply = aborted.then(|| {
                    Reply::error("G1/G2/G3: intermediate position outside machine limits")
                });
                self.complete_state(id, reply);
                true
            }

            GCodeState::WaitingForMoves => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.complete_state(id, None);
                true
            }

            GCodeState::Dwelling { until } => {
                if Instant::now() < until {
                    return false;
                }
                self.complete_state(id, None);
                true
            }

            GCodeState::Homing1 => self.homing_next_axis(id),

            GCodeState::Homing2 => {
                let to_be_homed = self.locks.to_be_homed();
                let remaining = to_be_homed.difference(self.position.axes_homed);
                if remaining == to_be_homed {
                    let letters = self.position.unhomed_letters(to_be_homed);
                    self.locks.set_to_be_homed(AxesBitmap::new());
                    self.complete_state(
                        id,
                        Some(Reply::error(format!("G28: failed to home axes {}", letters))),
                    );
                    return true;
                }
                self.locks.set_to_be_homed(remaining);
                self.channels[id].set_state(GCodeState::Homing1);
                true
            }

            GCodeState::ToolChange0 => {
                self.channels[id].set_state(GCodeState::ToolChange1);
                let change = self.tool_change;
                if let Some(old) = change.old_tool.filter(|_| change.macros & TFREE != 0) {
                    self.run_state_macro(id, &format!("tfree{}.g", old), MacroOrigin::ToolChange);
                }
                true
            }

            GCodeState::ToolChange1 => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.collab.tools.select_tool(None);
                self.update_user_position_from_machine();
                self.channels[id].set_state(GCodeState::ToolChange2);
                let change = self.tool_change;
                if let Some(new) = change.new_tool.filter(|_| change.macros & TPRE != 0) {
                    self.run_state_macro(id, &format!("tpre{}.g", new), MacroOrigin::ToolChange);
                }
                true
            }

            GCodeState::ToolChange2 => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                let change = self.tool_change;
                self.collab.tools.select_tool(change.new_tool);
                self.update_user_position_from_machine();
                self.channels[id].set_state(GCodeState::ToolChangeComplete);
                if let Some(new) = change.new_tool.filter(|_| change.macros & TPOST != 0) {
                    self.run_state_macro(id, &format!("tpost{}.g", new), MacroOrigin::ToolChange);
                }
                true
            }

            GCodeState::ToolChangeComplete => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                let tool = self.tool_change.new_tool;
                tracing::info!("tool change to {:?} complete", tool);
                self.publish(EngineEvent::Machine(MachineEvent::ToolChanged { tool }));
                self.complete_state(id, None);
                true
            }

            GCodeState::Pausing1 => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.channels[id].set_state(GCodeState::Pausing2);
                let name = self.config.files.pause_macro.clone();
                self.run_state_macro(id, &name, MacroOrigin::SystemHelper);
                true
            }

            GCodeState::Pausing2 => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.pause_state = PauseState::Paused;
                let rp = &self.restore_points[PAUSE_RESTORE_POINT];
                let text = format!(
                    "Printing paused at X{:.1} Y{:.1} Z{:.1}",
                    rp.move_coords[0], rp.move_coords[1], rp.move_coords[Z_AXIS]
                );
                self.message(MessageLevel::Info, text.clone());
                self.publish(EngineEvent::Print(PrintEvent::Paused));
                self.complete_state(id, Some(Reply::ok(text)));
                true
            }

            GCodeState::Resuming1 | GCodeState::Resuming2 => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                let target = self.restore_points[PAUSE_RESTORE_POINT].move_coords;
                let current_z = self.position.user[Z_AXIS];
                let mut coords = target;
                if state == GCodeState::Resuming1 && current_z > target[Z_AXIS] {
                    // Over the restore point first, then down onto it
                    coords[Z_AXIS] = current_z;
                    self.channels[id].set_state(GCodeState::Resuming2);
                } else {
                    self.channels[id].set_state(GCodeState::Resuming3);
                }
                self.queue_reapproach_move(coords);
                true
            }

            GCodeState::Resuming3 => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.finish_resume();
                self.complete_state(id, Some(Reply::ok("Printing resumed")));
                true
            }

            GCodeState::Cancelling => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.stop_print(StopReason::UserCancelled);
                self.complete_state(id, None);
                true
            }

            GCodeState::Stopping => {
                if !self.lock_movement_and_wait_for_standstill(id) {
                    return false;
                }
                self.complete_state(id, None);
                true
            }

            GCodeState::PowerFailPausing1 => {
                self.save_resume_info(true);
                self.message(MessageLevel::Warning, "Print paused due to power failure");
                self.publish(EngineEvent::Print(PrintEvent::Paused));
                self.complete_state(id, None);
                true
            }
        }
    }

    /// G28: start the homing macro for the next axis still to be homed
    fn homing_next_axis(&mut self, id: ChannelId) -> bool {
        let to_be_homed = self.locks.to_be_homed();
        if to_be_homed.is_empty() {
            self.complete_state(id, None);
            return true;
        }
        if !self.lock_movement_and_wait_for_standstill(id) {
            return false;
        }

        let all_axes = AxesBitmap::lowest(self.position.num_axes);
        let home_all = self.config.files.home_all_macro.clone();
        let name = if to_be_homed == all_axes
            && self
                .collab
                .files
                .exists(&self.config.files.system_path(&home_all))
        {
            home_all
        } else {
            let axis = to_be_homed.iter().next().unwrap_or(0);
            let letter = AXIS_LETTERS[axis].to_ascii_lowercase();
            format!("home{}.g", letter)
        };

        self.channels[id].set_state(GCodeState::Homing2);
        match self.do_file_macro(id, &name, false, MacroOrigin::SystemHelper) {
            Ok(true) => {}
            Ok(false) => {
                self.locks.set_to_be_homed(AxesBitmap::new());
                self.complete_state(
                    id,
                    Some(Reply::error(format!("Homing file {} not found", name))),
                );
            }
            Err(e) => {
                self.message(MessageLevel::Error, format!("G28: {}", e));
                self.abort_print(id);
            }
        }
        true
    }

    /// Run a macro from a state, where a full stack aborts the channel
    fn run_state_macro(&mut self, id: ChannelId, name: &str, origin: MacroOrigin) {
        if let Err(e) = self.do_file_macro(id, name, false, origin) {
            self.message(MessageLevel::Error, format!("{}: {}", name, e));
            self.abort_print(id);
        }
    }

    /// Record the outcome of a homing or raw motor move
    fn finish_special_move(&mut self) {
        let Some(special) = self.special_move.take() else {
            return;
        };
        match special.move_type {
            MoveType::Homing => {
                let mut machine = self.position.machine;
                for axis in special.axes.iter() {
                    machine[axis] = self
                        .collab
                        .kinematics
                        .homing_position(axis, special.towards_max.is_set(axis));
                    self.position.axes_homed.set(axis);
                }
                self.collab.motion.set_machine_position(&machine);
                self.update_user_position_from_machine();
                tracing::debug!("homed {}", special.axes);
                self.publish(EngineEvent::Machine(MachineEvent::Homed {
                    axes: special.axes.to_string(),
                }));
            }
            MoveType::MeasureAxis => {
                for axis in special.axes.iter() {
                    self.position.axes_homed.set(axis);
                }
            }
            MoveType::Normal | MoveType::Raw | MoveType::HomingNoPosition => {}
        }
    }
}
